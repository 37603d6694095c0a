//! Topic templates for inbound cloud messages
//!
//! A template is a `/`-separated pattern whose segments are literals,
//! `{name}` captures or a trailing `#`. Matching works on the topic path only;
//! anything after `?` is parsed as a URL query (Azure carries `$rid`,
//! `$version` and `retry-after` there).

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
    /// `#`: matches the remaining levels, including none
    Rest,
}

/// A parsed topic pattern
#[derive(Debug, Clone, PartialEq)]
pub struct TopicTemplate {
    segments: Vec<Segment>,
}

/// Captured fields and query parameters of a matched topic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicMatch {
    fields: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl TopicMatch {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Split a topic into its path and parsed query parameters
pub fn split_query(topic: &str) -> (&str, HashMap<String, String>) {
    match topic.split_once('?') {
        Some((path, query)) => (
            path,
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (topic, HashMap::new()),
    }
}

impl TopicTemplate {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .trim_end_matches('/')
            .split('/')
            .map(|segment| {
                if segment == "#" {
                    Segment::Rest
                } else if let Some(name) = segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    Segment::Field(name.to_string())
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Match a full topic (path plus optional query)
    pub fn matches(&self, topic: &str) -> Option<TopicMatch> {
        let (path, query) = split_query(topic);
        let levels: Vec<&str> = path.trim_end_matches('/').split('/').collect();

        let mut fields = HashMap::new();
        let mut index = 0;
        for segment in &self.segments {
            match segment {
                Segment::Rest => {
                    return Some(TopicMatch { fields, query });
                }
                Segment::Literal(expected) => {
                    if levels.get(index) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Field(name) => {
                    let value = levels.get(index).filter(|v| !v.is_empty())?;
                    fields.insert(name.clone(), value.to_string());
                }
            }
            index += 1;
        }

        (index == levels.len()).then_some(TopicMatch { fields, query })
    }

    /// Fill the template's captures; unknown names render empty
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Field(name) => values
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_default(),
                Segment::Rest => "#".to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub static AZURE_TWIN_RESPONSE: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("$iothub/twin/res/{status}/"));
pub static AZURE_DESIRED_PATCH: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("$iothub/twin/PATCH/properties/desired/"));
pub static AZURE_METHOD: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("$iothub/methods/POST/{method}/"));
pub static DPS_RESPONSE: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("$dps/registrations/res/{status}/"));
pub static KAA_COMMAND: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("kp1/{app}/cex/{token}/command/{kind}/status"));
pub static KAA_RESULT: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("kp1/{app}/cex/{token}/result/{kind}"));
pub static BROKER_COMMAND: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("gateway/{client}/commands/{name}"));
pub static AWS_COMMAND: Lazy<TopicTemplate> =
    Lazy::new(|| TopicTemplate::parse("iot/{client}/command"));
