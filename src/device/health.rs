//! Radio health policies: firmware gate and packet loss

/// Consecutive failed telemetry publishes that force a restart
pub const PACKET_LOSS_THRESHOLD: u32 = 3;

/// Oldest radio firmware (major, minor) the gateway supports
pub const MIN_FIRMWARE: (u32, u32) = (2, 2);

/// Counts consecutive publish failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLossCounter {
    consecutive: u32,
    threshold: u32,
}

impl Default for PacketLossCounter {
    fn default() -> Self {
        Self::new(PACKET_LOSS_THRESHOLD)
    }
}

impl PacketLossCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failure; true once the threshold is reached, which also resets the count
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            self.consecutive = 0;
            return true;
        }
        false
    }
}

/// Parse `major.minor[.patch]`, ignoring anything after the numbers
pub fn parse_firmware_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts
        .next()
        .map(|p| {
            p.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    Some((major, minor, patch))
}

/// Whether the radio firmware meets the minimum version
pub fn firmware_supported(version: &str) -> bool {
    match parse_firmware_version(version) {
        Some((major, minor, _)) => (major, minor) >= MIN_FIRMWARE,
        None => false,
    }
}
