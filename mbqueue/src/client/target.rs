use std::time::Duration;

use crate::constants::defaults;

/// Destination of a request plus the timing policy applied to it
///
/// Two targets are considered to be the same endpoint if their host and port match.
/// The timeout and interval are not part of that identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// host name or IP address of the server
    pub host: String,
    /// TCP port of the server
    pub port: u16,
    /// how long to wait for a response to each attempt
    pub timeout: Duration,
    /// minimum spacing between consecutive requests to this host and port
    pub interval: Duration,
}

impl Target {
    /// Create a target using the default timeout and interval
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: defaults::RESPONSE_TIMEOUT,
            interval: defaults::TARGET_INTERVAL,
        }
    }

    /// Set the response timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Set the pacing interval
    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }

    /// true if both targets refer to the same host and port
    pub fn same_endpoint(&self, other: &Target) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new("0.0.0.0", 0)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_identity_ignores_timing() {
        let a = Target::new("10.0.0.1", 502);
        let b = Target::new("10.0.0.1", 502)
            .with_timeout(Duration::from_secs(9))
            .with_interval(Duration::from_secs(1));
        assert!(a.same_endpoint(&b));
        assert!(!a.same_endpoint(&Target::new("10.0.0.1", 503)));
        assert!(!a.same_endpoint(&Target::new("10.0.0.2", 502)));
    }
}
