use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound on a telnet TCP connect attempt.
    pub connect_timeout_ms: u64,
    /// Quiet period after which a pending autocomplete expectation is dropped.
    pub autocomplete_settle_ms: u64,
    /// Baud rate used when a serial device is selected.
    pub serial_baud_rate: u32,
    /// Size of the per-read buffer for transport reader tasks.
    pub read_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            autocomplete_settle_ms: 500,
            serial_baud_rate: 115_200,
            read_buffer_size: 4096,
        }
    }
}

impl RelayConfig {
    /// Defaults overlaid with `TERMRELAY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "TERMRELAY_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "TERMRELAY_AUTOCOMPLETE_SETTLE_MS") {
            config.autocomplete_settle_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "TERMRELAY_SERIAL_BAUD") {
            config.serial_baud_rate = v;
        }
        if let Some(v) = parse_var(&lookup, "TERMRELAY_READ_BUFFER") {
            config.read_buffer_size = v;
        }
        config
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn autocomplete_settle(&self) -> Duration {
        Duration::from_millis(self.autocomplete_settle_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring {}: unparsable value {:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.autocomplete_settle(), Duration::from_millis(500));
        assert_eq!(config.serial_baud_rate, 115_200);
    }

    #[test]
    fn test_env_overlay() {
        let config = RelayConfig::from_lookup(|key| match key {
            "TERMRELAY_SERIAL_BAUD" => Some("9600".to_string()),
            "TERMRELAY_CONNECT_TIMEOUT_MS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.serial_baud_rate, 9600);
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_partial_json() {
        let config: RelayConfig = serde_json::from_str(r#"{"autocomplete_settle_ms": 50}"#).unwrap();
        assert_eq!(config.autocomplete_settle_ms, 50);
        assert_eq!(config.read_buffer_size, 4096);
    }
}
