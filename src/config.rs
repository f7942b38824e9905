use std::time::Duration;

use clap::Parser;

use crate::api::DEFAULT_MAX_BODY_BYTES;
use crate::broker::mailbox::{DEFAULT_CAPACITY, DEFAULT_PUBLISH_TIMEOUT};
use crate::broker::{OverflowPolicy, SinkConfig};

/// Topic-based publish/subscribe over HTTP.
///
/// Every flag can also be set through its `TOPICD_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "topicd", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "TOPICD_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Messages buffered per subscriber before the overflow policy applies
    #[arg(long, env = "TOPICD_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// What publishing does when a subscriber's buffer is full
    #[arg(long, env = "TOPICD_OVERFLOW", value_enum, default_value_t = OverflowPolicy::Block)]
    pub overflow: OverflowPolicy,

    /// How long a publish waits on a full buffer under `--overflow timeout`
    #[arg(long, env = "TOPICD_PUBLISH_TIMEOUT_MS", default_value_t = DEFAULT_PUBLISH_TIMEOUT.as_millis() as u64)]
    pub publish_timeout_ms: u64,

    /// Largest accepted `/publish` body
    #[arg(long, env = "TOPICD_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Start each subscribe stream with a confirmation line
    #[arg(long, env = "TOPICD_ANNOUNCE")]
    pub announce: bool,

    /// How long to wait for open streams to close on shutdown
    #[arg(long, env = "TOPICD_SHUTDOWN_GRACE_MS", default_value_t = 5000)]
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn sink(&self) -> SinkConfig {
        SinkConfig {
            capacity: self.capacity,
            overflow: self.overflow,
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["topicd"]).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert!(!config.announce);
        assert_eq!(config.max_body_bytes, 65536);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.sink(), SinkConfig::default());
    }

    #[test]
    fn test_overflow_flags() {
        let config = Config::try_parse_from([
            "topicd",
            "--overflow",
            "timeout",
            "--publish-timeout-ms",
            "250",
            "--capacity",
            "1",
        ])
        .unwrap();

        let sink = config.sink();
        assert_eq!(sink.overflow, OverflowPolicy::Timeout);
        assert_eq!(sink.publish_timeout, Duration::from_millis(250));
        assert_eq!(sink.capacity, 1);
    }

    #[test]
    fn test_policy_names_are_kebab_case() {
        let config = Config::try_parse_from(["topicd", "--overflow", "drop-oldest"]).unwrap();
        assert_eq!(config.overflow, OverflowPolicy::DropOldest);

        assert!(Config::try_parse_from(["topicd", "--overflow", "sometimes"]).is_err());
    }

    #[test]
    fn test_announce_flag() {
        let config = Config::try_parse_from(["topicd", "--announce", "--bind", "127.0.0.1:9000"]).unwrap();
        assert!(config.announce);
        assert_eq!(config.bind, "127.0.0.1:9000");
    }
}
