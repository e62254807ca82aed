//! Configuration for the Tapline core
//!
//! Both structures are built programmatically by the host and validated at
//! core construction. Kafka client keys not covered by the named fields go
//! through the free-form `extra` bag.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Decode pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Number of decode worker threads
    pub decode_threads: usize,
    /// Capacity of each raw-message ring (power of two recommended)
    pub raw_queue_size: usize,
    /// Capacity of each event ring
    pub evt_queue_size: usize,
    /// Size of the per-worker decode output buffer handed to plugins
    pub decode_buf_size: usize,
    /// Aggregate raw occupancy ratio at which partitions are paused
    pub high_watermark_ratio: f64,
    /// Aggregate raw occupancy ratio at which resumption is requested
    pub low_watermark_ratio: f64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            decode_threads: 4,
            raw_queue_size: 8192,
            evt_queue_size: 8192,
            decode_buf_size: 64 * 1024,
            high_watermark_ratio: 0.9,
            low_watermark_ratio: 0.5,
        }
    }
}

impl DecodeConfig {
    /// Validate field ranges. Called by the core constructor.
    pub fn validate(&self) -> Result<()> {
        if self.decode_threads == 0 {
            return Err(Error::Config("decode_threads must be >= 1".to_string()));
        }
        if self.raw_queue_size == 0 || self.evt_queue_size == 0 {
            return Err(Error::Config("queue sizes must be >= 1".to_string()));
        }
        if self.decode_buf_size == 0 {
            return Err(Error::Config("decode_buf_size must be >= 1".to_string()));
        }
        if !(self.high_watermark_ratio > 0.0 && self.high_watermark_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "high_watermark_ratio out of range: {}",
                self.high_watermark_ratio
            )));
        }
        if !(self.low_watermark_ratio > 0.0 && self.low_watermark_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "low_watermark_ratio out of range: {}",
                self.low_watermark_ratio
            )));
        }
        if self.low_watermark_ratio > self.high_watermark_ratio {
            return Err(Error::Config(
                "low_watermark_ratio must not exceed high_watermark_ratio".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kafka client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Initial broker list (`bootstrap.servers`)
    pub bootstrap_servers: String,
    /// Consumer group id (`group.id`)
    pub group_id: String,
    /// Offset auto-commit (`enable.auto.commit`)
    pub enable_auto_commit: bool,
    /// Behaviour without a committed offset (`auto.offset.reset`)
    pub auto_offset_reset: String,
    /// Additional client settings passed through verbatim
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "tapline".to_string(),
            enable_auto_commit: true,
            auto_offset_reset: "earliest".to_string(),
            extra: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Validate field ranges. Bad key *values* are the client library's to
    /// reject; only structural problems are caught here.
    pub fn validate(&self) -> Result<()> {
        match self.auto_offset_reset.as_str() {
            "" | "earliest" | "latest" | "smallest" | "largest" | "beginning" | "end"
            | "error" => Ok(()),
            other => Err(Error::Config(format!(
                "auto_offset_reset not recognised: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_config_defaults_validate() {
        assert!(DecodeConfig::default().validate().is_ok());
        assert!(KafkaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_decode_config_rejects_zero_threads() {
        let cfg = DecodeConfig {
            decode_threads: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_decode_config_rejects_inverted_watermarks() {
        let cfg = DecodeConfig {
            high_watermark_ratio: 0.4,
            low_watermark_ratio: 0.6,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_decode_config_rejects_bad_ratio() {
        let cfg = DecodeConfig {
            high_watermark_ratio: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_kafka_config_rejects_unknown_offset_reset() {
        let cfg = KafkaConfig {
            auto_offset_reset: "sideways".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_kafka_config_roundtrips_through_serde() {
        let mut cfg = KafkaConfig::default();
        cfg.extra
            .insert("fetch.min.bytes".to_string(), "1024".to_string());
        let json = serde_json::to_string(&cfg).unwrap();
        let back: KafkaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extra.get("fetch.min.bytes").unwrap(), "1024");
        assert_eq!(back.group_id, "tapline");
    }
}
