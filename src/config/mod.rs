//! Node configuration.
//!
//! A single JSON document describes the wiring, the bus, the LoRaWAN
//! session, the periodic uplink and the loop timing. Every field has a
//! default; an empty document `{}` yields the classic single-channel ABP
//! node (868.1 MHz, SF7, "Hello, world!" on port 1 every 120 s).
//!
//! # Example
//!
//! ```
//! use lmic_raspi::config::NodeConfig;
//!
//! let config = NodeConfig::from_json(r#"{ "schedule": { "tx_interval_secs": 60 } }"#).unwrap();
//! assert_eq!(config.schedule.tx_interval_secs, 60);
//! assert_eq!(config.uplink.payload, "Hello, world!");
//! ```

mod node;

pub use node::{
    BusConfig, ChannelPlan, ConfigError, NodeConfig, PinConfig, RadioConfig, ScheduleConfig,
    SessionConfig, UplinkConfig, MAX_GPIO,
};
