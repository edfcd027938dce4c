//! Core types shared by the MAC engine, the scheduler and gateway connections
//!
//! This module contains identifiers, configuration and the error taxonomy.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    Config,
    DevEui,
    DeviceClass,
    GatewayAntennaIdentifiers,
    GatewayIdentifiers,
};

/// Topic namespace version used by gateway front ends
pub const TOPIC_VERSION: &str = "v3";

/// Default capacity of per-connection queues
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Maximum length of the FOpts field in octets
pub const MAX_FOPTS_LEN: usize = 15;
