//! LoRaWAN network server core
//!
//! This library interprets MAC commands carried in device uplinks, keeps
//! per-device MAC state and schedules the resulting downlinks through the
//! live connections of the gateways that received the uplink.
pub mod core;
pub mod mac;
pub mod network;
pub mod protocol;
pub mod scheduling;
pub mod server;
pub mod util;

// Re-export commonly used items
pub use core::{Config, DevEui, Error, Result};
pub use mac::{DeviceTable, EndDevice, Event, MacCommand, MacState};
pub use network::{Frontend, GatewayServer, Session};
pub use scheduling::{DownlinkScheduler, ScheduleResult};
pub use server::NetworkServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
