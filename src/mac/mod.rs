//! MAC layer module
//!
//! This module contains the MAC command model and wire format, per-device
//! MAC state, the command engine and the device table.

pub mod command;
pub mod device_table;
pub mod engine;
pub mod event;
pub mod state;

pub use self::command::{Cid, MacCommand, MacPayload};
pub use self::device_table::DeviceTable;
pub use self::engine::{handle, UplinkContext};
pub use self::event::{BroadcastSink, Event, EventSink};
pub use self::state::{DevStatus, DownlinkCommands, EndDevice, MacParameters, MacState};
