//! Gateway protocol module
//!
//! This module defines the messages exchanged with gateways, their framing
//! and the uplink token codec.

pub mod codec;
pub mod message;
pub mod route;
pub mod token;

pub use self::codec::MessageCodec;
pub use self::message::{
    DataRate, DownlinkMessage, DownlinkPath, DownlinkSettings, GatewayDown, GatewayStatus,
    RxDelay, RxMetadata, TxAckResult, TxAcknowledgment, TxRequest, TxSchedulePriority,
    TxSettings, UplinkMessage,
};
pub use self::route::Route;
pub use self::token::UplinkTokenData;

/// Maximum encoded envelope size in bytes
pub const MAX_MESSAGE_SIZE: usize = 65507;
