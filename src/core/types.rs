use std::fmt;
use std::time::Duration;

use serde::{Serialize, Deserialize};

/// Identifies a gateway by its registry ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayIdentifiers {
    /// The gateway ID as registered in the identity registry
    pub gateway_id: String,
    /// Optional hardware EUI of the gateway
    pub eui: Option<[u8; 8]>,
}

impl GatewayIdentifiers {
    /// Creates identifiers without an EUI
    pub fn new(gateway_id: impl Into<String>) -> Self {
        GatewayIdentifiers {
            gateway_id: gateway_id.into(),
            eui: None,
        }
    }

    /// Returns the unique ID used in topics and registry lookups
    pub fn uid(&self) -> &str {
        &self.gateway_id
    }
}

impl fmt::Display for GatewayIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gateway_id)
    }
}

/// Identifies one antenna of a gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayAntennaIdentifiers {
    pub gateway_ids: GatewayIdentifiers,
    pub antenna_index: u32,
}

impl GatewayAntennaIdentifiers {
    pub fn new(gateway_ids: GatewayIdentifiers, antenna_index: u32) -> Self {
        GatewayAntennaIdentifiers { gateway_ids, antenna_index }
    }
}

/// 64-bit end device EUI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevEui(pub [u8; 8]);

impl fmt::Display for DevEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// LoRaWAN device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    A,
    B,
    C,
}

impl Default for DeviceClass {
    fn default() -> Self {
        DeviceClass::A
    }
}

/// Configuration for the gateway server and network server core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capacity of each connection's uplink queue
    pub up_buffer: usize,
    /// Capacity of each connection's status queue
    pub status_buffer: usize,
    /// Capacity of each connection's transmit acknowledgment queue
    pub tx_ack_buffer: usize,
    /// Capacity of each connection's downlink queue
    pub downlink_buffer: usize,
    /// How long scheduling waits on a full downlink queue before failing
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub downlink_timeout: Duration,
    /// Maximum octets of MAC commands piggybacked in FOpts
    pub fopts_budget: usize,
    /// Number of consumed class A uplink tokens remembered per connection
    pub recent_token_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            up_buffer: super::DEFAULT_QUEUE_CAPACITY,
            status_buffer: super::DEFAULT_QUEUE_CAPACITY,
            tx_ack_buffer: super::DEFAULT_QUEUE_CAPACITY,
            downlink_buffer: super::DEFAULT_QUEUE_CAPACITY,
            downlink_timeout: Duration::from_millis(500),
            fopts_budget: super::MAX_FOPTS_LEN,
            recent_token_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_eui_display() {
        let eui = DevEui([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01]);
        assert_eq!(eui.to_string(), "70B3D57ED0000001");
    }

    #[test]
    fn test_gateway_uid() {
        let ids = GatewayIdentifiers::new("test-gateway");
        assert_eq!(ids.uid(), "test-gateway");
        assert_eq!(ids.to_string(), "test-gateway");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.downlink_timeout, config.downlink_timeout);
        assert_eq!(decoded.fopts_budget, 15);
        assert_eq!(decoded.downlink_buffer, config.downlink_buffer);
    }
}
