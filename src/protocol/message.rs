use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Serialize, Deserialize};
use crate::core::{DeviceClass, Error, GatewayAntennaIdentifiers, GatewayIdentifiers, Result};

/// Modulation and its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRate {
    /// LoRa modulation
    LoRa {
        /// Spreading factor (7-12)
        spreading_factor: u8,
        /// Bandwidth in Hz
        bandwidth: u32,
    },
    /// FSK modulation
    Fsk {
        /// Bit rate in bits per second
        bit_rate: u32,
    },
}

/// Concrete transmission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxSettings {
    /// Modulation
    pub data_rate: DataRate,
    /// Data rate index within the frequency plan
    pub data_rate_index: u8,
    /// LoRa coding rate, e.g. "4/5"
    pub coding_rate: String,
    /// Frequency in Hz
    pub frequency: u64,
    /// Transmit power in dBm
    pub tx_power: i32,
    /// Concentrator timestamp in microseconds; `None` means immediately
    pub timestamp: Option<u32>,
    /// Downlinks are sent with inverted polarization
    pub invert_polarization: bool,
}

/// Metadata of one reception of an uplink by a gateway antenna
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxMetadata {
    pub gateway_ids: GatewayIdentifiers,
    pub antenna_index: u32,
    /// Concentrator timestamp in microseconds
    pub timestamp: u32,
    pub rssi: f32,
    pub snr: f32,
    /// Opaque token set by the gateway connection on reception
    pub uplink_token: Vec<u8>,
}

impl RxMetadata {
    pub fn antenna(&self) -> GatewayAntennaIdentifiers {
        GatewayAntennaIdentifiers::new(self.gateway_ids.clone(), self.antenna_index)
    }
}

/// Uplink message as received by a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkMessage {
    /// PHYPayload
    pub raw_payload: Vec<u8>,
    /// Transmission settings the device used
    pub settings: TxSettings,
    /// One entry per receiving antenna
    pub rx_metadata: Vec<RxMetadata>,
    /// Set by the gateway connection when the uplink is surfaced
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_time")]
    pub received_at: Option<SystemTime>,
}

impl UplinkMessage {
    /// Returns the reception with the best SNR
    pub fn best_rx_metadata(&self) -> Option<&RxMetadata> {
        self.rx_metadata
            .iter()
            .max_by(|a, b| a.snr.total_cmp(&b.snr))
    }
}

/// Gateway status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GatewayStatus {
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_time")]
    pub time: Option<SystemTime>,
    /// Gateway IP addresses
    pub ip: Vec<String>,
    /// Software and hardware versions
    pub versions: BTreeMap<String, String>,
    /// Free-form metrics
    pub metrics: BTreeMap<String, f32>,
}

/// Result reported by a gateway for a downlink transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxAckResult {
    Success,
    UnknownError,
    TooLate,
    TooEarly,
    CollisionPacket,
    CollisionBeacon,
    TxFrequency,
    TxPower,
    GpsUnlocked,
}

/// Transmit acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAcknowledgment {
    pub correlation_ids: Vec<String>,
    pub result: TxAckResult,
}

/// Priority of a downlink in the gateway's schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxSchedulePriority {
    Lowest,
    Low,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Highest,
}

/// RX1 delay in seconds; 0 is interpreted as 1 second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxDelay(pub u8);

impl RxDelay {
    /// Longest RX1 delay a device supports, in seconds
    pub const MAX: u8 = 15;

    pub fn is_valid(&self) -> bool {
        self.0 <= Self::MAX
    }

    pub fn seconds(&self) -> u32 {
        u32::from(self.0.max(1))
    }
}

impl Default for RxDelay {
    fn default() -> Self {
        RxDelay(1)
    }
}

/// Transmission request; the concrete settings are computed by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    pub class: DeviceClass,
    pub priority: TxSchedulePriority,
    pub rx1_delay: RxDelay,
    pub rx1_data_rate_index: u8,
    /// RX1 frequency in Hz; 0 disables RX1
    pub rx1_frequency: u64,
    pub rx2_data_rate_index: u8,
    pub rx2_frequency: u64,
    pub frequency_plan_id: String,
}

/// How a downlink is to be transmitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownlinkSettings {
    /// Scheduling is left to the server
    Request(Option<TxRequest>),
    /// Settings already computed
    Scheduled(TxSettings),
}

/// Downlink message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkMessage {
    pub raw_payload: Vec<u8>,
    pub settings: Option<DownlinkSettings>,
}

impl DownlinkMessage {
    /// Returns the transmission request, rejecting anything else.
    pub fn tx_request(&self) -> Result<&TxRequest> {
        match &self.settings {
            Some(DownlinkSettings::Scheduled(_)) => Err(Error::invalid_argument(
                "server-computed scheduling not supported at this boundary",
            )),
            Some(DownlinkSettings::Request(Some(request))) => Ok(request),
            Some(DownlinkSettings::Request(None)) | None => {
                Err(Error::invalid_argument("missing transmission request"))
            }
        }
    }
}

/// Target of a downlink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownlinkPath {
    /// Relative to a prior reception, see [`crate::protocol::token`]
    UplinkToken(Vec<u8>),
    /// A fixed antenna without a reception of record
    Fixed(GatewayAntennaIdentifiers),
}

/// Envelope delivered to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayDown {
    pub downlink_message: DownlinkMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TxRequest {
        TxRequest {
            class: DeviceClass::A,
            priority: TxSchedulePriority::Normal,
            rx1_delay: RxDelay(1),
            rx1_data_rate_index: 5,
            rx1_frequency: 868_100_000,
            rx2_data_rate_index: 0,
            rx2_frequency: 869_525_000,
            frequency_plan_id: "EU_863_870".to_string(),
        }
    }

    #[test]
    fn test_tx_request_variants() {
        let mut msg = DownlinkMessage {
            raw_payload: vec![0x01],
            settings: Some(DownlinkSettings::Request(Some(request()))),
        };
        assert_eq!(msg.tx_request().unwrap().rx1_frequency, 868_100_000);

        msg.settings = Some(DownlinkSettings::Request(None));
        assert!(msg.tx_request().unwrap_err().is_invalid_argument());

        msg.settings = None;
        assert!(msg.tx_request().unwrap_err().is_invalid_argument());

        msg.settings = Some(DownlinkSettings::Scheduled(TxSettings {
            data_rate: DataRate::LoRa { spreading_factor: 7, bandwidth: 125_000 },
            data_rate_index: 5,
            coding_rate: "4/5".to_string(),
            frequency: 869_525_000,
            tx_power: 14,
            timestamp: None,
            invert_polarization: true,
        }));
        assert!(msg.tx_request().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_rx_delay_seconds() {
        assert_eq!(RxDelay(0).seconds(), 1);
        assert_eq!(RxDelay(1).seconds(), 1);
        assert_eq!(RxDelay(5).seconds(), 5);
    }

    #[test]
    fn test_best_rx_metadata() {
        let rx = |snr: f32, antenna_index: u32| RxMetadata {
            gateway_ids: GatewayIdentifiers::new("gw"),
            antenna_index,
            timestamp: 0,
            rssi: -100.0,
            snr,
            uplink_token: vec![],
        };
        let up = UplinkMessage {
            raw_payload: vec![],
            settings: TxSettings {
                data_rate: DataRate::LoRa { spreading_factor: 7, bandwidth: 125_000 },
                data_rate_index: 5,
                coding_rate: "4/5".to_string(),
                frequency: 868_100_000,
                tx_power: 14,
                timestamp: Some(0),
                invert_polarization: false,
            },
            rx_metadata: vec![rx(-3.0, 0), rx(7.5, 1), rx(2.0, 2)],
            received_at: None,
        };
        assert_eq!(up.best_rx_metadata().unwrap().antenna_index, 1);
    }

    #[test]
    fn test_gateway_down_serialization() {
        let down = GatewayDown {
            downlink_message: DownlinkMessage {
                raw_payload: vec![0xde, 0xad],
                settings: Some(DownlinkSettings::Request(Some(request()))),
            },
        };
        let encoded = bincode::serialize(&down).unwrap();
        let decoded: GatewayDown = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, down);
    }
}
