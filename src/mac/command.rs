//! MAC command model and FOpts wire format
//!
//! A command is its CID plus an optional payload. Uplink and downlink use
//! the same CID with different payloads, e.g. `PingSlotInfoReq` travels
//! uplink and the empty `PingSlotInfoAns` downlink under CID 0x10.

use serde::{Serialize, Deserialize};

use crate::core::{DeviceClass, Error, Result};

/// MAC command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cid {
    Reset,
    LinkCheck,
    LinkAdr,
    DutyCycle,
    RxParamSetup,
    DevStatus,
    RxTimingSetup,
    Rekey,
    DeviceTime,
    PingSlotInfo,
    PingSlotChannel,
    DeviceMode,
}

impl Cid {
    pub fn from_byte(cid: u8) -> Option<Self> {
        Some(match cid {
            0x01 => Cid::Reset,
            0x02 => Cid::LinkCheck,
            0x03 => Cid::LinkAdr,
            0x04 => Cid::DutyCycle,
            0x05 => Cid::RxParamSetup,
            0x06 => Cid::DevStatus,
            0x08 => Cid::RxTimingSetup,
            0x0B => Cid::Rekey,
            0x0D => Cid::DeviceTime,
            0x10 => Cid::PingSlotInfo,
            0x11 => Cid::PingSlotChannel,
            0x20 => Cid::DeviceMode,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Cid::Reset => 0x01,
            Cid::LinkCheck => 0x02,
            Cid::LinkAdr => 0x03,
            Cid::DutyCycle => 0x04,
            Cid::RxParamSetup => 0x05,
            Cid::DevStatus => 0x06,
            Cid::RxTimingSetup => 0x08,
            Cid::Rekey => 0x0B,
            Cid::DeviceTime => 0x0D,
            Cid::PingSlotInfo => 0x10,
            Cid::PingSlotChannel => 0x11,
            Cid::DeviceMode => 0x20,
        }
    }

    /// Name used in event names
    pub fn name(self) -> &'static str {
        match self {
            Cid::Reset => "reset",
            Cid::LinkCheck => "link_check",
            Cid::LinkAdr => "link_adr",
            Cid::DutyCycle => "duty_cycle",
            Cid::RxParamSetup => "rx_param_setup",
            Cid::DevStatus => "dev_status",
            Cid::RxTimingSetup => "rx_timing_setup",
            Cid::Rekey => "rekey",
            Cid::DeviceTime => "device_time",
            Cid::PingSlotInfo => "ping_slot_info",
            Cid::PingSlotChannel => "ping_slot_channel",
            Cid::DeviceMode => "device_mode",
        }
    }

    /// Payload length of the device-to-server command
    fn uplink_len(self) -> usize {
        match self {
            Cid::LinkCheck | Cid::DutyCycle | Cid::RxTimingSetup | Cid::DeviceTime => 0,
            Cid::DevStatus => 2,
            _ => 1,
        }
    }

    /// Payload length of the server-to-device command
    fn downlink_len(self) -> usize {
        match self {
            Cid::DevStatus | Cid::PingSlotInfo => 0,
            Cid::Reset | Cid::DutyCycle | Cid::RxTimingSetup | Cid::Rekey | Cid::DeviceMode => 1,
            Cid::LinkCheck => 2,
            Cid::LinkAdr | Cid::RxParamSetup | Cid::PingSlotChannel => 4,
            Cid::DeviceTime => 5,
        }
    }

    /// Builds the command with no payload
    pub fn mac_command(self) -> MacCommand {
        MacCommand { cid: self, payload: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetInd {
    pub minor_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetConf {
    pub minor_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheckAns {
    /// Link margin in dB above the demodulation floor
    pub margin: u8,
    pub gateway_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAdrReq {
    pub data_rate_index: u8,
    pub tx_power_index: u8,
    pub channel_mask: u16,
    pub channel_mask_control: u8,
    pub nb_trans: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAdrAns {
    pub power_ack: bool,
    pub data_rate_ack: bool,
    pub channel_mask_ack: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyCycleReq {
    pub max_duty_cycle: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxParamSetupReq {
    pub rx1_data_rate_offset: u8,
    pub rx2_data_rate_index: u8,
    /// Frequency in Hz, a multiple of 100
    pub rx2_frequency: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxParamSetupAns {
    pub rx1_data_rate_offset_ack: bool,
    pub rx2_data_rate_index_ack: bool,
    pub rx2_frequency_ack: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevStatusAns {
    /// 0 external power, 1-254 level, 255 unknown
    pub battery: u8,
    /// SNR of the last downlink in dB, -32..=31
    pub margin: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxTimingSetupReq {
    pub delay: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyInd {
    pub minor_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyConf {
    pub minor_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTimeAns {
    /// Seconds since the GPS epoch
    pub gps_seconds: u32,
    /// Fraction of a second in 1/256 s steps
    pub fractional: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotInfoReq {
    pub period: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotChannelReq {
    /// Frequency in Hz, a multiple of 100
    pub frequency: u64,
    pub data_rate_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotChannelAns {
    pub frequency_ack: bool,
    pub data_rate_index_ack: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModeInd {
    pub class: DeviceClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModeConf {
    pub class: DeviceClass,
}

/// Payload of a MAC command, one variant per payload-bearing command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacPayload {
    ResetInd(ResetInd),
    ResetConf(ResetConf),
    LinkCheckAns(LinkCheckAns),
    LinkAdrReq(LinkAdrReq),
    LinkAdrAns(LinkAdrAns),
    DutyCycleReq(DutyCycleReq),
    RxParamSetupReq(RxParamSetupReq),
    RxParamSetupAns(RxParamSetupAns),
    DevStatusAns(DevStatusAns),
    RxTimingSetupReq(RxTimingSetupReq),
    RekeyInd(RekeyInd),
    RekeyConf(RekeyConf),
    DeviceTimeAns(DeviceTimeAns),
    PingSlotInfoReq(PingSlotInfoReq),
    PingSlotChannelReq(PingSlotChannelReq),
    PingSlotChannelAns(PingSlotChannelAns),
    DeviceModeInd(DeviceModeInd),
    DeviceModeConf(DeviceModeConf),
}

impl MacPayload {
    pub fn cid(&self) -> Cid {
        match self {
            MacPayload::ResetInd(_) | MacPayload::ResetConf(_) => Cid::Reset,
            MacPayload::LinkCheckAns(_) => Cid::LinkCheck,
            MacPayload::LinkAdrReq(_) | MacPayload::LinkAdrAns(_) => Cid::LinkAdr,
            MacPayload::DutyCycleReq(_) => Cid::DutyCycle,
            MacPayload::RxParamSetupReq(_) | MacPayload::RxParamSetupAns(_) => Cid::RxParamSetup,
            MacPayload::DevStatusAns(_) => Cid::DevStatus,
            MacPayload::RxTimingSetupReq(_) => Cid::RxTimingSetup,
            MacPayload::RekeyInd(_) | MacPayload::RekeyConf(_) => Cid::Rekey,
            MacPayload::DeviceTimeAns(_) => Cid::DeviceTime,
            MacPayload::PingSlotInfoReq(_) => Cid::PingSlotInfo,
            MacPayload::PingSlotChannelReq(_) | MacPayload::PingSlotChannelAns(_) => Cid::PingSlotChannel,
            MacPayload::DeviceModeInd(_) | MacPayload::DeviceModeConf(_) => Cid::DeviceMode,
        }
    }
}

/// A MAC command: identifier plus optional payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCommand {
    pub cid: Cid,
    pub payload: Option<MacPayload>,
}

impl From<MacPayload> for MacCommand {
    fn from(payload: MacPayload) -> Self {
        MacCommand { cid: payload.cid(), payload: Some(payload) }
    }
}

fn flag(byte: u8, bit: u8) -> bool {
    byte & (1 << bit) != 0
}

fn encode_frequency(frequency: u64, out: &mut Vec<u8>) -> Result<()> {
    let units = frequency / 100;
    if frequency % 100 != 0 || units > 0x00FF_FFFF {
        return Err(Error::invalid_argument(format!("frequency {} Hz cannot be encoded", frequency)));
    }
    out.extend_from_slice(&(units as u32).to_le_bytes()[..3]);
    Ok(())
}

fn encode_class(class: DeviceClass) -> Result<u8> {
    match class {
        DeviceClass::A => Ok(0x00),
        DeviceClass::C => Ok(0x02),
        DeviceClass::B => Err(Error::invalid_argument("class B is not a device mode")),
    }
}

fn decode_class(byte: u8) -> Result<DeviceClass> {
    match byte {
        0x00 => Ok(DeviceClass::A),
        0x02 => Ok(DeviceClass::C),
        _ => Err(Error::invalid_argument(format!("invalid device mode 0x{:02X}", byte))),
    }
}

impl MacCommand {
    /// Encodes a server-to-device command as FOpts octets
    pub fn encode_downlink(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.cid.to_byte()];
        match (self.cid, &self.payload) {
            (Cid::DevStatus, None) | (Cid::PingSlotInfo, None) => {}
            (Cid::Reset, Some(MacPayload::ResetConf(p))) => out.push(p.minor_version),
            (Cid::LinkCheck, Some(MacPayload::LinkCheckAns(p))) => {
                out.extend_from_slice(&[p.margin, p.gateway_count])
            }
            (Cid::LinkAdr, Some(MacPayload::LinkAdrReq(p))) => {
                out.push((p.data_rate_index & 0x0F) << 4 | (p.tx_power_index & 0x0F));
                out.extend_from_slice(&p.channel_mask.to_le_bytes());
                out.push((p.channel_mask_control & 0x07) << 4 | (p.nb_trans & 0x0F));
            }
            (Cid::DutyCycle, Some(MacPayload::DutyCycleReq(p))) => out.push(p.max_duty_cycle & 0x0F),
            (Cid::RxParamSetup, Some(MacPayload::RxParamSetupReq(p))) => {
                out.push((p.rx1_data_rate_offset & 0x07) << 4 | (p.rx2_data_rate_index & 0x0F));
                encode_frequency(p.rx2_frequency, &mut out)?;
            }
            (Cid::RxTimingSetup, Some(MacPayload::RxTimingSetupReq(p))) => out.push(p.delay & 0x0F),
            (Cid::Rekey, Some(MacPayload::RekeyConf(p))) => out.push(p.minor_version & 0x0F),
            (Cid::DeviceTime, Some(MacPayload::DeviceTimeAns(p))) => {
                out.extend_from_slice(&p.gps_seconds.to_le_bytes());
                out.push(p.fractional);
            }
            (Cid::PingSlotChannel, Some(MacPayload::PingSlotChannelReq(p))) => {
                encode_frequency(p.frequency, &mut out)?;
                out.push(p.data_rate_index & 0x0F);
            }
            (Cid::DeviceMode, Some(MacPayload::DeviceModeConf(p))) => out.push(encode_class(p.class)?),
            (cid, payload) => {
                return Err(Error::invalid_argument(format!(
                    "{:?} with payload {:?} is not a downlink command",
                    cid, payload
                )))
            }
        }
        debug_assert_eq!(out.len(), 1 + self.cid.downlink_len());
        Ok(out)
    }

    /// Decodes device-to-server commands from FOpts or a port 0 payload.
    ///
    /// Decoding stops with an error at the first unknown CID, since the
    /// length of its payload and so the start of the next command is unknown.
    pub fn decode_uplink(mut bytes: &[u8]) -> Result<Vec<MacCommand>> {
        let mut commands = Vec::new();
        while let Some((&cid_byte, rest)) = bytes.split_first() {
            let cid = Cid::from_byte(cid_byte)
                .ok_or_else(|| Error::invalid_argument(format!("unknown CID 0x{:02X}", cid_byte)))?;
            let len = cid.uplink_len();
            if rest.len() < len {
                return Err(Error::invalid_argument(format!("truncated {:?} payload", cid)));
            }
            let (pld, rest) = rest.split_at(len);
            let payload = match cid {
                Cid::LinkCheck | Cid::DutyCycle | Cid::RxTimingSetup | Cid::DeviceTime => None,
                Cid::Reset => Some(MacPayload::ResetInd(ResetInd { minor_version: pld[0] & 0x0F })),
                Cid::LinkAdr => Some(MacPayload::LinkAdrAns(LinkAdrAns {
                    power_ack: flag(pld[0], 2),
                    data_rate_ack: flag(pld[0], 1),
                    channel_mask_ack: flag(pld[0], 0),
                })),
                Cid::RxParamSetup => Some(MacPayload::RxParamSetupAns(RxParamSetupAns {
                    rx1_data_rate_offset_ack: flag(pld[0], 2),
                    rx2_data_rate_index_ack: flag(pld[0], 1),
                    rx2_frequency_ack: flag(pld[0], 0),
                })),
                Cid::DevStatus => {
                    // 6-bit two's complement
                    let margin = ((pld[1] & 0x3F) << 2) as i8 >> 2;
                    Some(MacPayload::DevStatusAns(DevStatusAns { battery: pld[0], margin }))
                }
                Cid::Rekey => Some(MacPayload::RekeyInd(RekeyInd { minor_version: pld[0] & 0x0F })),
                Cid::PingSlotInfo => Some(MacPayload::PingSlotInfoReq(PingSlotInfoReq { period: pld[0] & 0x07 })),
                Cid::PingSlotChannel => Some(MacPayload::PingSlotChannelAns(PingSlotChannelAns {
                    data_rate_index_ack: flag(pld[0], 1),
                    frequency_ack: flag(pld[0], 0),
                })),
                Cid::DeviceMode => Some(MacPayload::DeviceModeInd(DeviceModeInd { class: decode_class(pld[0])? })),
            };
            commands.push(MacCommand { cid, payload });
            bytes = rest;
        }
        Ok(commands)
    }
}
