//! MAC command engine
//!
//! Applies one device-to-server MAC command to a device's MAC state. Device
//! initiated requests queue an answer and emit a request and an answer
//! event; answers to server requests settle the matching pending request.
//! A failed command leaves the state untouched and emits nothing.

use std::time::SystemTime;

use tracing::debug;

use crate::core::{Error, Result};
use crate::protocol::{DataRate, RxDelay, UplinkMessage};
use crate::util::to_gps_time;
use super::command::*;
use super::event::{Event, EventSink};
use super::state::{DevStatus, MacState};

/// Highest LoRaWAN 1.x minor version the server implements
const SERVER_MINOR_VERSION: u8 = 1;

/// Reception facts of the uplink that carried the commands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UplinkContext {
    pub gateway_count: usize,
    pub best_snr: Option<f32>,
    pub spreading_factor: Option<u8>,
    pub received_at: Option<SystemTime>,
}

impl UplinkContext {
    pub fn from_uplink(up: &UplinkMessage) -> Self {
        let spreading_factor = match up.settings.data_rate {
            DataRate::LoRa { spreading_factor, .. } => Some(spreading_factor),
            DataRate::Fsk { .. } => None,
        };
        UplinkContext {
            gateway_count: up.rx_metadata.len(),
            best_snr: up.best_rx_metadata().map(|rx| rx.snr),
            spreading_factor,
            received_at: up.received_at,
        }
    }
}

/// Demodulation floor in dB of a LoRa spreading factor
fn demodulation_floor(spreading_factor: u8) -> Option<f32> {
    match spreading_factor {
        7 => Some(-7.5),
        8 => Some(-10.0),
        9 => Some(-12.5),
        10 => Some(-15.0),
        11 => Some(-17.5),
        12 => Some(-20.0),
        _ => None,
    }
}

fn event_name(cid: Cid, suffix: &str) -> String {
    format!("ns.mac.{}.{}", cid.name(), suffix)
}

fn emit(sink: &mut dyn EventSink, cid: Cid, suffix: &str, data: Option<MacPayload>) {
    let event = Event::new(event_name(cid, suffix), data);
    debug!(cid = ?cid, event = event.name(), "MAC event");
    sink.publish(event);
}

/// Returns the payload of the expected variant, `None` when absent
macro_rules! payload {
    ($command:expr, $variant:ident) => {
        match &$command.payload {
            None => None,
            Some(MacPayload::$variant(pld)) => Some(*pld),
            Some(other) => {
                return Err(Error::invalid_argument(format!(
                    "{:?} carries a {:?} payload",
                    $command.cid,
                    other.cid()
                )))
            }
        }
    };
}

fn require<T>(payload: Option<T>, cid: Cid) -> Result<T> {
    payload.ok_or_else(|| Error::missing_payload(format!("{:?} requires a payload", cid)))
}

fn require_empty(command: &MacCommand) -> Result<()> {
    match &command.payload {
        None => Ok(()),
        Some(other) => Err(Error::invalid_argument(format!(
            "{:?} carries an unexpected {:?} payload",
            command.cid,
            other.cid()
        ))),
    }
}

/// Handles a device-to-server MAC command
pub fn handle(
    state: &mut MacState,
    command: &MacCommand,
    ctx: &UplinkContext,
    sink: &mut dyn EventSink,
) -> Result<()> {
    match command.cid {
        Cid::Reset => handle_reset_ind(state, payload!(command, ResetInd), sink),
        Cid::LinkCheck => {
            require_empty(command)?;
            handle_link_check_req(state, ctx, sink)
        }
        Cid::LinkAdr => handle_link_adr_ans(state, payload!(command, LinkAdrAns), sink),
        Cid::DutyCycle => {
            require_empty(command)?;
            handle_duty_cycle_ans(state, sink)
        }
        Cid::RxParamSetup => handle_rx_param_setup_ans(state, payload!(command, RxParamSetupAns), sink),
        Cid::DevStatus => handle_dev_status_ans(state, payload!(command, DevStatusAns), sink),
        Cid::RxTimingSetup => {
            require_empty(command)?;
            handle_rx_timing_setup_ans(state, sink)
        }
        Cid::Rekey => handle_rekey_ind(state, payload!(command, RekeyInd), sink),
        Cid::DeviceTime => {
            require_empty(command)?;
            handle_device_time_req(state, ctx, sink)
        }
        Cid::PingSlotInfo => handle_ping_slot_info_req(state, payload!(command, PingSlotInfoReq), sink),
        Cid::PingSlotChannel => {
            handle_ping_slot_channel_ans(state, payload!(command, PingSlotChannelAns), sink)
        }
        Cid::DeviceMode => handle_device_mode_ind(state, payload!(command, DeviceModeInd), sink),
    }
}

/// Queues the answer of a device-initiated request and emits both events
fn answer(state: &mut MacState, sink: &mut dyn EventSink, request: MacCommand, answer: MacCommand) {
    let cid = request.cid;
    emit(sink, cid, "request", request.payload);
    emit(sink, cid, "answer", answer.payload);
    state.queued_responses.push(answer);
}

fn handle_reset_ind(state: &mut MacState, pld: Option<ResetInd>, sink: &mut dyn EventSink) -> Result<()> {
    let pld = require(pld, Cid::Reset)?;
    state.current_parameters = state.default_parameters.clone();
    state.desired_parameters = state.default_parameters.clone();
    state.pending_requests.clear();
    let conf = ResetConf { minor_version: pld.minor_version.min(SERVER_MINOR_VERSION) };
    answer(state, sink, MacPayload::ResetInd(pld).into(), MacPayload::ResetConf(conf).into());
    Ok(())
}

fn handle_link_check_req(state: &mut MacState, ctx: &UplinkContext, sink: &mut dyn EventSink) -> Result<()> {
    let (snr, floor) = match (ctx.best_snr, ctx.spreading_factor.and_then(demodulation_floor)) {
        (Some(snr), Some(floor)) if ctx.gateway_count > 0 => (snr, floor),
        _ => return Err(Error::failed_precondition("LinkCheckReq without LoRa reception metadata")),
    };
    let margin = (snr - floor).clamp(0.0, 254.0) as u8;
    let gateway_count = ctx.gateway_count.min(usize::from(u8::MAX)) as u8;
    let ans = LinkCheckAns { margin, gateway_count };
    answer(state, sink, Cid::LinkCheck.mac_command(), MacPayload::LinkCheckAns(ans).into());
    Ok(())
}

fn handle_rekey_ind(state: &mut MacState, pld: Option<RekeyInd>, sink: &mut dyn EventSink) -> Result<()> {
    let pld = require(pld, Cid::Rekey)?;
    let conf = RekeyConf { minor_version: pld.minor_version.min(SERVER_MINOR_VERSION) };
    answer(state, sink, MacPayload::RekeyInd(pld).into(), MacPayload::RekeyConf(conf).into());
    Ok(())
}

fn handle_device_time_req(state: &mut MacState, ctx: &UplinkContext, sink: &mut dyn EventSink) -> Result<()> {
    let received_at = ctx
        .received_at
        .ok_or_else(|| Error::failed_precondition("DeviceTimeReq without reception time"))?;
    let (gps_seconds, fractional) = to_gps_time(received_at)?;
    let ans = DeviceTimeAns { gps_seconds, fractional };
    answer(state, sink, Cid::DeviceTime.mac_command(), MacPayload::DeviceTimeAns(ans).into());
    Ok(())
}

fn handle_ping_slot_info_req(
    state: &mut MacState,
    pld: Option<PingSlotInfoReq>,
    sink: &mut dyn EventSink,
) -> Result<()> {
    let pld = require(pld, Cid::PingSlotInfo)?;
    state.ping_slot_periodicity = Some(pld.period);
    answer(state, sink, MacPayload::PingSlotInfoReq(pld).into(), Cid::PingSlotInfo.mac_command());
    Ok(())
}

fn handle_device_mode_ind(state: &mut MacState, pld: Option<DeviceModeInd>, sink: &mut dyn EventSink) -> Result<()> {
    let pld = require(pld, Cid::DeviceMode)?;
    state.device_class = pld.class;
    let conf = DeviceModeConf { class: pld.class };
    answer(state, sink, MacPayload::DeviceModeInd(pld).into(), MacPayload::DeviceModeConf(conf).into());
    Ok(())
}

/// Takes the pending request an answer refers to
fn settle(state: &mut MacState, cid: Cid) -> Result<MacCommand> {
    state
        .take_pending(&cid.mac_command())
        .ok_or_else(|| Error::failed_precondition(format!("{:?} answer without pending request", cid)))
}

fn emit_answer(sink: &mut dyn EventSink, cid: Cid, accepted: bool, data: Option<MacPayload>) {
    emit(sink, cid, if accepted { "answer.accept" } else { "answer.reject" }, data);
}

fn handle_link_adr_ans(state: &mut MacState, pld: Option<LinkAdrAns>, sink: &mut dyn EventSink) -> Result<()> {
    let pld = require(pld, Cid::LinkAdr)?;
    let request = settle(state, Cid::LinkAdr)?;
    let accepted = pld.power_ack && pld.data_rate_ack && pld.channel_mask_ack;
    if let (true, Some(MacPayload::LinkAdrReq(req))) = (accepted, request.payload) {
        let params = &mut state.current_parameters;
        params.adr_data_rate_index = req.data_rate_index;
        params.adr_tx_power_index = req.tx_power_index;
        params.adr_nb_trans = req.nb_trans;
        params.channel_mask = req.channel_mask;
    }
    emit_answer(sink, Cid::LinkAdr, accepted, Some(MacPayload::LinkAdrAns(pld)));
    Ok(())
}

fn handle_duty_cycle_ans(state: &mut MacState, sink: &mut dyn EventSink) -> Result<()> {
    let request = settle(state, Cid::DutyCycle)?;
    if let Some(MacPayload::DutyCycleReq(req)) = request.payload {
        state.current_parameters.max_duty_cycle = req.max_duty_cycle;
    }
    emit_answer(sink, Cid::DutyCycle, true, None);
    Ok(())
}

fn handle_rx_param_setup_ans(
    state: &mut MacState,
    pld: Option<RxParamSetupAns>,
    sink: &mut dyn EventSink,
) -> Result<()> {
    let pld = require(pld, Cid::RxParamSetup)?;
    let request = settle(state, Cid::RxParamSetup)?;
    let accepted = pld.rx1_data_rate_offset_ack && pld.rx2_data_rate_index_ack && pld.rx2_frequency_ack;
    if let (true, Some(MacPayload::RxParamSetupReq(req))) = (accepted, request.payload) {
        let params = &mut state.current_parameters;
        params.rx1_data_rate_offset = req.rx1_data_rate_offset;
        params.rx2_data_rate_index = req.rx2_data_rate_index;
        params.rx2_frequency = req.rx2_frequency;
    }
    emit_answer(sink, Cid::RxParamSetup, accepted, Some(MacPayload::RxParamSetupAns(pld)));
    Ok(())
}

fn handle_dev_status_ans(state: &mut MacState, pld: Option<DevStatusAns>, sink: &mut dyn EventSink) -> Result<()> {
    let pld = require(pld, Cid::DevStatus)?;
    settle(state, Cid::DevStatus)?;
    state.last_dev_status = Some(DevStatus { battery: pld.battery, margin: pld.margin });
    emit_answer(sink, Cid::DevStatus, true, Some(MacPayload::DevStatusAns(pld)));
    Ok(())
}

fn handle_rx_timing_setup_ans(state: &mut MacState, sink: &mut dyn EventSink) -> Result<()> {
    let request = settle(state, Cid::RxTimingSetup)?;
    if let Some(MacPayload::RxTimingSetupReq(req)) = request.payload {
        state.current_parameters.rx1_delay = RxDelay(req.delay);
    }
    emit_answer(sink, Cid::RxTimingSetup, true, None);
    Ok(())
}

fn handle_ping_slot_channel_ans(
    state: &mut MacState,
    pld: Option<PingSlotChannelAns>,
    sink: &mut dyn EventSink,
) -> Result<()> {
    let pld = require(pld, Cid::PingSlotChannel)?;
    let request = settle(state, Cid::PingSlotChannel)?;
    let accepted = pld.frequency_ack && pld.data_rate_index_ack;
    if let (true, Some(MacPayload::PingSlotChannelReq(req))) = (accepted, request.payload) {
        state.current_parameters.ping_slot_frequency = req.frequency;
        state.current_parameters.ping_slot_data_rate_index = req.data_rate_index;
    }
    emit_answer(sink, Cid::PingSlotChannel, accepted, Some(MacPayload::PingSlotChannelAns(pld)));
    Ok(())
}
