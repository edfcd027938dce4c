use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::core::{DevEui, DeviceClass, Result};
use crate::protocol::RxDelay;
use crate::scheduling::FrequencyPlan;
use super::command::MacCommand;

/// Radio parameters negotiated with a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacParameters {
    pub rx1_delay: RxDelay,
    pub rx1_data_rate_offset: u8,
    pub rx2_data_rate_index: u8,
    /// RX2 frequency in Hz
    pub rx2_frequency: u64,
    /// Aggregated duty cycle limit as 1/2^n
    pub max_duty_cycle: u8,
    pub adr_data_rate_index: u8,
    pub adr_tx_power_index: u8,
    pub adr_nb_trans: u8,
    pub channel_mask: u16,
    /// Ping slot frequency in Hz
    pub ping_slot_frequency: u64,
    pub ping_slot_data_rate_index: u8,
}

impl MacParameters {
    /// Parameters a device uses after activation or reset
    pub fn defaults(plan: &FrequencyPlan) -> Self {
        MacParameters {
            rx1_delay: RxDelay::default(),
            rx1_data_rate_offset: 0,
            rx2_data_rate_index: plan.rx2_data_rate_index,
            rx2_frequency: plan.rx2_frequency,
            max_duty_cycle: 0,
            adr_data_rate_index: 0,
            adr_tx_power_index: 0,
            adr_nb_trans: 1,
            channel_mask: plan.default_channel_mask(),
            ping_slot_frequency: plan.ping_slot_frequency,
            ping_slot_data_rate_index: plan.ping_slot_data_rate_index,
        }
    }
}

/// Battery and margin last reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevStatus {
    pub battery: u8,
    pub margin: i8,
}

/// Per-device MAC layer state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacState {
    /// LoRaWAN 1.x minor version the session runs
    pub lorawan_minor_version: u8,
    pub device_class: DeviceClass,
    /// What the device currently uses
    pub current_parameters: MacParameters,
    /// What the server wants the device to use
    pub desired_parameters: MacParameters,
    /// Restored on ResetInd
    pub default_parameters: MacParameters,
    pub ping_slot_periodicity: Option<u8>,
    /// Answers to send with the next downlink, in order
    pub queued_responses: Vec<MacCommand>,
    /// Server requests awaiting the device's answer, in order
    pub pending_requests: Vec<MacCommand>,
    pub last_dev_status: Option<DevStatus>,
}

/// Commands selected for one downlink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkCommands {
    pub commands: Vec<MacCommand>,
    /// Encoded FOpts octets of `commands`
    pub fopts: Vec<u8>,
}

impl DownlinkCommands {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl MacState {
    pub fn new(plan: &FrequencyPlan, lorawan_minor_version: u8) -> Self {
        let defaults = MacParameters::defaults(plan);
        MacState {
            lorawan_minor_version,
            device_class: DeviceClass::A,
            current_parameters: defaults.clone(),
            desired_parameters: defaults.clone(),
            default_parameters: defaults,
            ping_slot_periodicity: None,
            queued_responses: Vec::new(),
            pending_requests: Vec::new(),
            last_dev_status: None,
        }
    }

    /// Queues a server request to be sent until the device answers it.
    ///
    /// Requests that cannot be encoded as a downlink command are rejected
    /// with `InvalidArgument` and nothing is queued.
    pub fn enqueue_request(&mut self, command: MacCommand) -> Result<()> {
        command.encode_downlink()?;
        self.pending_requests.push(command);
        Ok(())
    }

    /// Removes and returns the first pending request with the command's CID
    pub(crate) fn take_pending(&mut self, command: &MacCommand) -> Option<MacCommand> {
        let index = self.pending_requests.iter().position(|pending| pending.cid == command.cid)?;
        Some(self.pending_requests.remove(index))
    }

    /// Selects the commands for the next downlink within `budget` octets.
    ///
    /// Queued answers go first and are drained; pending requests follow and
    /// stay pending until answered. Selection stops at the first command that
    /// does not fit or cannot be encoded, so ordering is kept and what was
    /// selected before it still goes out.
    pub fn downlink_commands(&mut self, budget: usize) -> DownlinkCommands {
        let mut selected = DownlinkCommands { commands: Vec::new(), fopts: Vec::new() };

        let answers = select(&self.queued_responses, budget, &mut selected);
        if answers == self.queued_responses.len() {
            select(&self.pending_requests, budget, &mut selected);
        }

        self.queued_responses.drain(..answers);
        selected
    }
}

/// Appends commands in order while they encode and fit, returning how many
fn select(commands: &[MacCommand], budget: usize, selected: &mut DownlinkCommands) -> usize {
    for (count, command) in commands.iter().enumerate() {
        let encoded = match command.encode_downlink() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(cid = ?command.cid, error = %e, "skipping MAC commands after unencodable command");
                return count;
            }
        };
        if selected.fopts.len() + encoded.len() > budget {
            return count;
        }
        selected.fopts.extend_from_slice(&encoded);
        selected.commands.push(command.clone());
    }
    commands.len()
}

/// A registered end device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndDevice {
    pub dev_eui: DevEui,
    pub frequency_plan_id: String,
    /// Absent until the device has joined
    pub mac_state: Option<MacState>,
}

impl EndDevice {
    pub fn new(dev_eui: DevEui, plan: &FrequencyPlan) -> Self {
        EndDevice {
            dev_eui,
            frequency_plan_id: plan.id.clone(),
            mac_state: Some(MacState::new(plan, 1)),
        }
    }
}
