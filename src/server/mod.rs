//! Network server core
//!
//! Runs the MAC engine for device uplinks under the device's lock and turns
//! queued MAC answers into class A downlinks on the best reception path.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{Config, DevEui, DeviceClass, Error, Result};
use crate::mac::{engine, BroadcastSink, DeviceTable, Event, EventSink, MacCommand, UplinkContext};
use crate::protocol::{
    DownlinkMessage, DownlinkPath, DownlinkSettings, TxRequest, TxSchedulePriority, UplinkMessage,
};
use crate::scheduling::{DownlinkScheduler, FrequencyPlanStore, ScheduleResult};

const EVENT_CAPACITY: usize = 256;

pub struct NetworkServer {
    config: Config,
    devices: Arc<DeviceTable>,
    frequency_plans: Arc<dyn FrequencyPlanStore>,
    scheduler: DownlinkScheduler,
    events: BroadcastSink,
}

impl NetworkServer {
    pub fn new(
        config: Config,
        devices: Arc<DeviceTable>,
        frequency_plans: Arc<dyn FrequencyPlanStore>,
        scheduler: DownlinkScheduler,
    ) -> Self {
        NetworkServer {
            config,
            devices,
            frequency_plans,
            scheduler,
            events: BroadcastSink::new(EVENT_CAPACITY),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceTable> {
        &self.devices
    }

    /// Subscribes to MAC events of every device
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Applies the MAC commands carried in an uplink's FOpts.
    ///
    /// Commands are handled in order; the first failure stops processing.
    /// Events of commands handled before the failure are still published.
    pub async fn handle_uplink(&self, dev_eui: &DevEui, fopts: &[u8], up: &UplinkMessage) -> Result<Vec<Event>> {
        let commands = MacCommand::decode_uplink(fopts)?;
        let ctx = UplinkContext::from_uplink(up);

        let (events, processed) = self
            .devices
            .with_device(dev_eui, |device| {
                let mut events = Vec::new();
                let processed = match device.mac_state.as_mut() {
                    Some(state) => commands
                        .iter()
                        .try_for_each(|command| engine::handle(state, command, &ctx, &mut events)),
                    None => Err(Error::failed_precondition(format!("device {} has no MAC state", dev_eui))),
                };
                Ok((events, processed))
            })
            .await?;

        let mut sink = self.events.clone();
        for event in &events {
            sink.publish(event.clone());
        }
        if let Err(e) = processed {
            warn!(dev_eui = %dev_eui, error = %e, "failed to handle MAC command");
            return Err(e);
        }
        Ok(events)
    }

    /// Schedules queued MAC answers and pending requests in reply to an uplink.
    ///
    /// Returns `None` when there is nothing to send. The device stays locked
    /// until delivery is settled and its MAC state is restored when
    /// scheduling fails.
    pub async fn schedule_mac_answers(&self, dev_eui: &DevEui, up: &UplinkMessage) -> Result<Option<ScheduleResult>> {
        let rx = up
            .best_rx_metadata()
            .ok_or_else(|| Error::failed_precondition("uplink without reception metadata"))?;
        let path = DownlinkPath::UplinkToken(rx.uplink_token.clone());

        let mut device = self.devices.lock(dev_eui).await?;
        let plan = self.frequency_plans.get(&device.frequency_plan_id)?;
        let frequency_plan_id = device.frequency_plan_id.clone();
        let state = device
            .mac_state
            .as_mut()
            .ok_or_else(|| Error::failed_precondition(format!("device {} has no MAC state", dev_eui)))?;

        let snapshot = state.clone();
        let selected = state.downlink_commands(self.config.fopts_budget);
        if selected.is_empty() {
            return Ok(None);
        }

        let params = &state.current_parameters;
        let request = TxRequest {
            class: DeviceClass::A,
            priority: TxSchedulePriority::High,
            rx1_delay: params.rx1_delay,
            rx1_data_rate_index: plan.rx1_data_rate_index(up.settings.data_rate_index, params.rx1_data_rate_offset),
            rx1_frequency: up.settings.frequency,
            rx2_data_rate_index: params.rx2_data_rate_index,
            rx2_frequency: params.rx2_frequency,
            frequency_plan_id,
        };
        let message = DownlinkMessage {
            raw_payload: selected.fopts,
            settings: Some(DownlinkSettings::Request(Some(request))),
        };

        match self.scheduler.schedule_down(path, message).await {
            Ok(result) => {
                debug!(
                    dev_eui = %dev_eui,
                    commands = selected.commands.len(),
                    window = %result.window,
                    "scheduled MAC downlink"
                );
                Ok(Some(result))
            }
            Err(e) => {
                *state = snapshot;
                warn!(dev_eui = %dev_eui, error = %e, "failed to schedule MAC downlink");
                Err(e)
            }
        }
    }
}
