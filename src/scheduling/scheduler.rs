use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::core::{DeviceClass, Error, GatewayAntennaIdentifiers, Result};
use crate::network::ConnectionRegistry;
use crate::protocol::{
    token, DataRate, DownlinkMessage, DownlinkPath, RxDelay, TxRequest, TxSettings, UplinkTokenData,
};
use super::frequency_plan::FrequencyPlan;

const US_PER_SECOND: u32 = 1_000_000;

/// Receive window a downlink was scheduled in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxWindow {
    Rx1,
    Rx2,
}

impl fmt::Display for RxWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxWindow::Rx1 => f.write_str("rx1"),
            RxWindow::Rx2 => f.write_str("rx2"),
        }
    }
}

/// Delivery metadata of a scheduled downlink
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleResult {
    pub window: RxWindow,
    pub tx_settings: TxSettings,
    pub antenna: GatewayAntennaIdentifiers,
}

/// A downlink path with its uplink token decoded
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPath {
    Token(UplinkTokenData),
    Fixed(GatewayAntennaIdentifiers),
}

impl ResolvedPath {
    /// Decodes the path; a malformed token is an invalid argument
    pub fn resolve(path: &DownlinkPath) -> Result<Self> {
        match path {
            DownlinkPath::UplinkToken(bytes) => token::decode(bytes).map(ResolvedPath::Token),
            DownlinkPath::Fixed(ids) if ids.gateway_ids.gateway_id.is_empty() => {
                Err(Error::invalid_argument("fixed downlink path without gateway ID"))
            }
            DownlinkPath::Fixed(ids) => Ok(ResolvedPath::Fixed(ids.clone())),
        }
    }

    pub fn antenna(&self) -> &GatewayAntennaIdentifiers {
        match self {
            ResolvedPath::Token(data) => &data.ids,
            ResolvedPath::Fixed(ids) => ids,
        }
    }

    /// Receive timestamp of record, if any
    pub fn timestamp(&self) -> Option<u32> {
        match self {
            ResolvedPath::Token(data) => Some(data.timestamp),
            ResolvedPath::Fixed(_) => None,
        }
    }
}

fn window_settings(
    plan: &FrequencyPlan,
    frequency: u64,
    data_rate_index: u8,
    timestamp: Option<u32>,
) -> Option<TxSettings> {
    if frequency == 0 || !plan.allows_downlink(frequency) {
        return None;
    }
    let data_rate = plan.data_rate(data_rate_index)?;
    let coding_rate = match data_rate {
        DataRate::LoRa { .. } => "4/5".to_string(),
        DataRate::Fsk { .. } => String::new(),
    };
    Some(TxSettings {
        data_rate,
        data_rate_index,
        coding_rate,
        frequency,
        tx_power: plan.max_eirp,
        timestamp,
        invert_polarization: true,
    })
}

/// Computes the concrete transmission settings of a request.
///
/// Class A downlinks are anchored on the reception timestamp of the uplink
/// token: RX1 opens `rx1_delay` seconds after it and RX2 one second later.
/// RX1 is used when its frequency and data rate are valid in the plan,
/// otherwise RX2. Class C downlinks use the RX2 parameters immediately.
pub fn compute_tx_settings(
    request: &TxRequest,
    plan: &FrequencyPlan,
    path: &ResolvedPath,
) -> Result<(RxWindow, TxSettings)> {
    match request.class {
        DeviceClass::A => {
            if !request.rx1_delay.is_valid() {
                return Err(Error::invalid_argument(format!(
                    "RX1 delay of {} s exceeds {} s",
                    request.rx1_delay.0,
                    RxDelay::MAX
                )));
            }
            let anchor = path.timestamp().ok_or_else(|| {
                Error::invalid_argument("class A downlink requires an uplink token path")
            })?;
            let rx1 = anchor.wrapping_add(request.rx1_delay.seconds().wrapping_mul(US_PER_SECOND));
            let rx2 = rx1.wrapping_add(US_PER_SECOND);

            if let Some(settings) = window_settings(plan, request.rx1_frequency, request.rx1_data_rate_index, Some(rx1)) {
                return Ok((RxWindow::Rx1, settings));
            }
            window_settings(plan, request.rx2_frequency, request.rx2_data_rate_index, Some(rx2))
                .map(|settings| (RxWindow::Rx2, settings))
                .ok_or_else(|| Error::invalid_argument("no usable receive window for class A downlink"))
        }
        DeviceClass::C => window_settings(plan, request.rx2_frequency, request.rx2_data_rate_index, None)
            .map(|settings| (RxWindow::Rx2, settings))
            .ok_or_else(|| Error::invalid_argument("invalid RX2 parameters for class C downlink")),
        DeviceClass::B => Err(Error::invalid_argument("class B scheduling is not supported")),
    }
}

/// Routes downlinks to the live connection of the gateway they address
#[derive(Clone)]
pub struct DownlinkScheduler {
    registry: Arc<ConnectionRegistry>,
}

impl DownlinkScheduler {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        DownlinkScheduler { registry }
    }

    /// Validates, resolves and delivers a downlink.
    ///
    /// Settings are checked before the path, so an unsupported message fails
    /// with `InvalidArgument` whatever the path. A malformed path is an
    /// `InvalidArgument`; a path to a gateway without a live connection is
    /// `NotFound`.
    pub async fn schedule_down(&self, path: DownlinkPath, message: DownlinkMessage) -> Result<ScheduleResult> {
        message.tx_request()?;
        let resolved = ResolvedPath::resolve(&path)?;
        let uid = resolved.antenna().gateway_ids.uid();
        let connection = self
            .registry
            .get(uid)
            .ok_or_else(|| Error::not_found(format!("no live connection for gateway `{}`", uid)))?;
        debug!(gateway_uid = %uid, "resolved downlink path");
        // A session torn down after the lookup counts as gone.
        connection.schedule_resolved(resolved, message).await.map_err(|e| {
            if e.is_canceled() {
                Error::not_found(format!("connection of gateway `{}` closed", connection.gateway()))
            } else {
                e
            }
        })
    }
}
