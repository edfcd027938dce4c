use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, Mutex};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{Config, Error, GatewayIdentifiers, Result};
use crate::protocol::{
    codec::decode_payload,
    token, DownlinkMessage, DownlinkPath, GatewayDown, GatewayStatus, Route, TxAcknowledgment,
    UplinkMessage, UplinkTokenData,
};
use crate::scheduling::{compute_tx_settings, FrequencyPlanStore, ResolvedPath, ScheduleResult};

/// Bounded queue with a single logical consumer
struct Queue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T> Queue<T> {
    fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Queue { name, tx, rx: Mutex::new(rx) }
    }

    fn push(&self, item: T) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => Error::unavailable(format!("{} queue full", self.name)),
            TrySendError::Closed(_) => Error::canceled(format!("{} queue closed", self.name)),
        })
    }

    async fn pop(&self, cancel: &CancellationToken, timeout: Option<Duration>) -> Result<T> {
        let recv = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::canceled("connection closed")),
                item = async { self.rx.lock().await.recv().await } => {
                    item.ok_or_else(|| Error::canceled(format!("{} queue closed", self.name)))
                }
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, recv)
                .await
                .map_err(|_| Error::unavailable(format!("timed out waiting for {}", self.name)))?,
            None => recv.await,
        }
    }
}

/// A live, authenticated gateway session
pub struct Connection {
    /// Authenticated identity of the gateway
    ids: GatewayIdentifiers,
    config: Config,
    frequency_plans: Arc<dyn FrequencyPlanStore>,
    /// Session-scoped cancellation
    cancel: CancellationToken,
    up: Queue<UplinkMessage>,
    status: Queue<GatewayStatus>,
    tx_ack: Queue<TxAcknowledgment>,
    down: Queue<GatewayDown>,
    /// Class A uplink tokens already used for a downlink, oldest first
    consumed_tokens: StdMutex<VecDeque<UplinkTokenData>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("gateway", &self.ids)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Creates a new connection for an authenticated gateway
    pub fn new(
        ids: GatewayIdentifiers,
        config: Config,
        frequency_plans: Arc<dyn FrequencyPlanStore>,
        cancel: CancellationToken,
    ) -> Self {
        Connection {
            up: Queue::new("uplink", config.up_buffer),
            status: Queue::new("status", config.status_buffer),
            tx_ack: Queue::new("tx acknowledgment", config.tx_ack_buffer),
            down: Queue::new("downlink", config.downlink_buffer),
            consumed_tokens: StdMutex::new(VecDeque::with_capacity(config.recent_token_capacity)),
            ids,
            config,
            frequency_plans,
            cancel,
        }
    }

    /// Returns the gateway identifiers of this session
    pub fn gateway(&self) -> &GatewayIdentifiers {
        &self.ids
    }

    /// Tears down the session, unblocking all pending reads and writes
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the session is torn down
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Waits for the next uplink, in receive order
    pub async fn up(&self, timeout: Option<Duration>) -> Result<UplinkMessage> {
        self.up.pop(&self.cancel, timeout).await
    }

    /// Waits for the next gateway status report
    pub async fn status(&self, timeout: Option<Duration>) -> Result<GatewayStatus> {
        self.status.pop(&self.cancel, timeout).await
    }

    /// Waits for the next transmit acknowledgment
    pub async fn tx_ack(&self, timeout: Option<Duration>) -> Result<TxAcknowledgment> {
        self.tx_ack.pop(&self.cancel, timeout).await
    }

    /// Waits for the next downlink envelope to put on the wire.
    ///
    /// Consumed by the transport adapter.
    pub async fn next_down(&self, timeout: Option<Duration>) -> Result<GatewayDown> {
        self.down.pop(&self.cancel, timeout).await
    }

    /// Checks whether the gateway may subscribe to a topic
    pub fn check_subscription(&self, topic: &str) -> Result<()> {
        match Route::classify(topic, &self.ids)? {
            Route::Down => Ok(()),
            route => Err(Error::permission_denied(format!("subscribing to `{}` is not permitted", route))),
        }
    }

    pub fn can_subscribe(&self, topic: &str) -> bool {
        self.check_subscription(topic).is_ok()
    }

    /// Classifies and routes one frame published by the gateway.
    ///
    /// Rejections only affect the offending frame; the session stays up.
    pub fn handle_publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let result = self.route_publish(topic, payload);
        if let Err(e) = &result {
            warn!(gateway_uid = %self.ids, topic, error = %e, "rejected gateway frame");
        }
        result
    }

    fn route_publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::canceled("connection closed"));
        }
        match Route::classify(topic, &self.ids)? {
            Route::Up => self.handle_up(decode_payload(payload)?),
            Route::Down => Err(Error::permission_denied("gateways may not publish downlink messages")),
            Route::Status => self.status.push(decode_payload(payload)?),
            Route::TxAck => self.tx_ack.push(decode_payload(payload)?),
        }
    }

    /// Stamps an uplink with its reception tokens and surfaces it
    pub fn handle_up(&self, mut up: UplinkMessage) -> Result<()> {
        for rx in up.rx_metadata.iter_mut() {
            rx.gateway_ids = self.ids.clone();
            rx.uplink_token = token::encode(&rx.antenna(), rx.timestamp)?;
        }
        up.received_at = Some(SystemTime::now());
        self.up.push(up)
    }

    /// Schedules a downlink on this connection
    pub async fn schedule_down(&self, path: DownlinkPath, message: DownlinkMessage) -> Result<ScheduleResult> {
        message.tx_request()?;
        let resolved = ResolvedPath::resolve(&path)?;
        self.schedule_resolved(resolved, message).await
    }

    pub(crate) async fn schedule_resolved(
        &self,
        path: ResolvedPath,
        message: DownlinkMessage,
    ) -> Result<ScheduleResult> {
        if self.is_closed() {
            return Err(Error::canceled("connection closed"));
        }
        let request = message.tx_request()?;
        let antenna = path.antenna().clone();
        if antenna.gateway_ids.uid() != self.ids.uid() {
            return Err(Error::invalid_argument(format!(
                "downlink path addresses gateway `{}`, not `{}`",
                antenna.gateway_ids, self.ids
            )));
        }
        let plan = self.frequency_plans.get(&request.frequency_plan_id)?;
        let (window, tx_settings) = compute_tx_settings(request, &plan, &path)?;
        let priority = request.priority;

        let reserved = match &path {
            ResolvedPath::Token(data) if tx_settings.timestamp.is_some() => {
                self.reserve_token(data)?;
                Some(data)
            }
            _ => None,
        };

        if let Err(e) = self.deliver(GatewayDown { downlink_message: message }).await {
            if let Some(data) = reserved {
                self.release_token(data);
            }
            return Err(e);
        }

        debug!(
            gateway_uid = %self.ids,
            %window,
            frequency = tx_settings.frequency,
            timestamp = ?tx_settings.timestamp,
            ?priority,
            "scheduled downlink"
        );
        Ok(ScheduleResult { window, tx_settings, antenna })
    }

    fn reserve_token(&self, data: &UplinkTokenData) -> Result<()> {
        let mut consumed = self
            .consumed_tokens
            .lock()
            .map_err(|_| Error::unavailable("uplink token table poisoned"))?;
        if consumed.contains(data) {
            return Err(Error::failed_precondition("uplink token already used for a downlink"));
        }
        if consumed.len() >= self.config.recent_token_capacity.max(1) {
            consumed.pop_front();
        }
        consumed.push_back(data.clone());
        Ok(())
    }

    fn release_token(&self, data: &UplinkTokenData) {
        if let Ok(mut consumed) = self.consumed_tokens.lock() {
            consumed.retain(|d| d != data);
        }
    }

    /// Hands a downlink to the transport, waiting at most `downlink_timeout`
    async fn deliver(&self, down: GatewayDown) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::canceled("connection closed")),
            sent = self.down.tx.send_timeout(down, self.config.downlink_timeout) => {
                sent.map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => Error::unavailable("downlink queue full"),
                    SendTimeoutError::Closed(_) => Error::canceled("downlink queue closed"),
                })
            }
        }
    }
}
