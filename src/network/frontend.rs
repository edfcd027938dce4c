//! In-process topic front end
//!
//! Plays the part of an MQTT-style transport: gateways connect with their
//! UID and key, publish serialized messages on `v3/{uid}/...` topics and
//! subscribe to `v3/{uid}/down` for framed downlink envelopes.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Encoder;
use tracing::{debug, warn};

use crate::core::{Error, Result};
use crate::protocol::{GatewayDown, MessageCodec};
use super::{Connection, GatewayServer};

/// Frames buffered per subscriber before the forwarder waits on it
const SUBSCRIBER_CAPACITY: usize = 16;

/// Accepts gateway sessions on behalf of a gateway server
#[derive(Clone)]
pub struct Frontend {
    server: Arc<GatewayServer>,
}

impl Frontend {
    pub fn new(server: Arc<GatewayServer>) -> Self {
        Frontend { server }
    }

    /// Authenticates and opens a session; nothing is set up on denial
    pub async fn connect(&self, uid: &str, key: &str) -> Result<Session> {
        let connection = self.server.connect(uid, key).await?;
        let (registrations, pending) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_downlinks(Arc::clone(&connection), pending));
        Ok(Session {
            server: Arc::clone(&self.server),
            connection,
            registrations,
            forwarder,
        })
    }
}

/// Encodes downlinks of a connection and hands each to every subscriber.
///
/// Downlinks are only taken off the connection while someone subscribes, and
/// each frame waits for room in every subscriber's buffer. A stalled reader
/// therefore leaves downlinks in the connection queue, where scheduling
/// fails once it is full.
async fn forward_downlinks(
    connection: Arc<Connection>,
    mut registrations: mpsc::UnboundedReceiver<mpsc::Sender<Bytes>>,
) {
    let mut codec = MessageCodec::<GatewayDown>::new();
    let mut sinks: Vec<mpsc::Sender<Bytes>> = Vec::new();
    loop {
        sinks.retain(|sink| !sink.is_closed());
        let down = tokio::select! {
            biased;
            _ = connection.closed() => break,
            sink = registrations.recv() => {
                match sink {
                    Some(sink) => sinks.push(sink),
                    None => break,
                }
                continue;
            }
            down = connection.next_down(None), if !sinks.is_empty() => match down {
                Ok(down) => down,
                Err(e) => {
                    debug!(gateway_uid = %connection.gateway(), error = %e, "downlink forwarder stopped");
                    break;
                }
            },
        };

        let mut frame = BytesMut::new();
        if let Err(e) = codec.encode(down, &mut frame) {
            warn!(gateway_uid = %connection.gateway(), error = %e, "failed to encode downlink");
            continue;
        }
        let frame = frame.freeze();
        for sink in &sinks {
            tokio::select! {
                biased;
                _ = connection.closed() => return,
                sent = sink.send(frame.clone()) => {
                    if sent.is_err() {
                        debug!(gateway_uid = %connection.gateway(), "downlink subscriber went away");
                    }
                }
            }
        }
    }
}

/// One connected gateway
pub struct Session {
    server: Arc<GatewayServer>,
    connection: Arc<Connection>,
    registrations: mpsc::UnboundedSender<mpsc::Sender<Bytes>>,
    forwarder: JoinHandle<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("connection", &self.connection).finish()
    }
}

impl Session {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Publishes a serialized message on a topic
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.connection.handle_publish(topic, payload)
    }

    /// Subscribes to a topic; only the session's downlink topic is allowed.
    ///
    /// Every subscriber receives every downlink framed after it subscribed.
    /// The receiver yields `None` once the session is gone.
    pub fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>> {
        self.connection.check_subscription(topic)?;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.registrations
            .send(tx)
            .map_err(|_| Error::canceled("downlink forwarder stopped"))?;
        Ok(rx)
    }

    /// Subscribes to the downlink topic as a stream of frames
    pub fn downlinks(&self, topic: &str) -> Result<impl Stream<Item = Bytes>> {
        let rx = self.subscribe(topic)?;
        Ok(stream::unfold(rx, |mut rx| async move {
            let frame = rx.recv().await?;
            Some((frame, rx))
        }))
    }

    /// Retracts the session and tears it down
    pub fn disconnect(self) {
        drop(self)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.server.disconnect(&self.connection);
        self.forwarder.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, DeviceClass, GatewayAntennaIdentifiers, GatewayIdentifiers};
    use crate::protocol::{
        codec::encode_payload, token, DataRate, DownlinkMessage, DownlinkPath, DownlinkSettings,
        GatewayStatus, RxDelay, RxMetadata, TxAckResult, TxAcknowledgment, TxRequest,
        TxSchedulePriority, TxSettings, UplinkMessage,
    };
    use crate::network::StaticAuthenticator;
    use crate::scheduling::InMemoryFrequencyPlans;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_util::codec::Decoder;

    const TIMEOUT: Duration = Duration::from_millis(200);
    const QUIET: Duration = Duration::from_millis(30);

    fn frontend() -> Frontend {
        frontend_with(Config::default())
    }

    fn frontend_with(config: Config) -> Frontend {
        let auth = StaticAuthenticator::new();
        auth.add(GatewayIdentifiers::new("test-gateway"), "test-key");
        let server = GatewayServer::new(
            config,
            Arc::new(auth),
            Arc::new(InMemoryFrequencyPlans::with_defaults()),
        );
        Frontend::new(Arc::new(server))
    }

    fn uplink(payload: &[u8]) -> UplinkMessage {
        UplinkMessage {
            raw_payload: payload.to_vec(),
            settings: TxSettings {
                data_rate: DataRate::LoRa { spreading_factor: 7, bandwidth: 125_000 },
                data_rate_index: 5,
                coding_rate: "4/5".to_string(),
                frequency: 868_100_000,
                tx_power: 14,
                timestamp: Some(100),
                invert_polarization: false,
            },
            rx_metadata: vec![RxMetadata {
                gateway_ids: GatewayIdentifiers::new("test-gateway"),
                antenna_index: 0,
                timestamp: 100,
                rssi: -50.0,
                snr: 7.0,
                uplink_token: vec![],
            }],
            received_at: None,
        }
    }

    fn class_a_request() -> TxRequest {
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

    fn decode_frame(frame: &Bytes) -> GatewayDown {
        let mut buf = BytesMut::from(&frame[..]);
        MessageCodec::<GatewayDown>::new().decode(&mut buf).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_authentication() {
        let fe = frontend();
        assert!(fe.connect("test-gateway", "test-key").await.is_ok());
        assert!(fe.connect("test-gateway", "invalid-key").await.unwrap_err().is_permission_denied());
        assert!(fe.connect("invalid-gateway", "invalid-key").await.unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn test_upstream_traffic() {
        let fe = frontend();
        let session = fe.connect("test-gateway", "test-key").await.unwrap();
        let conn = Arc::clone(session.connection());

        session.publish("v3/test-gateway/up", &encode_payload(&uplink(&[0x01])).unwrap()).unwrap();
        let up = conn.up(Some(TIMEOUT)).await.unwrap();
        assert_eq!(up.raw_payload, vec![0x01]);
        assert!(!up.rx_metadata[0].uplink_token.is_empty());

        let rejected = [
            ("v3/invalid-gateway/up", encode_payload(&uplink(&[0x03])).unwrap()),
            ("v3/test-gateway/down", encode_payload(&DownlinkMessage { raw_payload: vec![0x04], settings: None }).unwrap()),
            ("v3/invalid-gateway/down", encode_payload(&DownlinkMessage { raw_payload: vec![0x05], settings: None }).unwrap()),
            ("v3/invalid-gateway/status", encode_payload(&GatewayStatus { ip: vec!["2.2.2.2".to_string()], ..Default::default() }).unwrap()),
            ("invalid/format", encode_payload(&GatewayStatus { ip: vec!["3.3.3.3".to_string()], ..Default::default() }).unwrap()),
        ];
        for (topic, payload) in rejected.iter() {
            assert!(session.publish(topic, payload).is_err(), "{} accepted", topic);
        }
        assert!(conn.up(Some(QUIET)).await.unwrap_err().is_unavailable());
        assert!(conn.status(Some(QUIET)).await.unwrap_err().is_unavailable());
        assert!(conn.next_down(Some(QUIET)).await.unwrap_err().is_unavailable());

        let status = GatewayStatus { ip: vec!["1.1.1.1".to_string()], ..Default::default() };
        session.publish("v3/test-gateway/status", &encode_payload(&status).unwrap()).unwrap();
        assert_eq!(conn.status(Some(TIMEOUT)).await.unwrap(), status);

        let ack = TxAcknowledgment { correlation_ids: vec![], result: TxAckResult::Success };
        session.publish("v3/test-gateway/down/ack", &encode_payload(&ack).unwrap()).unwrap();
        assert_eq!(conn.tx_ack(Some(TIMEOUT)).await.unwrap(), ack);
    }

    #[tokio::test]
    async fn test_downstream_traffic() {
        let fe = frontend();
        let session = fe.connect("test-gateway", "test-key").await.unwrap();
        let conn = Arc::clone(session.connection());
        let mut subscription = session.subscribe("v3/test-gateway/down").unwrap();
        let mut listener = session.subscribe("v3/test-gateway/down").unwrap();
        assert!(session.subscribe("v3/test-gateway/up").unwrap_err().is_permission_denied());

        let antenna = GatewayAntennaIdentifiers::new(GatewayIdentifiers::new("test-gateway"), 0);
        let path = || DownlinkPath::UplinkToken(token::encode(&antenna, 100).unwrap());

        let message = DownlinkMessage {
            raw_payload: vec![0x01],
            settings: Some(DownlinkSettings::Request(Some(class_a_request()))),
        };
        conn.schedule_down(path(), message.clone()).await.unwrap();
        let frame = tokio::time::timeout(TIMEOUT, subscription.recv()).await.unwrap().unwrap();
        assert_eq!(decode_frame(&frame).downlink_message, message);
        let frame = tokio::time::timeout(TIMEOUT, listener.recv()).await.unwrap().unwrap();
        assert_eq!(decode_frame(&frame).downlink_message.raw_payload, vec![0x01]);

        let failing = [
            DownlinkMessage {
                raw_payload: vec![0x01],
                settings: Some(DownlinkSettings::Scheduled(TxSettings {
                    data_rate: DataRate::LoRa { spreading_factor: 7, bandwidth: 125_000 },
                    data_rate_index: 5,
                    coding_rate: "4/5".to_string(),
                    frequency: 869_525_000,
                    tx_power: 14,
                    timestamp: None,
                    invert_polarization: true,
                })),
            },
            DownlinkMessage { raw_payload: vec![0x02], settings: None },
        ];
        for message in failing {
            let err = conn.schedule_down(path(), message).await.unwrap_err();
            assert!(err.is_invalid_argument());
        }
        assert!(tokio::time::timeout(QUIET, subscription.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_downlink_stream() {
        let fe = frontend();
        let session = fe.connect("test-gateway", "test-key").await.unwrap();
        let conn = Arc::clone(session.connection());
        assert!(session.downlinks("v3/other-gateway/down").is_err());
        let downlinks = session.downlinks("v3/test-gateway/down").unwrap();
        futures::pin_mut!(downlinks);

        let antenna = GatewayAntennaIdentifiers::new(GatewayIdentifiers::new("test-gateway"), 0);
        for (ts, payload) in [(100u32, 0x0Au8), (200, 0x0B)] {
            let message = DownlinkMessage {
                raw_payload: vec![payload],
                settings: Some(DownlinkSettings::Request(Some(class_a_request()))),
            };
            let path = DownlinkPath::UplinkToken(token::encode(&antenna, ts).unwrap());
            conn.schedule_down(path, message).await.unwrap();
        }

        let first = tokio::time::timeout(TIMEOUT, downlinks.next()).await.unwrap().unwrap();
        assert_eq!(decode_frame(&first).downlink_message.raw_payload, vec![0x0A]);
        let second = tokio::time::timeout(TIMEOUT, downlinks.next()).await.unwrap().unwrap();
        assert_eq!(decode_frame(&second).downlink_message.raw_payload, vec![0x0B]);
    }

    #[tokio::test]
    async fn test_downlink_waits_for_subscriber() {
        let fe = frontend();
        let session = fe.connect("test-gateway", "test-key").await.unwrap();
        let conn = Arc::clone(session.connection());

        let antenna = GatewayAntennaIdentifiers::new(GatewayIdentifiers::new("test-gateway"), 0);
        let message = DownlinkMessage {
            raw_payload: vec![0x0C],
            settings: Some(DownlinkSettings::Request(Some(class_a_request()))),
        };
        let path = DownlinkPath::UplinkToken(token::encode(&antenna, 100).unwrap());
        conn.schedule_down(path, message).await.unwrap();
        tokio::time::sleep(QUIET).await;

        let mut subscription = session.subscribe("v3/test-gateway/down").unwrap();
        let frame = tokio::time::timeout(TIMEOUT, subscription.recv()).await.unwrap().unwrap();
        assert_eq!(decode_frame(&frame).downlink_message.raw_payload, vec![0x0C]);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_fills_queue() {
        let config = Config {
            downlink_buffer: 2,
            downlink_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let fe = frontend_with(config);
        let session = fe.connect("test-gateway", "test-key").await.unwrap();
        let conn = Arc::clone(session.connection());
        let mut subscription = session.subscribe("v3/test-gateway/down").unwrap();

        let antenna = GatewayAntennaIdentifiers::new(GatewayIdentifiers::new("test-gateway"), 0);
        let mut scheduled = 0u32;
        let err = loop {
            let message = DownlinkMessage {
                raw_payload: vec![scheduled as u8],
                settings: Some(DownlinkSettings::Request(Some(class_a_request()))),
            };
            let path = DownlinkPath::UplinkToken(token::encode(&antenna, 100 + scheduled).unwrap());
            match conn.schedule_down(path, message).await {
                Ok(_) => scheduled += 1,
                Err(e) => break e,
            }
            assert!(scheduled < 64, "downlinks accepted without a reader");
        };
        assert!(err.is_unavailable(), "{}", err);

        // Everything accepted is still delivered, in order.
        for expected in 0..scheduled {
            let frame = tokio::time::timeout(TIMEOUT, subscription.recv()).await.unwrap().unwrap();
            assert_eq!(decode_frame(&frame).downlink_message.raw_payload, vec![expected as u8]);
        }
        assert!(tokio::time::timeout(QUIET, subscription.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_retracts_session() {
        let fe = frontend();
        let session = fe.connect("test-gateway", "test-key").await.unwrap();
        let conn = Arc::clone(session.connection());
        session.disconnect();
        assert!(conn.is_closed());
        assert!(fe.server.get_connection("test-gateway").is_none());
        assert!(conn.up(None).await.unwrap_err().is_canceled());
    }
}
