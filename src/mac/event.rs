use tokio::sync::broadcast;
use tracing::debug;

use super::command::MacPayload;

/// Observable outcome of handling a MAC command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    name: String,
    data: Option<MacPayload>,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Option<MacPayload>) -> Self {
        Event { name: name.into(), data }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> Option<&MacPayload> {
        self.data.as_ref()
    }
}

/// Collects events emitted by the MAC engine
pub trait EventSink {
    fn publish(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn publish(&mut self, event: Event) {
        self.push(event);
    }
}

/// Forwards events to broadcast subscribers
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastSink { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&mut self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("dropped MAC event without subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::command::{MacPayload, PingSlotInfoReq};

    #[test]
    fn test_vec_sink() {
        let mut events: Vec<Event> = Vec::new();
        let data = MacPayload::PingSlotInfoReq(PingSlotInfoReq { period: 3 });
        events.publish(Event::new("ns.mac.ping_slot_info.request", Some(data)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "ns.mac.ping_slot_info.request");
        assert_eq!(events[0].data(), Some(&data));
    }

    #[tokio::test]
    async fn test_broadcast_sink() {
        let mut sink = BroadcastSink::new(8);
        // No subscribers yet.
        sink.publish(Event::new("ns.mac.rekey.request", None));

        let mut rx = sink.subscribe();
        sink.publish(Event::new("ns.mac.rekey.answer", None));
        assert_eq!(rx.recv().await.unwrap().name(), "ns.mac.rekey.answer");
    }
}
