use std::fmt;

use crate::core::{Error, GatewayIdentifiers, Result, TOPIC_VERSION};

/// Route of a frame exchanged with a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Uplink messages, published by the gateway
    Up,
    /// Downlink messages, subscribed to by the gateway
    Down,
    /// Gateway status, published by the gateway
    Status,
    /// Transmit acknowledgments, published by the gateway
    TxAck,
}

impl Route {
    fn suffix(&self) -> &'static str {
        match self {
            Route::Up => "up",
            Route::Down => "down",
            Route::Status => "status",
            Route::TxAck => "down/ack",
        }
    }

    /// Returns the topic of this route for a gateway
    pub fn topic(&self, gateway: &GatewayIdentifiers) -> String {
        format!("{}/{}/{}", TOPIC_VERSION, gateway.uid(), self.suffix())
    }

    /// Parses a topic of the form `v3/{gateway_uid}/{route}`
    pub fn parse(topic: &str) -> Result<(&str, Route)> {
        let mut parts = topic.splitn(3, '/');
        let (version, uid, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(version), Some(uid), Some(rest)) => (version, uid, rest),
            _ => return Err(Error::invalid_argument(format!("invalid topic format `{}`", topic))),
        };
        if version != TOPIC_VERSION || uid.is_empty() {
            return Err(Error::invalid_argument(format!("invalid topic format `{}`", topic)));
        }
        let route = match rest {
            "up" => Route::Up,
            "down" => Route::Down,
            "status" => Route::Status,
            "down/ack" => Route::TxAck,
            _ => return Err(Error::invalid_argument(format!("unknown route `{}`", rest))),
        };
        Ok((uid, route))
    }

    /// Parses a topic and checks that it belongs to the session's gateway
    pub fn classify(topic: &str, session: &GatewayIdentifiers) -> Result<Route> {
        let (uid, route) = Route::parse(topic)?;
        if uid != session.uid() {
            return Err(Error::permission_denied(format!(
                "topic gateway `{}` does not match session gateway `{}`",
                uid,
                session.uid()
            )));
        }
        Ok(route)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
