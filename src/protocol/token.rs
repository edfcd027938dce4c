//! Uplink token codec
//!
//! An uplink token binds a reception to the gateway antenna that received it
//! and the concentrator timestamp of the reception. Class A downlinks carry the
//! token back so the scheduler can find the gateway and compute RX1/RX2.
//!
//! Layout: `version (1) | check (4) | body`, where the body is the bincode
//! encoding of the antenna identifiers and timestamp and the check is a
//! truncated SHA-256 over version and body.

use bincode::Options;
use serde::{Serialize, Deserialize};
use sha2::{Digest, Sha256};

use crate::core::{Error, GatewayAntennaIdentifiers, Result};

const TOKEN_VERSION: u8 = 1;
const CHECK_LEN: usize = 4;
const HEADER_LEN: usize = 1 + CHECK_LEN;
const MAX_BODY_LEN: u64 = 256;

/// Decoded contents of an uplink token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UplinkTokenData {
    pub ids: GatewayAntennaIdentifiers,
    /// Concentrator timestamp of the reception in microseconds
    pub timestamp: u32,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_BODY_LEN)
        .reject_trailing_bytes()
}

fn check(version: u8, body: &[u8]) -> [u8; CHECK_LEN] {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(body);
    let digest = hasher.finalize();
    let mut out = [0u8; CHECK_LEN];
    out.copy_from_slice(&digest[..CHECK_LEN]);
    out
}

/// Encodes an uplink token
pub fn encode(ids: &GatewayAntennaIdentifiers, timestamp: u32) -> Result<Vec<u8>> {
    if ids.gateway_ids.gateway_id.is_empty() {
        return Err(Error::invalid_argument("uplink token requires a gateway ID"));
    }
    let data = UplinkTokenData { ids: ids.clone(), timestamp };
    let body = options()
        .serialize(&data)
        .map_err(|e| Error::invalid_argument(format!("Failed to encode uplink token: {}", e)))?;

    let mut token = Vec::with_capacity(HEADER_LEN + body.len());
    token.push(TOKEN_VERSION);
    token.extend_from_slice(&check(TOKEN_VERSION, &body));
    token.extend_from_slice(&body);
    Ok(token)
}

/// Decodes an uplink token
pub fn decode(token: &[u8]) -> Result<UplinkTokenData> {
    if token.len() <= HEADER_LEN {
        return Err(Error::invalid_argument("uplink token too short"));
    }
    let (version, rest) = (token[0], &token[1..]);
    if version != TOKEN_VERSION {
        return Err(Error::invalid_argument(format!("unsupported uplink token version {}", version)));
    }
    let (expected, body) = rest.split_at(CHECK_LEN);
    if check(version, body) != expected {
        return Err(Error::invalid_argument("uplink token check mismatch"));
    }

    let data: UplinkTokenData = options()
        .deserialize(body)
        .map_err(|e| Error::invalid_argument(format!("Failed to decode uplink token: {}", e)))?;
    if data.ids.gateway_ids.gateway_id.is_empty() {
        return Err(Error::invalid_argument("uplink token without gateway ID"));
    }
    Ok(data)
}
