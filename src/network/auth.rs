use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::{Error, GatewayIdentifiers, Result};

/// Verifies gateway credentials against an identity registry
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the gateway's identifiers when the key is valid.
    ///
    /// Unknown gateways and invalid keys are both `PermissionDenied`.
    async fn authenticate(&self, uid: &str, key: &str) -> Result<GatewayIdentifiers>;
}

/// Authenticator backed by an in-memory table of gateway keys
#[derive(Default)]
pub struct StaticAuthenticator {
    gateways: DashMap<String, (GatewayIdentifiers, String)>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a gateway with its key
    pub fn add(&self, ids: GatewayIdentifiers, key: impl Into<String>) {
        self.gateways.insert(ids.uid().to_string(), (ids, key.into()));
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, uid: &str, key: &str) -> Result<GatewayIdentifiers> {
        match self.gateways.get(uid) {
            Some(entry) if entry.1 == key => Ok(entry.0.clone()),
            _ => Err(Error::permission_denied(format!("invalid credentials for gateway `{}`", uid))),
        }
    }
}
