//! Session provider boundary.
//!
//! Token acquisition and refresh live outside this crate. Clients only ask a
//! [`SessionProvider`] for the current bearer token (stream handshake) or for
//! ready-made request headers (REST calls).

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

/// Header carrying the bearer token through the grpc-gateway REST proxy.
pub const AUTHORIZATION_HEADER: &str = "Grpc-Metadata-Authorization";

/// Supplies credentials for API and stream requests.
pub trait SessionProvider: Send + Sync {
    /// Returns the current bearer token.
    fn token(&self) -> SecretString;

    /// Returns the headers attached to every REST request.
    fn header(&self) -> HashMap<String, String>;
}

/// Session provider backed by a fixed token.
#[derive(Clone)]
pub struct StaticSession {
    token: SecretString,
}

impl StaticSession {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl SessionProvider for StaticSession {
    fn token(&self) -> SecretString {
        self.token.clone()
    }

    fn header(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert(
            AUTHORIZATION_HEADER.to_string(),
            format!("Bearer {}", self.token.expose_secret()),
        );
        headers
    }
}
