//! Frame-log endpoint derivation.
//!
//! The websocket endpoint is derived from where the application is served
//! from, mirroring the page's transport security.

use url::Url;

use crate::stream::client::StreamClientError;

/// Host the development UI is served from.
pub const LOCAL_DEV_HOST: &str = "localhost:3000";
/// API base used when running against [`LOCAL_DEV_HOST`].
pub const LOCAL_DEV_BASE: &str = "wss://localhost:8080";

/// Origin the application is served from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLocation {
    /// Whether the page was loaded over TLS.
    pub secure: bool,
    /// Host name plus a non-default port, e.g. `app.example.com:8443`.
    pub host: String,
}

impl PageLocation {
    pub fn new(secure: bool, host: impl Into<String>) -> Self {
        Self {
            secure,
            host: host.into(),
        }
    }

    /// Parses an origin such as `https://app.example.com`.
    ///
    /// Default ports are omitted from [`PageLocation::host`].
    pub fn parse(origin: &str) -> Result<Self, StreamClientError> {
        let url = Url::parse(origin.trim())
            .map_err(|err| StreamClientError::InvalidOrigin(format!("{origin}: {err}")))?;

        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => {
                return Err(StreamClientError::InvalidOrigin(format!(
                    "unsupported scheme {other}"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| StreamClientError::InvalidOrigin(format!("{origin}: missing host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self { secure, host })
    }

    /// `http(s)://host` base for REST requests.
    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    /// `ws(s)://host` base mirroring the page's security.
    pub fn ws_base(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.host)
    }
}

/// Resolves the frame-log websocket URL for a gateway.
#[derive(Clone, Debug)]
pub struct EndpointResolver {
    location: PageLocation,
    local_dev_host: String,
    local_dev_base: String,
    endpoint_override: Option<String>,
}

impl EndpointResolver {
    pub fn new(location: PageLocation) -> Self {
        Self {
            location,
            local_dev_host: LOCAL_DEV_HOST.to_string(),
            local_dev_base: LOCAL_DEV_BASE.to_string(),
            endpoint_override: None,
        }
    }

    /// Replaces the development host and the base it is routed to.
    pub fn with_local_dev(mut self, host: impl Into<String>, base: impl Into<String>) -> Self {
        self.local_dev_host = host.into();
        self.local_dev_base = trim_base(base.into());
        self
    }

    /// Sets an explicit websocket base, e.g. `ws://127.0.0.1:9000`.
    ///
    /// The override takes precedence over the local development rule.
    pub fn with_endpoint(mut self, base: impl Into<String>) -> Self {
        self.endpoint_override = Some(trim_base(base.into()));
        self
    }

    /// Websocket base all frame-log URLs are built on.
    pub fn base(&self) -> String {
        if let Some(base) = self.endpoint_override.as_deref() {
            return base.to_string();
        }
        if self.location.host == self.local_dev_host {
            return self.local_dev_base.clone();
        }
        self.location.ws_base()
    }

    /// Full frame-log URL for `gateway_id`.
    pub fn frames_url(&self, gateway_id: &str) -> String {
        format!("{}/api/gateways/{gateway_id}/frames", self.base())
    }
}

fn trim_base(base: String) -> String {
    base.trim().trim_end_matches('/').to_string()
}
