//! Egress endpoint definitions.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Deserialize;

/// Proxy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::Socks5 => write!(f, "socks5"),
        }
    }
}

/// Connection parameters for one proxy.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: Protocol::default(),
            username: None,
            password: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port`, the identity of an endpoint within a pool.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL, including credentials when both are set.
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", self.protocol, user, pass, self.host, self.port)
            }
            _ => format!("{}://{}:{}", self.protocol, self.host, self.port),
        }
    }
}

// Keeps passwords out of logs.
impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Handle for an endpoint within one rotator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pooled endpoint and its health bookkeeping.
#[derive(Debug, Clone)]
pub struct EgressEndpoint {
    pub id: EndpointId,
    pub config: EndpointConfig,
    pub available: bool,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub failures: u64,
    pub last_checked: Option<DateTime<Local>>,
}

impl EgressEndpoint {
    pub(crate) fn new(id: EndpointId, config: EndpointConfig) -> Self {
        Self {
            id,
            config,
            available: true,
            consecutive_failures: 0,
            successes: 0,
            failures: 0,
            last_checked: None,
        }
    }
}
