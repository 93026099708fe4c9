use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};

/// The default broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// The default interval, in seconds, after which an idle connection sends a
/// `pingreq` to the broker.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;

// The capacity of the bounded request channel between a client and its
// event loop.
pub(crate) const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Broker connection data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    keep_alive: Duration,
    client_id: String,
}

impl BrokerConfig {
    /// Creates a [`BrokerConfig`] for the given broker host, with the
    /// default port and keep-alive interval.
    ///
    /// # Errors
    ///
    /// The host is empty.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::new(ErrorKind::Config, "The broker host is empty"));
        }

        Ok(Self {
            host,
            port: DEFAULT_PORT,
            keep_alive: Duration::from_secs(u64::from(DEFAULT_KEEP_ALIVE_SECS)),
            client_id: format!("dmbus-{}", std::process::id()),
        })
    }

    /// Sets the broker port.
    #[must_use]
    #[inline]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the keep-alive interval, in seconds.
    ///
    /// Zero disables keep-alive.
    #[must_use]
    #[inline]
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive = Duration::from_secs(u64::from(secs));
        self
    }

    /// Sets the client identifier presented to the broker.
    ///
    /// # Errors
    ///
    /// The identifier is empty.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(Error::new(ErrorKind::Config, "The client identifier is empty"));
        }
        self.client_id = client_id;
        Ok(self)
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}
