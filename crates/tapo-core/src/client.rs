//! Entry point for connecting to Tapo devices.

use std::time::Duration;

use tracing::debug;

use crate::{
    Credentials, Plug,
    error::Error,
    transport::{self, DEFAULT_PORT, DEFAULT_TIMEOUT, DeviceConfig, ProtocolPolicy, http},
};

/// Holds account credentials and connection options shared by every device
/// opened through it.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tapo_core::{Credentials, TapoClient, transport::ProtocolPolicy};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = TapoClient::new(Credentials::new("user@example.com", "password"))
///         .with_timeout(Duration::from_secs(10))
///         .with_protocol(ProtocolPolicy::Klap);
///
///     let plug = client.p100("192.168.1.100").await?;
///     plug.power_off().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TapoClient {
    credentials: Credentials,
    timeout: Duration,
    protocol: ProtocolPolicy,
    port: u16,
}

impl TapoClient {
    /// Creates a client with default options (30 s timeout, auto protocol, port 80).
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            timeout: DEFAULT_TIMEOUT,
            protocol: ProtocolPolicy::default(),
            port: DEFAULT_PORT,
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the protocol selection policy.
    pub fn with_protocol(mut self, protocol: ProtocolPolicy) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the default port, used when the host string carries none.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connects to a P100/P105 plug and logs in.
    ///
    /// `host` may be an IP address, `ip:port`, `[v6]:port` or a hostname. It
    /// is validated before any network traffic.
    pub async fn p100(&self, host: &str) -> Result<Plug, Error> {
        let (host, port) = http::parse_endpoint(host, self.port)?;
        debug!(host = %host, port, policy = %self.protocol, "Connecting to plug");

        let config = DeviceConfig::new(host)
            .with_port(port)
            .with_timeout(self.timeout)
            .with_protocol(self.protocol);
        let transport = transport::connect(config, self.credentials.clone()).await?;
        Ok(Plug::new(transport))
    }
}
