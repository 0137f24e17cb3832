//! Session facade for Tapo smart plugs (P100, P105 and similar).

use serde_json::Map;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    DeviceInfo,
    error::Error,
    transport::{DeviceTransport, EncryptionType, Transport, TransportExt},
};

/// An authenticated smart plug.
///
/// Calls on one `Plug` are serialized, since each session has a single
/// sequence counter. Separate plugs can be driven concurrently.
///
/// # Example
///
/// ```no_run
/// use tapo_core::{Credentials, TapoClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = TapoClient::new(Credentials::new("user@example.com", "password"));
///     let plug = client.p100("192.168.1.100").await?;
///
///     plug.power_on().await?;
///     let info = plug.get_device_info().await?;
///     println!("{} is on: {:?}", plug.host(), info.device_on());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Plug {
    host: String,
    encryption_type: EncryptionType,
    transport: Mutex<DeviceTransport>,
}

impl Plug {
    /// Wraps a logged-in transport.
    pub fn new(transport: DeviceTransport) -> Self {
        Self {
            host: transport.host().to_string(),
            encryption_type: transport.encryption_type(),
            transport: Mutex::new(transport),
        }
    }

    /// Switches the plug on.
    pub async fn power_on(&self) -> Result<(), Error> {
        self.set_power(true).await
    }

    /// Switches the plug off.
    pub async fn power_off(&self) -> Result<(), Error> {
        self.set_power(false).await
    }

    /// Switches the plug on or off.
    pub async fn set_power(&self, on: bool) -> Result<(), Error> {
        debug!(host = %self.host, on, "Setting power state");
        self.transport.lock().await.set_device_on(on).await
    }

    /// Reads the current device information.
    pub async fn get_device_info(&self) -> Result<DeviceInfo, Error> {
        self.transport.lock().await.get_device_info().await
    }

    /// Applies arbitrary `set_device_info` fields.
    pub async fn set_device_info(
        &self,
        params: Map<String, serde_json::Value>,
    ) -> Result<(), Error> {
        self.transport.lock().await.set_device_info(params).await
    }

    /// Discards the current session and logs in again with the same protocol.
    pub async fn refresh_session(&self) -> Result<(), Error> {
        debug!(host = %self.host, protocol = %self.encryption_type, "Refreshing session");
        self.transport.lock().await.login().await
    }

    /// Protocol this plug speaks.
    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    /// Device host.
    pub fn host(&self) -> &str {
        &self.host
    }
}
