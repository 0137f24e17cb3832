//! Transport layer for communicating with TP-Link Tapo devices.
//!
//! This module provides the transport implementations for the two protocols
//! used by Tapo firmware:
//!
//! - [`KlapTransport`]: seed-exchange handshake, signed AES frames (newer firmware)
//! - [`PassthroughTransport`]: RSA key exchange, `securePassthrough` envelope (older firmware)
//!
//! Use [`connect`] to pick the protocol (probing the device when the policy
//! is [`ProtocolPolicy::Auto`]) and log in.

pub mod http;
pub mod klap;
pub mod passthrough;

pub use klap::KlapTransport;
pub use passthrough::PassthroughTransport;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{
    Credentials, DeviceInfo,
    error::{DeviceError, Error},
    transport::http::{APP_PATH, HttpClient, HttpRequest},
};

/// Default timeout for one HTTP exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HTTP port for both protocols.
pub const DEFAULT_PORT: u16 = 80;

/// `error_code` a device answers `component_nego` with when it only speaks KLAP.
pub const KLAP_ONLY_CODE: i64 = 1003;

/// Encryption protocol spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    /// KLAP seed-exchange handshake with signed AES-CBC requests.
    Klap,
    /// RSA key exchange with AES-CBC wrapped in `securePassthrough`.
    Passthrough,
}

impl std::fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionType::Klap => write!(f, "KLAP"),
            EncryptionType::Passthrough => write!(f, "Passthrough"),
        }
    }
}

/// How [`connect`] chooses a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolPolicy {
    /// Probe the device with `component_nego` and pick accordingly.
    #[default]
    Auto,
    /// Always use KLAP.
    Klap,
    /// Always use Passthrough.
    Passthrough,
}

impl std::fmt::Display for ProtocolPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolPolicy::Auto => write!(f, "auto"),
            ProtocolPolicy::Klap => write!(f, "klap"),
            ProtocolPolicy::Passthrough => write!(f, "passthrough"),
        }
    }
}

impl std::str::FromStr for ProtocolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ProtocolPolicy::Auto),
            "klap" => Ok(ProtocolPolicy::Klap),
            "passthrough" => Ok(ProtocolPolicy::Passthrough),
            other => Err(format!(
                "unknown protocol {:?} (expected auto, klap or passthrough)",
                other
            )),
        }
    }
}

/// Configuration for connecting to a device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// The device hostname or IP address.
    pub host: String,
    /// HTTP port of the device.
    pub port: u16,
    /// Timeout applied to each HTTP exchange.
    pub timeout: Duration,
    /// Protocol selection policy.
    pub protocol: ProtocolPolicy,
}

impl DeviceConfig {
    /// Creates a new device configuration.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            protocol: ProtocolPolicy::default(),
        }
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the protocol policy.
    pub fn with_protocol(mut self, protocol: ProtocolPolicy) -> Self {
        self.protocol = protocol;
        self
    }

    fn http_client(&self) -> HttpClient {
        HttpClient::new(self.host.clone(), self.port, self.timeout)
    }
}

/// Selects a protocol for the device and logs in.
///
/// # Example
///
/// ```no_run
/// use tapo_core::{Credentials, transport::{DeviceConfig, TransportExt, connect}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DeviceConfig::new("192.168.1.100");
///     let credentials = Credentials::new("user@example.com", "password");
///
///     let mut transport = connect(config, credentials).await?;
///     let info = transport.get_device_info().await?;
///     println!("{:?} is on: {:?}", info.model(), info.device_on());
///     Ok(())
/// }
/// ```
pub async fn connect(
    config: DeviceConfig,
    credentials: Credentials,
) -> Result<DeviceTransport, Error> {
    let mut transport = select(config, credentials).await?;
    transport.login().await?;
    Ok(transport)
}

/// Builds the transport for the configured policy without logging in.
pub async fn select(
    config: DeviceConfig,
    credentials: Credentials,
) -> Result<DeviceTransport, Error> {
    let (host, port) = http::parse_endpoint(&config.host, config.port)?;
    let config = DeviceConfig { host, port, ..config };

    let encryption = match config.protocol {
        ProtocolPolicy::Klap => EncryptionType::Klap,
        ProtocolPolicy::Passthrough => EncryptionType::Passthrough,
        ProtocolPolicy::Auto => detect_protocol(&config).await,
    };

    debug!(
        host = %config.host,
        port = config.port,
        policy = %config.protocol,
        protocol = %encryption,
        "Selected protocol"
    );

    let http = config.http_client();
    Ok(match encryption {
        EncryptionType::Klap => DeviceTransport::Klap(KlapTransport::new(http, credentials)),
        EncryptionType::Passthrough => {
            DeviceTransport::Passthrough(PassthroughTransport::new(http, credentials))
        }
    })
}

/// Probes the device with an unencrypted `component_nego` request.
///
/// An `error_code` of 1003 means the device refuses Passthrough. A probe that
/// fails outright is also taken to mean KLAP, since newer firmware may drop
/// plain JSON requests.
pub async fn detect_protocol(config: &DeviceConfig) -> EncryptionType {
    let body = json!({ "method": "component_nego", "params": {} }).to_string();
    let request = HttpRequest::post(APP_PATH, body.as_bytes()).content_type("application/json");

    let response = match config.http_client().send(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(host = %config.host, error = %e, "Protocol probe failed, assuming KLAP");
            return EncryptionType::Klap;
        }
    };

    match serde_json::from_slice::<Value>(&response.body) {
        Ok(value) if matches!(error_code(&value), Ok(KLAP_ONLY_CODE)) => EncryptionType::Klap,
        Ok(_) => EncryptionType::Passthrough,
        Err(e) => {
            debug!(
                host = %config.host,
                status = response.status,
                error = %e,
                "Unparseable probe reply, assuming KLAP"
            );
            EncryptionType::Klap
        }
    }
}

/// Trait for device transport protocols.
///
/// Abstracts over KLAP and Passthrough so callers send JSON-RPC style
/// commands without caring how they are encrypted.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs the full handshake and login, discarding any previous session.
    async fn login(&mut self) -> Result<(), Error>;

    /// Sends `{"method": method, "params": params}` and returns the `result`
    /// member of the response (`null` if absent).
    ///
    /// A non-zero `error_code` is returned as [`Error::Device`].
    async fn send(&mut self, method: &str, params: Option<Value>) -> Result<Value, Error>;

    /// Returns the encryption type used by this transport.
    fn encryption_type(&self) -> EncryptionType;

    /// Returns the device host.
    fn host(&self) -> &str;

    /// Returns the device port.
    fn port(&self) -> u16;
}

/// Typed convenience methods on top of [`Transport::send`].
#[async_trait]
pub trait TransportExt: Transport {
    /// Reads the device information object.
    async fn get_device_info(&mut self) -> Result<DeviceInfo, Error>;

    /// Applies the given fields with `set_device_info`.
    async fn set_device_info(&mut self, params: Map<String, Value>) -> Result<(), Error>;

    /// Switches the device on or off.
    async fn set_device_on(&mut self, on: bool) -> Result<(), Error>;
}

#[async_trait]
impl<T: Transport + ?Sized + Send> TransportExt for T {
    async fn get_device_info(&mut self) -> Result<DeviceInfo, Error> {
        let result = self.send("get_device_info", None).await?;
        DeviceInfo::from_value(result)
    }

    async fn set_device_info(&mut self, params: Map<String, Value>) -> Result<(), Error> {
        self.send("set_device_info", Some(Value::Object(params))).await?;
        Ok(())
    }

    async fn set_device_on(&mut self, on: bool) -> Result<(), Error> {
        let mut params = Map::new();
        params.insert("device_on".into(), Value::Bool(on));
        self.set_device_info(params).await
    }
}

/// A transport for either protocol, chosen at runtime by [`select`].
#[derive(Debug)]
pub enum DeviceTransport {
    /// KLAP session.
    Klap(KlapTransport),
    /// Passthrough session.
    Passthrough(PassthroughTransport),
}

#[async_trait]
impl Transport for DeviceTransport {
    async fn login(&mut self) -> Result<(), Error> {
        match self {
            DeviceTransport::Klap(t) => t.login().await,
            DeviceTransport::Passthrough(t) => t.login().await,
        }
    }

    async fn send(&mut self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        match self {
            DeviceTransport::Klap(t) => t.send(method, params).await,
            DeviceTransport::Passthrough(t) => t.send(method, params).await,
        }
    }

    fn encryption_type(&self) -> EncryptionType {
        match self {
            DeviceTransport::Klap(t) => t.encryption_type(),
            DeviceTransport::Passthrough(t) => t.encryption_type(),
        }
    }

    fn host(&self) -> &str {
        match self {
            DeviceTransport::Klap(t) => t.host(),
            DeviceTransport::Passthrough(t) => t.host(),
        }
    }

    fn port(&self) -> u16 {
        match self {
            DeviceTransport::Klap(t) => t.port(),
            DeviceTransport::Passthrough(t) => t.port(),
        }
    }
}

/// Builds the JSON-RPC request object.
fn build_request(method: &str, params: Option<Value>) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("method".into(), Value::String(method.to_string()));
    if let Some(params) = params {
        request.insert("params".into(), params);
    }
    request
}

/// Reads `error_code`. A missing or null field counts as success.
fn error_code(response: &Value) -> Result<i64, Error> {
    match response.get("error_code") {
        None | Some(Value::Null) => Ok(0),
        Some(code) => code
            .as_i64()
            .ok_or_else(|| Error::Protocol(format!("non-integer error_code: {}", code))),
    }
}

/// Fails with [`Error::Device`] if the response carries a non-zero `error_code`.
fn check_error_code(protocol: EncryptionType, response: &Value) -> Result<(), Error> {
    match error_code(response)? {
        0 => Ok(()),
        code => {
            let code = i32::try_from(code).unwrap_or(i32::MIN);
            Err(DeviceError::new(protocol, code).into())
        }
    }
}

/// Takes the `result` member out of a response object.
fn take_result(response: Value) -> Value {
    match response {
        Value::Object(mut map) => map.remove("result").unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
