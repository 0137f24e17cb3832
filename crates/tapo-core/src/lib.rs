//! Core library for controlling TP-Link Tapo smart devices on the local network.
//!
//! Tapo firmware speaks one of two encrypted HTTP protocols:
//!
//! - **KLAP** (newer firmware): a two-step seed exchange proves both sides
//!   know the account credentials, then every request is AES-128-CBC
//!   encrypted, SHA-256 signed and tagged with an incrementing sequence number.
//! - **Passthrough** (older firmware): an RSA key exchange delivers an AES key,
//!   a `login_device` call yields a session token, and every request is
//!   wrapped in an encrypted `securePassthrough` envelope.
//!
//! [`TapoClient`] validates the host, picks the protocol (probing the device
//! unless told otherwise), logs in and hands back a [`Plug`].
//!
//! # Example
//!
//! ```no_run
//! use tapo_core::{Credentials, TapoClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tapo_core::Error> {
//!     let client = TapoClient::new(Credentials::new("user@example.com", "password"));
//!     let plug = client.p100("192.168.1.100").await?;
//!
//!     plug.power_on().await?;
//!
//!     let info = plug.get_device_info().await?;
//!     println!(
//!         "{} ({}) is {}",
//!         info.nickname().unwrap_or_default(),
//!         info.model().unwrap_or("unknown"),
//!         if info.device_on() == Some(true) { "on" } else { "off" }
//!     );
//!     Ok(())
//! }
//! ```
//!
//! # Sessions
//!
//! Sessions are never re-established behind the caller's back. When a call
//! fails with an error for which [`Error::requires_login`] is `true` (the
//! device reported code 9999, or a response failed to decrypt), call
//! [`Plug::refresh_session`] and retry.

pub mod client;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod error;
pub mod plug;
pub mod transport;

#[cfg(test)]
mod mock;

pub use client::TapoClient;
pub use credentials::Credentials;
pub use device::DeviceInfo;
pub use error::{DeviceError, Error};
pub use plug::Plug;
pub use transport::{
    DEFAULT_PORT, DEFAULT_TIMEOUT, DeviceConfig, DeviceTransport, EncryptionType, ProtocolPolicy,
    Transport, TransportExt, connect,
};

/// The version of the tapo-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
