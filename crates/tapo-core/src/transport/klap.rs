//! KLAP transport for newer Tapo firmware.
//!
//! # Protocol Overview
//!
//! 1. **Handshake 1**: client POSTs 16 random bytes to `/app/handshake1`; the
//!    device answers with its own 16-byte seed followed by
//!    `sha256(local_seed ‖ remote_seed ‖ auth_hash)` and sets `TP_SESSIONID`.
//! 2. **Handshake 2**: client proves it knows the credentials by POSTing
//!    `sha256(remote_seed ‖ local_seed ‖ auth_hash)` to `/app/handshake2`.
//! 3. **Request**: every command is encrypted and signed by
//!    [`KlapCipher`] and sent to `/app/request?seq=N`.
//!
//! `auth_hash = sha256(sha1(username) ‖ sha1(password))`
//!
//! Handshake requests must not carry a `Content-Type` header; the device
//! rejects them if they do.

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use tracing::debug;

use crate::{
    Credentials,
    crypto::klap::{
        HANDSHAKE1_RESPONSE_LEN, KlapCipher, SEED_LEN, SIGNATURE_LEN, generate_auth_hash,
        handshake1_server_hash, handshake2_client_hash,
    },
    error::Error,
    transport::{
        EncryptionType, Transport, build_request, check_error_code,
        http::{APP_PATH, HttpClient, HttpRequest},
        take_result,
    },
};

enum KlapState {
    Unauthenticated,
    Handshake1Sent,
    Handshake2Sent,
    Authenticated(KlapCipher),
    Invalid,
}

impl KlapState {
    fn name(&self) -> &'static str {
        match self {
            KlapState::Unauthenticated => "unauthenticated",
            KlapState::Handshake1Sent => "handshake1_sent",
            KlapState::Handshake2Sent => "handshake2_sent",
            KlapState::Authenticated(_) => "authenticated",
            KlapState::Invalid => "invalid",
        }
    }
}

/// Transport using the KLAP protocol over HTTP.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tapo_core::{Credentials, transport::{KlapTransport, Transport, http::HttpClient}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let http = HttpClient::new("192.168.1.100", 80, Duration::from_secs(30));
///     let credentials = Credentials::new("user@example.com", "password");
///     let mut transport = KlapTransport::new(http, credentials);
///     transport.login().await?;
///
///     let info = transport.send("get_device_info", None).await?;
///     println!("{}", info);
///     Ok(())
/// }
/// ```
pub struct KlapTransport {
    http: HttpClient,
    credentials: Credentials,
    state: KlapState,
    session_id: Option<String>,
    #[cfg(test)]
    fixed_local_seed: Option<[u8; SEED_LEN]>,
}

impl KlapTransport {
    /// Creates an unauthenticated transport. Call [`Transport::login`] before sending.
    pub fn new(http: HttpClient, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            state: KlapState::Unauthenticated,
            session_id: None,
            #[cfg(test)]
            fixed_local_seed: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_local_seed(mut self, seed: [u8; SEED_LEN]) -> Self {
        self.fixed_local_seed = Some(seed);
        self
    }

    /// Returns `true` once both handshakes succeeded and the session is usable.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, KlapState::Authenticated(_))
    }

    fn local_seed(&self) -> [u8; SEED_LEN] {
        let mut seed = [0u8; SEED_LEN];
        rand::rng().fill_bytes(&mut seed);
        #[cfg(test)]
        let seed = self.fixed_local_seed.unwrap_or(seed);
        seed
    }

    async fn handshake(&mut self) -> Result<KlapCipher, Error> {
        let local_seed = self.local_seed();
        let auth_hash = generate_auth_hash(&self.credentials);

        debug!(host = %self.http.host(), port = self.http.port(), "Performing KLAP handshake1");

        let path = format!("{}/handshake1", APP_PATH);
        let response = self
            .http
            .send(HttpRequest::post(&path, &local_seed))
            .await?
            .error_for_status()?;
        self.state = KlapState::Handshake1Sent;

        if response.body.len() != HANDSHAKE1_RESPONSE_LEN {
            return Err(Error::InvalidHandshakeLength {
                expected: HANDSHAKE1_RESPONSE_LEN,
                actual: response.body.len(),
            });
        }

        let mut remote_seed = [0u8; SEED_LEN];
        remote_seed.copy_from_slice(&response.body[..SEED_LEN]);
        let server_hash = &response.body[SEED_LEN..];

        if server_hash != handshake1_server_hash(&local_seed, &remote_seed, &auth_hash).as_slice() {
            debug!(host = %self.http.host(), "KLAP server hash mismatch");
            return Err(Error::AuthenticationFailed(
                "device hash did not match; check that the email and password \
                 (both case-sensitive) are correct"
                    .into(),
            ));
        }

        self.session_id = response.session_id;

        debug!(
            host = %self.http.host(),
            has_session = self.session_id.is_some(),
            "Performing KLAP handshake2"
        );

        let client_hash = handshake2_client_hash(&local_seed, &remote_seed, &auth_hash);
        let path = format!("{}/handshake2", APP_PATH);
        self.http
            .send(HttpRequest::post(&path, &client_hash).session_id(self.session_id.as_deref()))
            .await?
            .error_for_status()?;
        self.state = KlapState::Handshake2Sent;

        Ok(KlapCipher::new(&local_seed, &remote_seed, &auth_hash))
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let KlapState::Authenticated(cipher) = &mut self.state else {
            return Err(Error::NotAuthenticated);
        };

        let plaintext = Value::Object(build_request(method, params)).to_string();
        let (payload, seq) = cipher.encrypt(&plaintext);

        debug!(
            host = %self.http.host(),
            port = self.http.port(),
            seq,
            method,
            "Sending KLAP request"
        );

        let path = format!("{}/request?seq={}", APP_PATH, seq);
        let response = self
            .http
            .send(HttpRequest::post(&path, &payload).session_id(self.session_id.as_deref()))
            .await?
            .error_for_status()?;

        if response.body.len() < SIGNATURE_LEN {
            return Err(Error::Protocol(format!(
                "KLAP response too short: {} bytes",
                response.body.len()
            )));
        }

        let KlapState::Authenticated(cipher) = &self.state else {
            return Err(Error::NotAuthenticated);
        };
        let decrypted = cipher.decrypt(seq, &response.body[SIGNATURE_LEN..])?;
        let value: Value = serde_json::from_str(&decrypted)?;

        check_error_code(EncryptionType::Klap, &value)?;
        Ok(take_result(value))
    }
}

#[async_trait]
impl Transport for KlapTransport {
    async fn login(&mut self) -> Result<(), Error> {
        self.state = KlapState::Unauthenticated;
        self.session_id = None;

        match self.handshake().await {
            Ok(cipher) => {
                debug!(host = %self.http.host(), seq = cipher.seq(), "KLAP session established");
                self.state = KlapState::Authenticated(cipher);
                Ok(())
            }
            Err(e) => {
                debug!(
                    host = %self.http.host(),
                    state = self.state.name(),
                    error = %e,
                    "KLAP login failed"
                );
                self.state = KlapState::Invalid;
                Err(e)
            }
        }
    }

    async fn send(&mut self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let result = self.request(method, params).await;
        if let Err(e) = &result {
            if e.requires_login() && self.is_authenticated() {
                debug!(host = %self.http.host(), error = %e, "KLAP session invalidated");
                self.state = KlapState::Invalid;
            }
        }
        result
    }

    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Klap
    }

    fn host(&self) -> &str {
        self.http.host()
    }

    fn port(&self) -> u16 {
        self.http.port()
    }
}

// Implement Debug manually to avoid exposing sensitive session data
impl std::fmt::Debug for KlapTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlapTransport")
            .field("host", &self.http.host())
            .field("port", &self.http.port())
            .field("state", &self.state.name())
            .field("session_id", &"[REDACTED]")
            .finish()
    }
}
