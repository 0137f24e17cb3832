//! Passthrough transport for older Tapo firmware.
//!
//! # Protocol Overview
//!
//! 1. **Handshake**: the client sends a fresh RSA public key to `/app`; the
//!    device replies with an AES key and IV encrypted to that key and sets
//!    `TP_SESSIONID`.
//! 2. **Login**: `login_device` with base64 credentials, wrapped in a
//!    `securePassthrough` envelope. The device returns a session token.
//! 3. **Request**: every command is AES encrypted, wrapped in
//!    `securePassthrough` and POSTed to `/app?token=<token>`.
//!
//! Unlike KLAP, every body here is JSON and carries
//! `Content-Type: application/json`.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::{
    Credentials,
    crypto::passthrough::{HandshakeKeyPair, PassthroughCipher},
    error::Error,
    transport::{
        EncryptionType, Transport, build_request, check_error_code,
        http::{APP_PATH, HttpClient, HttpRequest},
        take_result,
    },
};

const JSON_CONTENT_TYPE: &str = "application/json";

enum PassthroughState {
    Unauthenticated,
    Handshaken(PassthroughCipher),
    LoggedIn {
        cipher: PassthroughCipher,
        token: String,
    },
    Invalid,
}

impl PassthroughState {
    fn name(&self) -> &'static str {
        match self {
            PassthroughState::Unauthenticated => "unauthenticated",
            PassthroughState::Handshaken(_) => "handshaken",
            PassthroughState::LoggedIn { .. } => "logged_in",
            PassthroughState::Invalid => "invalid",
        }
    }
}

/// Transport using the Passthrough protocol over HTTP.
pub struct PassthroughTransport {
    http: HttpClient,
    credentials: Credentials,
    state: PassthroughState,
    session_id: Option<String>,
}

impl PassthroughTransport {
    /// Creates an unauthenticated transport. Call [`Transport::login`] before sending.
    pub fn new(http: HttpClient, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            state: PassthroughState::Unauthenticated,
            session_id: None,
        }
    }

    /// Returns `true` once the handshake and login succeeded.
    pub fn is_logged_in(&self) -> bool {
        matches!(self.state, PassthroughState::LoggedIn { .. })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(Value, Option<String>), Error> {
        let body = body.to_string();
        let response = self
            .http
            .send(
                HttpRequest::post(path, body.as_bytes())
                    .content_type(JSON_CONTENT_TYPE)
                    .session_id(self.session_id.as_deref()),
            )
            .await?
            .error_for_status()?;
        let value = serde_json::from_slice(&response.body)?;
        Ok((value, response.session_id))
    }

    async fn handshake(&mut self) -> Result<PassthroughCipher, Error> {
        let keypair = HandshakeKeyPair::generate().map_err(|e| Error::Protocol(e.to_string()))?;
        let public_key = keypair
            .public_key_base64()
            .map_err(|e| Error::Protocol(e.to_string()))?;

        debug!(
            host = %self.http.host(),
            port = self.http.port(),
            "Performing Passthrough handshake"
        );

        let request = json!({
            "method": "handshake",
            "params": {
                "key": public_key,
                "requestTimeMils": 0,
            },
        });
        let (response, session_id) = self.post_json(APP_PATH, &request).await?;
        check_error_code(EncryptionType::Passthrough, &response)?;

        let encrypted_key = response
            .pointer("/result/key")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("handshake response has no result.key".into()))?;

        self.session_id = Some(session_id.ok_or_else(|| {
            Error::Protocol("handshake response did not set TP_SESSIONID".into())
        })?);

        Ok(keypair.decrypt_session_key(encrypted_key)?)
    }

    async fn login_device(&mut self, cipher: &PassthroughCipher) -> Result<String, Error> {
        let mut request = Map::new();
        request.insert("method".into(), "login_device".into());
        request.insert("params".into(), login_params(&self.credentials));
        request.insert("requestTimeMils".into(), 0.into());

        debug!(host = %self.http.host(), "Performing Passthrough login");

        let response = self.secure_request(cipher, APP_PATH, Value::Object(request)).await?;
        response
            .pointer("/result/token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("login response has no result.token".into()))
    }

    /// Sends one `securePassthrough` envelope and returns the decrypted inner
    /// response after checking both error codes.
    async fn secure_request(
        &self,
        cipher: &PassthroughCipher,
        path: &str,
        inner: Value,
    ) -> Result<Value, Error> {
        let envelope = json!({
            "method": "securePassthrough",
            "params": {
                "request": cipher.encrypt(&inner.to_string()),
            },
        });
        let (outer, _) = self.post_json(path, &envelope).await?;
        check_error_code(EncryptionType::Passthrough, &outer)?;

        let encrypted = outer
            .pointer("/result/response")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("response has no result.response".into()))?;
        let decrypted = cipher.decrypt(encrypted)?;
        let value: Value = serde_json::from_str(&decrypted)?;

        check_error_code(EncryptionType::Passthrough, &value)?;
        Ok(value)
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let PassthroughState::LoggedIn { cipher, token } = &self.state else {
            return Err(Error::NotAuthenticated);
        };

        let mut request = build_request(method, params);
        request.insert("requestTimeMils".into(), 0.into());
        if method == "set_device_info" {
            request.insert("terminalUUID".into(), terminal_uuid().into());
        }

        debug!(
            host = %self.http.host(),
            port = self.http.port(),
            method,
            "Sending Passthrough request"
        );

        let path = format!("{}?token={}", APP_PATH, token);
        let response = self
            .secure_request(cipher, &path, Value::Object(request))
            .await?;
        Ok(take_result(response))
    }
}

#[async_trait]
impl Transport for PassthroughTransport {
    async fn login(&mut self) -> Result<(), Error> {
        self.state = PassthroughState::Unauthenticated;
        self.session_id = None;

        let result = async {
            let cipher = self.handshake().await?;
            self.state = PassthroughState::Handshaken(cipher.clone());
            let token = self.login_device(&cipher).await?;
            Ok::<_, Error>((cipher, token))
        }
        .await;

        match result {
            Ok((cipher, token)) => {
                debug!(host = %self.http.host(), "Passthrough session established");
                self.state = PassthroughState::LoggedIn { cipher, token };
                Ok(())
            }
            Err(e) => {
                debug!(
                    host = %self.http.host(),
                    state = self.state.name(),
                    error = %e,
                    "Passthrough login failed"
                );
                self.state = PassthroughState::Invalid;
                Err(e)
            }
        }
    }

    async fn send(&mut self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let result = self.request(method, params).await;
        if let Err(e) = &result {
            if e.requires_login() && self.is_logged_in() {
                debug!(host = %self.http.host(), error = %e, "Passthrough session invalidated");
                self.state = PassthroughState::Invalid;
            }
        }
        result
    }

    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Passthrough
    }

    fn host(&self) -> &str {
        self.http.host()
    }

    fn port(&self) -> u16 {
        self.http.port()
    }
}

impl std::fmt::Debug for PassthroughTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughTransport")
            .field("host", &self.http.host())
            .field("port", &self.http.port())
            .field("state", &self.state.name())
            .field("session_id", &"[REDACTED]")
            .finish()
    }
}

/// `login_device` parameters: the password base64 encoded and the username
/// as base64 of its lowercase hex SHA-1 digest.
fn login_params(credentials: &Credentials) -> Value {
    let username_digest = hex::encode(Sha1::digest(credentials.username.as_bytes()));
    json!({
        "password": STANDARD.encode(credentials.expose_password()),
        "username": STANDARD.encode(username_digest),
    })
}

/// Random RFC 4122 version 4 UUID in its hyphenated text form.
fn terminal_uuid() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}
