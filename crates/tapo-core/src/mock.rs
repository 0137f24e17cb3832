//! In-process simulated Tapo device for tests.
//!
//! Speaks HTTP/1.1 on a loopback port, one request per connection, and
//! implements the device side of both KLAP and Passthrough using the crate's
//! own cipher engines.

use std::sync::{Arc, Mutex};

use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::{Pkcs1v15Encrypt, RsaPublicKey, pkcs8::DecodePublicKey, rand_core::OsRng};
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    Credentials,
    crypto::{
        klap::{
            KlapCipher, SIGNATURE_LEN, generate_auth_hash, handshake1_server_hash,
            handshake2_client_hash,
        },
        passthrough::PassthroughCipher,
    },
    transport::{
        EncryptionType,
        http::{SESSION_COOKIE_NAME, find_header_end, header_value, parse_content_length},
    },
};

/// Behaviour of a simulated device.
#[derive(Debug, Clone)]
pub(crate) struct MockOptions {
    pub protocol: EncryptionType,
    pub credentials: Credentials,
    pub remote_seed: [u8; 16],
    pub corrupt_server_hash: bool,
    pub handshake1_len: Option<usize>,
    pub handshake1_status: u16,
    pub omit_session_cookie: bool,
}

impl MockOptions {
    pub fn credentials() -> Credentials {
        Credentials::new("a@b.com", "p")
    }

    pub fn klap() -> Self {
        Self {
            protocol: EncryptionType::Klap,
            credentials: Self::credentials(),
            remote_seed: std::array::from_fn(|i| 16 + i as u8),
            corrupt_server_hash: false,
            handshake1_len: None,
            handshake1_status: 200,
            omit_session_cookie: false,
        }
    }

    pub fn passthrough() -> Self {
        Self {
            protocol: EncryptionType::Passthrough,
            ..Self::klap()
        }
    }
}

#[derive(Default)]
struct DeviceState {
    info: Map<String, Value>,
    session_id: Option<String>,
    sessions_issued: u32,
    klap_local_seed: Option<[u8; 16]>,
    klap: Option<KlapCipher>,
    passthrough: Option<PassthroughCipher>,
    token: Option<String>,
    expire_next: bool,
    corrupt_next: bool,
    seen_seqs: Vec<i32>,
    terminal_uuids: Vec<String>,
    saw_content_type: bool,
    probe_count: u32,
    last_component_nego: Option<Value>,
    handshake2_count: u32,
}

impl DeviceState {
    fn new_session_id(&mut self) -> String {
        self.sessions_issued += 1;
        let id = format!("SESSION{:04}", self.sessions_issued);
        self.session_id = Some(id.clone());
        id
    }
}

struct Request {
    target: String,
    content_type: Option<String>,
    session_id: Option<String>,
    body: Vec<u8>,
}

struct Reply {
    status: u16,
    body: Vec<u8>,
    session_id: Option<String>,
}

impl Reply {
    fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            session_id: None,
        }
    }

    fn json(value: Value) -> Self {
        Self::ok(value.to_string().into_bytes())
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            session_id: None,
        }
    }

    fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// A running simulated device. The server task stops when this is dropped.
pub(crate) struct MockDevice {
    port: u16,
    state: Arc<Mutex<DeviceState>>,
    task: JoinHandle<()>,
}

impl MockDevice {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut info = Map::new();
        info.insert("device_on".into(), Value::Bool(true));
        info.insert("model".into(), Value::from("P100"));
        let state = Arc::new(Mutex::new(DeviceState {
            info,
            ..Default::default()
        }));

        let options = Arc::new(options);
        let server_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let options = Arc::clone(&options);
                let state = Arc::clone(&server_state);
                tokio::spawn(async move { serve(stream, &options, &state).await });
            }
        });

        Self { port, state, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Makes the next command fail with error 9999 and drops the session.
    pub fn expire_session(&self) {
        self.state.lock().unwrap().expire_next = true;
    }

    /// Makes the next command reply undecryptable for the client.
    pub fn corrupt_next_response(&self) {
        self.state.lock().unwrap().corrupt_next = true;
    }

    pub fn seen_seqs(&self) -> Vec<i32> {
        self.state.lock().unwrap().seen_seqs.clone()
    }

    pub fn terminal_uuids(&self) -> Vec<String> {
        self.state.lock().unwrap().terminal_uuids.clone()
    }

    pub fn saw_content_type(&self) -> bool {
        self.state.lock().unwrap().saw_content_type
    }

    pub fn probe_count(&self) -> u32 {
        self.state.lock().unwrap().probe_count
    }

    pub fn last_component_nego(&self) -> Option<Value> {
        self.state.lock().unwrap().last_component_nego.clone()
    }

    pub fn handshake2_count(&self) -> u32 {
        self.state.lock().unwrap().handshake2_count
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A loopback port with nothing listening on it.
pub(crate) async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(mut stream: TcpStream, options: &MockOptions, state: &Mutex<DeviceState>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let reply = {
        let mut state = state.lock().unwrap();
        route(options, &mut state, &request)
    };

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        if reply.status == 200 { "OK" } else { "Error" },
        reply.body.len()
    );
    if let Some(session_id) = reply.session_id {
        head.push_str(&format!(
            "Set-Cookie: {}={};TIMEOUT=1440\r\n",
            SESSION_COOKIE_NAME, session_id
        ));
    }
    head.push_str("\r\n");

    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&reply.body).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        if let Some(end) = find_header_end(&raw) {
            let head = String::from_utf8_lossy(&raw[..end]).to_string();
            let len = parse_content_length(&head).unwrap_or(0);
            if raw.len() >= end + 4 + len {
                let target = head.lines().next()?.split_whitespace().nth(1)?.to_string();
                let session_id = header_value(&head, "cookie").find_map(|cookie| {
                    cookie.split(';').find_map(|pair| {
                        pair.trim()
                            .strip_prefix(SESSION_COOKIE_NAME)
                            .and_then(|rest| rest.strip_prefix('='))
                            .map(str::to_string)
                    })
                });
                return Some(Request {
                    target,
                    content_type: header_value(&head, "content-type").next().map(str::to_string),
                    session_id,
                    body: raw[end + 4..end + 4 + len].to_vec(),
                });
            }
        }
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);
    }
}

fn route(options: &MockOptions, state: &mut DeviceState, request: &Request) -> Reply {
    let (path, query) = request
        .target
        .split_once('?')
        .unwrap_or((request.target.as_str(), ""));

    if path != "/app" && request.content_type.is_some() {
        state.saw_content_type = true;
    }

    match (options.protocol, path) {
        (_, "/app") => app(options, state, request, query),
        (EncryptionType::Klap, "/app/handshake1") => klap_handshake1(options, state, request),
        (EncryptionType::Klap, "/app/handshake2") => klap_handshake2(options, state, request),
        (EncryptionType::Klap, "/app/request") => klap_request(state, request, query),
        _ => Reply::status(404),
    }
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

fn klap_handshake1(options: &MockOptions, state: &mut DeviceState, request: &Request) -> Reply {
    let Ok(local_seed) = <[u8; 16]>::try_from(request.body.as_slice()) else {
        return Reply::status(400);
    };

    let auth_hash = generate_auth_hash(&options.credentials);
    let mut server_hash = handshake1_server_hash(&local_seed, &options.remote_seed, &auth_hash);
    if options.corrupt_server_hash {
        server_hash[0] ^= 0xff;
    }

    let mut body = options.remote_seed.to_vec();
    body.extend_from_slice(&server_hash);
    if let Some(len) = options.handshake1_len {
        body.resize(len, 0);
    }

    state.klap = None;
    state.klap_local_seed = Some(local_seed);
    let session_id = state.new_session_id();

    Reply {
        status: options.handshake1_status,
        body,
        session_id: Some(session_id),
    }
}

fn klap_handshake2(options: &MockOptions, state: &mut DeviceState, request: &Request) -> Reply {
    state.handshake2_count += 1;

    let Some(local_seed) = state.klap_local_seed else {
        return Reply::status(400);
    };
    if request.session_id != state.session_id {
        return Reply::status(403);
    }

    let auth_hash = generate_auth_hash(&options.credentials);
    if request.body != handshake2_client_hash(&local_seed, &options.remote_seed, &auth_hash) {
        return Reply::status(403);
    }

    state.klap = Some(KlapCipher::new(&local_seed, &options.remote_seed, &auth_hash));
    Reply::ok(Vec::new())
}

fn klap_request(state: &mut DeviceState, request: &Request, query: &str) -> Reply {
    let Some(cipher) = state.klap.clone() else {
        return Reply::status(403);
    };
    if request.session_id != state.session_id {
        return Reply::status(403);
    }
    let Some(seq) = query_param(query, "seq").and_then(|s| s.parse::<i32>().ok()) else {
        return Reply::status(400);
    };
    state.seen_seqs.push(seq);

    if request.body.len() < SIGNATURE_LEN {
        return Reply::status(400);
    }
    let Ok(plaintext) = cipher.decrypt(seq, &request.body[SIGNATURE_LEN..]) else {
        return Reply::status(400);
    };
    let Ok(command) = serde_json::from_str::<Value>(&plaintext) else {
        return Reply::status(400);
    };

    let response = if state.expire_next {
        state.expire_next = false;
        state.klap = None;
        json!({ "error_code": 9999 })
    } else {
        execute(state, &command)
    };

    if std::mem::take(&mut state.corrupt_next) {
        // Not a whole AES block, so it can never decrypt.
        let mut body = vec![0u8; SIGNATURE_LEN];
        body.extend_from_slice(&[0xa5; 15]);
        return Reply::ok(body);
    }
    Reply::ok(cipher.seal(seq, response.to_string().as_bytes()))
}

fn app(options: &MockOptions, state: &mut DeviceState, request: &Request, query: &str) -> Reply {
    let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
        return Reply::status(400);
    };
    let method = body["method"].as_str().unwrap_or_default();

    if method == "component_nego" {
        state.probe_count += 1;
        state.last_component_nego = Some(body.clone());
        return match options.protocol {
            EncryptionType::Klap => Reply::json(json!({ "error_code": 1003 })),
            EncryptionType::Passthrough => Reply::json(json!({
                "error_code": 0,
                "result": { "component_list": [{ "id": "device", "ver_code": 2 }] },
            })),
        };
    }
    if options.protocol == EncryptionType::Klap {
        return Reply::json(json!({ "error_code": 1003 }));
    }

    match method {
        "handshake" => passthrough_handshake(options, state, &body),
        "securePassthrough" => secure_passthrough(options, state, request, &body, query),
        _ => Reply::json(json!({ "error_code": 1002 })),
    }
}

fn passthrough_handshake(options: &MockOptions, state: &mut DeviceState, body: &Value) -> Reply {
    let Some(public_key) = body["params"]["key"]
        .as_str()
        .and_then(|key| STANDARD.decode(key).ok())
        .and_then(|der| RsaPublicKey::from_public_key_der(&der).ok())
    else {
        return Reply::json(json!({ "error_code": -1010 }));
    };

    let session_key: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(7).wrapping_add(3)).collect();
    let Ok(sealed) = public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, &session_key) else {
        return Reply::status(500);
    };
    let Ok(cipher) = PassthroughCipher::from_session_key(&session_key) else {
        return Reply::status(500);
    };

    state.passthrough = Some(cipher);
    state.token = None;
    let session_id = state.new_session_id();

    Reply::json(json!({ "error_code": 0, "result": { "key": STANDARD.encode(sealed) } }))
        .with_session((!options.omit_session_cookie).then_some(session_id))
}

fn secure_passthrough(
    options: &MockOptions,
    state: &mut DeviceState,
    request: &Request,
    body: &Value,
    query: &str,
) -> Reply {
    let Some(cipher) = state.passthrough.clone() else {
        return Reply::json(json!({ "error_code": -1501 }));
    };
    if request.session_id.is_none() || request.session_id != state.session_id {
        return Reply::json(json!({ "error_code": -1501 }));
    }
    let Some(command) = body["params"]["request"]
        .as_str()
        .and_then(|encoded| cipher.decrypt(encoded).ok())
        .and_then(|plaintext| serde_json::from_str::<Value>(&plaintext).ok())
    else {
        return Reply::json(json!({ "error_code": -1003 }));
    };

    let response = if command["method"] == "login_device" {
        login_device(options, state, &command)
    } else if state.token.is_none() || query_param(query, "token") != state.token.as_deref() {
        json!({ "error_code": -1501 })
    } else if state.expire_next {
        state.expire_next = false;
        state.token = None;
        json!({ "error_code": 9999 })
    } else {
        execute(state, &command)
    };

    let sealed = if std::mem::take(&mut state.corrupt_next) {
        "%%not-base64%%".to_string()
    } else {
        cipher.encrypt(&response.to_string())
    };
    Reply::json(json!({
        "error_code": 0,
        "result": { "response": sealed },
    }))
}

fn login_device(options: &MockOptions, state: &mut DeviceState, command: &Value) -> Value {
    let username_hash = Sha1::digest(options.credentials.username.as_bytes());
    let username = STANDARD.encode(hex::encode(username_hash));
    let password = STANDARD.encode(options.credentials.expose_password());

    if command["params"]["username"] != username.as_str()
        || command["params"]["password"] != password.as_str()
    {
        return json!({ "error_code": -1501 });
    }

    let token = format!("TOKEN{:04}", state.sessions_issued);
    state.token = Some(token.clone());
    json!({ "error_code": 0, "result": { "token": token } })
}

fn execute(state: &mut DeviceState, command: &Value) -> Value {
    match command["method"].as_str() {
        Some("get_device_info") => json!({ "error_code": 0, "result": state.info.clone() }),
        Some("set_device_info") => {
            if let Some(uuid) = command["terminalUUID"].as_str() {
                state.terminal_uuids.push(uuid.to_string());
            }
            let Some(params) = command["params"].as_object() else {
                return json!({ "error_code": -1008 });
            };
            for (key, value) in params {
                state.info.insert(key.clone(), value.clone());
            }
            json!({ "error_code": 0 })
        }
        _ => json!({ "error_code": -1002 }),
    }
}
