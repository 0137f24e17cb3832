//! Minimal HTTP/1.1 client used by both Tapo protocols.
//!
//! This uses raw TCP sockets instead of an HTTP client library. Tapo firmware
//! runs a non-compliant HTTP server that rejects lowercase header names, and
//! KLAP handshakes fail when a `Content-Type` header is present. Both are easy
//! to control when the request is written by hand.
//!
//! There is no cookie jar: the only cookie the device hands out,
//! `TP_SESSIONID`, is captured from `Set-Cookie` and replayed explicitly by
//! the caller.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::Error;

/// Session cookie name used by Tapo devices.
pub const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";

/// Base path all device endpoints live under.
pub const APP_PATH: &str = "/app";

/// Upper bound on a device response, headers included.
const MAX_RESPONSE_LEN: usize = 1024 * 1024;

/// A parsed HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Numeric status code.
    pub status: u16,
    /// Response body (de-chunked if needed).
    pub body: Vec<u8>,
    /// Value of the `TP_SESSIONID` cookie, if the response set one.
    pub session_id: Option<String>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with [`Error::HttpStatus`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::HttpStatus(self.status))
        }
    }
}

/// One POST request.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    /// Request target including any query string.
    pub path: &'a str,
    /// Raw body bytes.
    pub body: &'a [u8],
    /// `Content-Type` header; omitted entirely when `None`.
    pub content_type: Option<&'a str>,
    /// `TP_SESSIONID` value to send back.
    pub session_id: Option<&'a str>,
}

impl<'a> HttpRequest<'a> {
    /// A POST with no content type and no cookie.
    pub fn post(path: &'a str, body: &'a [u8]) -> Self {
        Self {
            path,
            body,
            content_type: None,
            session_id: None,
        }
    }

    /// Sets the `Content-Type` header.
    pub fn content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Attaches the session cookie when one is known.
    pub fn session_id(mut self, session_id: Option<&'a str>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// HTTP client bound to one device endpoint.
#[derive(Debug, Clone)]
pub struct HttpClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HttpClient {
    /// Creates a client for `host:port`. Each exchange is bounded by `timeout`.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Device host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Device port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sends a request and reads the full response.
    ///
    /// Connect, write and read all share a single deadline.
    pub async fn send(&self, request: HttpRequest<'_>) -> Result<HttpResponse, Error> {
        let response = timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "no response from {}:{} within {:?}",
                    self.host, self.port, self.timeout
                ))
            })??;

        debug!(
            host = %self.host,
            port = self.port,
            path = request.path,
            status = response.status,
            body_len = response.body.len(),
            "HTTP exchange completed"
        );

        Ok(response)
    }

    async fn exchange(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, Error> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                Error::ConnectionFailed(format!("{}:{}: {}", self.host, self.port, e))
            })?;

        let bytes = encode_request(&self.host, self.port, request);
        stream
            .write_all(&bytes)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("write failed: {}", e)))?;

        let mut raw = Vec::with_capacity(1024);
        let mut buf = [0u8; 4096];
        let mut expected_len = None;

        loop {
            if let Some(header_end) = find_header_end(&raw) {
                let headers = String::from_utf8_lossy(&raw[..header_end]);
                if expected_len.is_none() && !is_chunked(&headers) {
                    if let Some(len) = parse_content_length(&headers) {
                        expected_len = Some(response_len(header_end, len)?);
                    }
                }
                if expected_len.is_some_and(|total| raw.len() >= total) {
                    break;
                }
            }

            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| Error::ConnectionFailed(format!("read failed: {}", e)))?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if raw.len() > MAX_RESPONSE_LEN {
                return Err(Error::Protocol(format!(
                    "response exceeds {} bytes",
                    MAX_RESPONSE_LEN
                )));
            }
        }

        parse_response(&raw)
    }
}

/// Total response size implied by a Content-Length header.
fn response_len(header_end: usize, content_length: usize) -> Result<usize, Error> {
    header_end
        .checked_add(4)
        .and_then(|n| n.checked_add(content_length))
        .filter(|&total| total <= MAX_RESPONSE_LEN)
        .ok_or_else(|| Error::Protocol(format!("Content-Length {} too large", content_length)))
}

fn encode_request(host: &str, port: u16, request: &HttpRequest<'_>) -> Vec<u8> {
    let host_header = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };

    let mut head = format!(
        "POST {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n",
        request.path,
        host_header,
        request.body.len()
    );
    if let Some(content_type) = request.content_type {
        head.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    if let Some(session_id) = request.session_id {
        head.push_str(&format!("Cookie: {}={}\r\n", SESSION_COOKIE_NAME, session_id));
    }
    head.push_str("\r\n");

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(request.body);
    bytes
}

/// Parses a complete raw HTTP response.
pub(crate) fn parse_response(raw: &[u8]) -> Result<HttpResponse, Error> {
    let header_end = find_header_end(raw)
        .ok_or_else(|| Error::Protocol("invalid HTTP response: no header end".into()))?;
    let headers = String::from_utf8_lossy(&raw[..header_end]);
    let status = parse_status_code(&headers)
        .ok_or_else(|| Error::Protocol("invalid HTTP response: no status code".into()))?;

    let mut body = raw[header_end + 4..].to_vec();
    if is_chunked(&headers) {
        body = decode_chunked(&body)?;
    } else if let Some(len) = parse_content_length(&headers) {
        body.truncate(len);
    }

    Ok(HttpResponse {
        status,
        body,
        session_id: parse_session_cookie(&headers),
    })
}

/// Find the position of "\r\n\r\n" in the response (end of headers).
pub(crate) fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the HTTP status code from the response headers.
fn parse_status_code(headers: &str) -> Option<u16> {
    let first_line = headers.lines().next()?;
    if !first_line.starts_with("HTTP/") {
        return None;
    }
    first_line.split_whitespace().nth(1)?.parse().ok()
}

pub(crate) fn header_value<'a>(headers: &'a str, name: &str) -> impl Iterator<Item = &'a str> {
    let name = name.to_ascii_lowercase();
    headers.lines().skip(1).filter_map(move |line| {
        let (key, value) = line.split_once(':')?;
        (key.trim().to_ascii_lowercase() == name).then(|| value.trim())
    })
}

/// Parse the Content-Length header value.
pub(crate) fn parse_content_length(headers: &str) -> Option<usize> {
    header_value(headers, "content-length").find_map(|v| v.parse().ok())
}

fn is_chunked(headers: &str) -> bool {
    header_value(headers, "transfer-encoding").any(|v| v.eq_ignore_ascii_case("chunked"))
}

/// Parse the session cookie from the Set-Cookie headers.
fn parse_session_cookie(headers: &str) -> Option<String> {
    header_value(headers, "set-cookie").find_map(|cookie| {
        cookie.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE_NAME).then(|| value.to_string())
        })
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(data.len());
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| Error::Protocol("truncated chunked body".into()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::Protocol(format!("invalid chunk size: {:?}", size_hex)))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(Error::Protocol("truncated chunked body".into()));
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

/// Validates a user supplied host and splits off an optional port.
///
/// Accepts an IPv4/IPv6 literal, `ip:port`, `[v6]:port`, a DNS name, or
/// `name:port`. Nothing is resolved here.
pub fn parse_endpoint(input: &str, default_port: u16) -> Result<(String, u16), Error> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidHost("host is empty".into()));
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok((ip.to_string(), default_port));
    }
    if let Ok(addr) = input.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(Error::InvalidHost(format!("port 0 in {:?}", input)));
        }
        return Ok((addr.ip().to_string(), addr.port()));
    }

    let (name, port) = match input.rsplit_once(':') {
        Some((name, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::InvalidHost(format!("invalid port in {:?}", input)))?;
            (name, port)
        }
        None => (input, default_port),
    };

    if port == 0 {
        return Err(Error::InvalidHost(format!("port 0 in {:?}", input)));
    }
    if !is_valid_hostname(name) {
        return Err(Error::InvalidHost(format!("{:?} is not an IP address or hostname", input)));
    }
    Ok((name.to_string(), port))
}

fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    // An all-numeric top label is a malformed IP address, not a name.
    let numeric_tld = name
        .rsplit('.')
        .next()
        .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_digit()));
    !name.is_empty()
        && !numeric_tld
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
