//! Device information returned by `get_device_info`.
//!
//! Tapo firmware returns a flat JSON object whose exact field set varies by
//! model and firmware version, so [`DeviceInfo`] keeps the whole object (in
//! the order the device sent it) and offers accessors for the common fields.
//!
//! # Example
//!
//! ```
//! use tapo_core::DeviceInfo;
//!
//! let json = r#"{"device_on":true,"model":"P100","nickname":"TGl2aW5nIFJvb20="}"#;
//! let info: DeviceInfo = serde_json::from_str(json).unwrap();
//! assert_eq!(info.model(), Some("P100"));
//! assert_eq!(info.nickname().as_deref(), Some("Living Room"));
//! ```

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Device state and metadata as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo(Map<String, Value>);

impl DeviceInfo {
    /// Wraps a `get_device_info` result, which must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::ParseError(format!(
                "device info is not an object: {}",
                other
            ))),
        }
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All fields in device order.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the wrapper and returns the underlying object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Whether the relay is on.
    pub fn device_on(&self) -> Option<bool> {
        self.0.get("device_on").and_then(Value::as_bool)
    }

    /// Model name, e.g. `P100`.
    pub fn model(&self) -> Option<&str> {
        self.str_field("model")
    }

    /// User-assigned name. Devices send it base64 encoded; a value that does
    /// not decode to UTF-8 text is returned unchanged.
    pub fn nickname(&self) -> Option<String> {
        self.str_field("nickname").map(decode_base64_text)
    }

    /// Wi-Fi network name (base64 decoded like [`nickname`](Self::nickname)).
    pub fn ssid(&self) -> Option<String> {
        self.str_field("ssid").map(decode_base64_text)
    }

    /// Device ID.
    pub fn device_id(&self) -> Option<&str> {
        self.str_field("device_id")
    }

    /// Firmware version.
    pub fn fw_ver(&self) -> Option<&str> {
        self.str_field("fw_ver")
    }

    /// Hardware version.
    pub fn hw_ver(&self) -> Option<&str> {
        self.str_field("hw_ver")
    }

    /// MAC address.
    pub fn mac(&self) -> Option<&str> {
        self.str_field("mac")
    }

    /// IP address as reported by the device.
    pub fn ip(&self) -> Option<&str> {
        self.str_field("ip")
    }

    /// Signal strength in dBm.
    pub fn rssi(&self) -> Option<i64> {
        self.0.get("rssi").and_then(Value::as_i64)
    }

    /// Signal level bucket (0-3).
    pub fn signal_level(&self) -> Option<i64> {
        self.0.get("signal_level").and_then(Value::as_i64)
    }

    /// Seconds since the relay was last switched on.
    pub fn on_time(&self) -> Option<u64> {
        self.0.get("on_time").and_then(Value::as_u64)
    }

    /// Region/time zone string, e.g. `Europe/Berlin`.
    pub fn region(&self) -> Option<&str> {
        self.str_field("region")
    }
}

fn decode_base64_text(raw: &str) -> String {
    STANDARD
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}
