//! Instrument schema document.
//!
//! Plain serde types mirroring the JSON document an instrument is described
//! by. Loading checks only the document shape; semantic validation (known
//! parameter types, resolvable placeholders, ranges, formats) happens when a
//! [`Commander`](crate::Commander) is built from it.
//!
//! ```json
//! {
//!   "name": "lakeshore",
//!   "connectionProperties": { "type": "stream", "host": "10.0.0.5", "port": 7777,
//!                             "commandTerminator": "\n", "responseTerminator": "\r\n" },
//!   "deviceFailurePattern": "ERR(\\d+)",
//!   "failureMarker": "ERROR",
//!   "parameters": { "temp": { "type": "double", "range": "[0,500]" } },
//!   "commands": { "getTemp": { "commandTemplate": "KRDG? A", "responseTemplate": "(temp)" } }
//! }
//! ```
//!
//! Legacy key names (`paramDefMap`, `commandMap`, `deviceSadRegex`,
//! `errorNotifier`, `paramFormat`, `command`, `responseFormat`, `sadRegex`)
//! are accepted on input; output always uses the current names.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CommanderError, CommanderResult};

/// Root of the schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommanderSchema {
    /// Instrument name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Transport type and settings
    pub connection_properties: ConnectionProperties,
    /// Instrument-wide failure regex
    #[serde(default, alias = "deviceSadRegex", skip_serializing_if = "Option::is_none")]
    pub device_failure_pattern: Option<String>,
    /// Token prepended to rows parsed with a failure pattern
    #[serde(default, alias = "errorNotifier", skip_serializing_if = "Option::is_none")]
    pub failure_marker: Option<String>,
    #[serde(default, alias = "paramDefMap")]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default, alias = "commandMap")]
    pub commands: BTreeMap<String, CommandSpec>,
}

impl CommanderSchema {
    /// Parse a schema document. An unknown transport type is a configuration
    /// error, not a document shape error.
    pub fn from_json_str(json: &str) -> CommanderResult<Self> {
        let document: Value = serde_json::from_str(json)?;
        if let Some(kind) = document
            .pointer("/connectionProperties/type")
            .and_then(Value::as_str)
        {
            if ConnectionProperties::canonical_type(kind).is_none() {
                return Err(CommanderError::config(format!(
                    "unknown connection type \"{}\"",
                    kind
                )));
            }
        }
        Ok(serde_json::from_value(document)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CommanderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_pretty(&self) -> CommanderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json_file(&self, path: impl AsRef<Path>) -> CommanderResult<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

/// Schema entry of one parameter definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    /// Redundant with the map key; must agree with it when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// One of byte, int, long, float, double, boolean, char, string, token, date
    #[serde(rename = "type")]
    pub kind: String,
    /// `(lo,hi)` / `[lo,hi]` interval or `a,b,c` list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// printf-style format, or a `%t` date format for dates
    #[serde(default, alias = "paramFormat", skip_serializing_if = "Option::is_none")]
    pub wire_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Schema entry of one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(alias = "command")]
    pub command_template: String,
    #[serde(default, alias = "responseFormat", skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
    /// Overrides the instrument-wide failure pattern
    #[serde(default, alias = "sadRegex", skip_serializing_if = "Option::is_none")]
    pub failure_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Transport selection. The `type` tag is case-insensitive and also
/// accepts `tcp`, `udp` and `ice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionProperties {
    Stream(StreamSettings),
    Datagram(DatagramSettings),
    Serial(SerialSettings),
    Rpc(RpcSettings),
}

impl ConnectionProperties {
    /// Canonical transport name for a `type` tag, aliases included.
    pub fn canonical_type(tag: &str) -> Option<&'static str> {
        match tag.to_ascii_lowercase().as_str() {
            "stream" | "tcp" => Some("stream"),
            "datagram" | "udp" => Some("datagram"),
            "serial" => Some("serial"),
            "rpc" | "ice" => Some("rpc"),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::Datagram(_) => "datagram",
            Self::Serial(_) => "serial",
            Self::Rpc(_) => "rpc",
        }
    }
}

impl<'de> Deserialize<'de> for ConnectionProperties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = serde_json::Map::deserialize(deserializer)?;
        let tag = match map.remove("type") {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "connection type must be a string, got {}",
                    other
                )))
            }
            None => return Err(D::Error::missing_field("type")),
        };
        let settings = Value::Object(map);
        let result = match Self::canonical_type(&tag) {
            Some("stream") => serde_json::from_value(settings).map(Self::Stream),
            Some("datagram") => serde_json::from_value(settings).map(Self::Datagram),
            Some("serial") => serde_json::from_value(settings).map(Self::Serial),
            Some(_) => serde_json::from_value(settings).map(Self::Rpc),
            None => {
                return Err(D::Error::custom(format!(
                    "unknown connection type \"{}\"",
                    tag
                )))
            }
        };
        result.map_err(D::Error::custom)
    }
}

/// Connection-oriented socket settings.
///
/// The read strategy follows from which keys are present:
/// `responseTerminator`, else `responseLength`, else read until quiet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub host: String,
    #[serde(deserialize_with = "lenient")]
    pub port: u16,
    /// Read timeout in milliseconds
    #[serde(
        rename = "timeout",
        default = "default_timeout_ms",
        deserialize_with = "lenient"
    )]
    pub timeout_ms: u64,
    /// Appended to every rendered command
    #[serde(default)]
    pub command_terminator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_terminator: Option<String>,
    /// Fixed reply length in bytes
    #[serde(
        default,
        deserialize_with = "lenient_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_length: Option<usize>,
}

impl StreamSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_timeout_ms(),
            command_terminator: String::new(),
            response_terminator: None,
            response_length: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_command_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.command_terminator = terminator.into();
        self
    }

    pub fn with_response_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.response_terminator = Some(terminator.into());
        self
    }

    pub fn with_response_length(mut self, length: usize) -> Self {
        self.response_length = Some(length);
        self
    }
}

/// Connectionless socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatagramSettings {
    pub host: String,
    #[serde(deserialize_with = "lenient")]
    pub port: u16,
    #[serde(
        rename = "timeout",
        default = "default_timeout_ms",
        deserialize_with = "lenient"
    )]
    pub timeout_ms: u64,
    #[serde(default)]
    pub command_terminator: String,
    /// Largest reply packet accepted
    #[serde(default = "default_max_buffer", deserialize_with = "lenient")]
    pub max_buffer: usize,
}

impl DatagramSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_timeout_ms(),
            command_terminator: String::new(),
            max_buffer: default_max_buffer(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_command_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.command_terminator = terminator.into();
        self
    }
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    #[serde(
        default = "default_baud_rate",
        alias = "baudrate",
        deserialize_with = "lenient"
    )]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits", alias = "databit", deserialize_with = "lenient")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits", alias = "stopbit", deserialize_with = "lenient")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(
        rename = "timeout",
        default = "default_timeout_ms",
        deserialize_with = "lenient"
    )]
    pub timeout_ms: u64,
    #[serde(default)]
    pub command_terminator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_terminator: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_length: Option<usize>,
}

/// Serial parity. Accepts `none`/`odd`/`even` or the numeric codes 0/1/2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "odd" | "1" => Ok(Self::Odd),
            "even" | "2" => Ok(Self::Even),
            other => Err(format!("unknown parity \"{}\"", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Parity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => s.parse().map_err(D::Error::custom),
            Value::Number(n) => n.to_string().parse().map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("invalid parity {}", other))),
        }
    }
}

/// JSON-RPC transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSettings {
    pub host: String,
    #[serde(deserialize_with = "lenient")]
    pub port: u16,
    #[serde(
        rename = "timeout",
        default = "default_timeout_ms",
        deserialize_with = "lenient"
    )]
    pub timeout_ms: u64,
    /// Remote object name, sent with every call when present
    #[serde(default, alias = "proxyName", skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Command word -> remote method
    #[serde(default)]
    pub methods: BTreeMap<String, RpcMethod>,
    /// Enables the background notification listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackSettings>,
}

impl RpcSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_timeout_ms(),
            proxy: None,
            methods: BTreeMap::new(),
            callback: None,
        }
    }

    pub fn with_method(mut self, word: impl Into<String>, method: RpcMethod) -> Self {
        self.methods.insert(word.into(), method);
        self
    }

    pub fn with_callback(mut self, callback: CallbackSettings) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// One entry of the RPC method table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcMethod {
    /// Remote method name; defaults to the command word
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// Expected argument count, checked before the call
    #[serde(
        default,
        deserialize_with = "lenient_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub arity: Option<usize>,
}

/// Callback listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackSettings {
    /// Remote method registering the callback identity
    #[serde(default = "default_register_method")]
    pub register_method: String,
    /// Callback identity; generated per connection when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            register_method: default_register_method(),
            identity: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_buffer() -> usize {
    4096
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_register_method() -> String {
    "addCallbackClient".to_string()
}

/// Number given either as a JSON number or a numeric string.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + DeserializeOwned,
    T::Err: std::fmt::Display,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().parse().map_err(D::Error::custom),
        other => serde_json::from_value(other).map_err(D::Error::custom),
    }
}

fn lenient_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + DeserializeOwned,
    T::Err: std::fmt::Display,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(D::Error::custom),
        other => serde_json::from_value(other).map(Some).map_err(D::Error::custom),
    }
}
