//! Transports.
//!
//! A [`CommandInterface`] moves rendered command strings to an instrument
//! and brings raw replies back. Implementations:
//!
//! | Type | Transport | Feature |
//! |------|-----------|---------|
//! | `stream` | [`StreamInterface`] (TCP) | always |
//! | `datagram` | [`DatagramInterface`] (UDP) | always |
//! | `serial` | [`SerialInterface`] | `serial` |
//! | `rpc` | [`RpcInterface`] (JSON-RPC over TCP) | `rpc` |

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{TransportError, TransportResult};
use crate::schema::ConnectionProperties;
use crate::value::Parameter;

pub mod datagram;
pub mod read;
#[cfg(feature = "rpc")]
pub mod rpc;
#[cfg(feature = "serial")]
pub mod serial;
pub mod stream;

pub use datagram::DatagramInterface;
pub use read::{ReadStrategy, ReplyReader};
#[cfg(feature = "rpc")]
pub use rpc::{JsonRpcConnector, RpcConnector, RpcInterface, RpcProxy};
#[cfg(feature = "serial")]
pub use serial::SerialInterface;
pub use stream::StreamInterface;

/// Raw reply of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    /// Text to be parsed with the command patterns
    Text(String),
    /// Non-textual RPC result, passed through as is
    Value(Value),
}

/// Transport contract shared by every instrument connection.
///
/// At most one request is in flight at a time; every method takes
/// `&mut self`.
#[async_trait]
pub trait CommandInterface: Send {
    /// Transport type name
    fn transport_type(&self) -> &'static str;

    /// Human readable endpoint, used in logs and errors
    fn endpoint(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Open the connection. Calling it while connected is a no-op.
    async fn connect(&mut self) -> TransportResult<()>;

    /// Close the connection. Calling it while disconnected is a no-op.
    async fn disconnect(&mut self) -> TransportResult<()>;

    /// Send a command without waiting for a reply.
    async fn send_command(&mut self, command: &str, args: &[Parameter]) -> TransportResult<()>;

    /// Send a command and read its reply.
    async fn send_request(&mut self, command: &str, args: &[Parameter])
        -> TransportResult<RawReply>;

    /// Unsolicited messages pushed by the instrument, if the transport
    /// carries any.
    fn notifications(&self) -> Option<broadcast::Receiver<Value>> {
        None
    }
}

/// Build the transport described by `properties`.
pub fn create_interface(
    properties: &ConnectionProperties,
) -> TransportResult<Box<dyn CommandInterface>> {
    match properties {
        ConnectionProperties::Stream(settings) => {
            Ok(Box::new(StreamInterface::new(settings.clone())))
        }
        ConnectionProperties::Datagram(settings) => {
            Ok(Box::new(DatagramInterface::new(settings.clone())))
        }
        #[cfg(feature = "serial")]
        ConnectionProperties::Serial(settings) => {
            Ok(Box::new(SerialInterface::new(settings.clone())?))
        }
        #[cfg(not(feature = "serial"))]
        ConnectionProperties::Serial(_) => Err(TransportError::Configuration(
            "serial transport requires the `serial` feature".to_string(),
        )),
        #[cfg(feature = "rpc")]
        ConnectionProperties::Rpc(settings) => Ok(Box::new(RpcInterface::new(settings.clone()))),
        #[cfg(not(feature = "rpc"))]
        ConnectionProperties::Rpc(_) => Err(TransportError::Configuration(
            "rpc transport requires the `rpc` feature".to_string(),
        )),
    }
}

/// Append the command terminator to a rendered command.
pub(crate) fn frame(command: &str, terminator: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + terminator.len());
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(terminator.as_bytes());
    bytes
}

/// Reply bytes as text. Invalid UTF-8 is replaced and logged.
pub(crate) fn decode_reply(bytes: &[u8], endpoint: &str) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(
                "Reply from {} is not valid UTF-8 ({}), replacing invalid bytes",
                endpoint, e
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

pub(crate) fn not_connected<T>() -> TransportResult<T> {
    Err(TransportError::NotConnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DatagramSettings, StreamSettings};

    #[test]
    fn test_create_interface() {
        let stream = create_interface(&ConnectionProperties::Stream(StreamSettings::new(
            "127.0.0.1",
            7000,
        )))
        .unwrap();
        assert_eq!(stream.transport_type(), "stream");
        assert_eq!(stream.endpoint(), "127.0.0.1:7000");
        assert!(!stream.is_connected());

        let datagram = create_interface(&ConnectionProperties::Datagram(
            DatagramSettings::new("127.0.0.1", 7001),
        ))
        .unwrap();
        assert_eq!(datagram.transport_type(), "datagram");
    }

    #[test]
    fn test_decode_reply() {
        assert_eq!(decode_reply(b"+4.20K", "mock"), "+4.20K");
        assert_eq!(decode_reply(b"T=\xc3\x28", "mock"), "T=\u{fffd}(");
    }

    #[test]
    fn test_byte_transports_have_no_notifications() {
        let stream = create_interface(&ConnectionProperties::Stream(StreamSettings::new(
            "127.0.0.1",
            7000,
        )))
        .unwrap();
        assert!(stream.notifications().is_none());
    }

    #[test]
    fn test_frame() {
        assert_eq!(frame("*IDN?", "\r\n"), b"*IDN?\r\n".to_vec());
        assert_eq!(frame("STOP", ""), b"STOP".to_vec());
    }
}
