//! Schema-driven command/response engine for laboratory instruments.
//!
//! An instrument is described by data: typed parameters, command templates
//! with `(name)` placeholders, and response templates that are compiled
//! into regular expressions at load time. One [`Commander`] per instrument
//! renders commands, sends them over a transport and turns the raw reply
//! back into typed values.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `serial` | ✅ | Serial line transport (tokio-serial) |
//! | `rpc` | ✅ | JSON-RPC transport with callback listener |
//!
//! ## Architecture
//!
//! - **ParameterDefinition**: typed value <-> wire string, range checks
//! - **Command**: template compiler (placeholders, happy/sad patterns)
//! - **CommandInterface**: stream, datagram, serial and RPC transports
//! - **Commander**: the submit state machine tying them together
//!
//! ```no_run
//! use commander_io::{Commander, ParameterValue};
//!
//! # async fn run() -> commander_io::CommanderResult<()> {
//! let mut cryostat = Commander::from_json_file("cryostat.json")?;
//! cryostat.connect().await?;
//! let temp = cryostat.submit("getTemp", &[ParameterValue::Char('A')]).await?;
//! println!("{}", temp);
//! cryostat.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod commander;
pub mod date_format;
pub mod error;
pub mod parameter;
pub mod range;
pub mod schema;
pub mod transport;
pub mod value;
pub mod wire_format;

pub use command::{extract_placeholders, Command};
pub use commander::{split_arguments, Commander, Response, DEFAULT_FAILURE_MARKER};
pub use date_format::{DateFormat, DEFAULT_DATE_FORMAT};
pub use error::{CommanderError, CommanderResult, ParameterError, TransportError, TransportResult};
pub use parameter::{ParameterDefinition, ParameterKind, ParameterRegistry};
pub use range::ValueRange;
pub use schema::{
    CallbackSettings, CommandSpec, CommanderSchema, ConnectionProperties, DatagramSettings,
    Parity, ParameterSpec, RpcMethod, RpcSettings, SerialSettings, StreamSettings,
};
pub use transport::{create_interface, CommandInterface, RawReply, ReadStrategy};
pub use value::{Parameter, ParameterValue};
pub use wire_format::WireFormat;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
