//! The instrument commander.
//!
//! A [`Commander`] owns the compiled schema of one instrument and its
//! transport, and runs the submit cycle:
//!
//! 1. resolve the command
//! 2. marshal the arguments positionally (arity is checked before any I/O)
//! 3. render the command string
//! 4. send it, fire-and-forget when no reply is configured
//! 5. parse the reply with the happy pattern, then the failure pattern
//! 6. collapse the rows into a [`Response`]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::command::{compile_pattern, Command};
use crate::error::{CommanderError, CommanderResult, ParameterError, TransportError};
use crate::parameter::{ParameterDefinition, ParameterRegistry};
use crate::schema::{CommanderSchema, ConnectionProperties};
use crate::transport::{create_interface, CommandInterface, RawReply};
use crate::value::{Parameter, ParameterValue};

/// Marker prepended to failure rows when the schema sets none.
pub const DEFAULT_FAILURE_MARKER: &str = "ERROR";

/// Result of a submit.
///
/// One row of one value collapses to [`Response::Value`], one row of
/// several values to [`Response::Row`]; more rows stay [`Response::Rows`].
/// Use [`Response::into_rows`] for a shape-independent view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Fire-and-forget command
    None,
    Value(ParameterValue),
    Row(Vec<ParameterValue>),
    Rows(Vec<Vec<ParameterValue>>),
}

impl Response {
    /// Collapse parsed rows.
    pub fn from_rows(mut rows: Vec<Vec<ParameterValue>>) -> Self {
        match rows.len() {
            0 => Self::None,
            1 => {
                let mut row = rows.remove(0);
                if row.len() == 1 {
                    Self::Value(row.remove(0))
                } else {
                    Self::Row(row)
                }
            }
            _ => Self::Rows(rows),
        }
    }

    pub fn into_rows(self) -> Vec<Vec<ParameterValue>> {
        match self {
            Self::None => Vec::new(),
            Self::Value(v) => vec![vec![v]],
            Self::Row(row) => vec![row],
            Self::Rows(rows) => rows,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_value(&self) -> Option<&ParameterValue> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the first row was produced by a failure pattern.
    pub fn is_failure(&self, marker: &str) -> bool {
        let first = match self {
            Self::None => None,
            Self::Value(v) => Some(v),
            Self::Row(row) => row.first(),
            Self::Rows(rows) => rows.first().and_then(|r| r.first()),
        };
        matches!(first, Some(ParameterValue::String(s)) if s == marker)
    }
}

fn write_row(f: &mut std::fmt::Formatter<'_>, row: &[ParameterValue]) -> std::fmt::Result {
    f.write_str("[")?;
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", value)?;
    }
    f.write_str("]")
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Value(v) => write!(f, "{}", v),
            Self::Row(row) => write_row(f, row),
            Self::Rows(rows) => {
                f.write_str("[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_row(f, row)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Command/response engine for one instrument.
pub struct Commander {
    name: String,
    description: Option<String>,
    connection: ConnectionProperties,
    device_failure_pattern: Option<String>,
    failure_marker: Option<String>,
    registry: Arc<ParameterRegistry>,
    parameters: BTreeMap<String, Arc<ParameterDefinition>>,
    commands: BTreeMap<String, Command>,
    interface: Box<dyn CommandInterface>,
    connected: bool,
}

impl std::fmt::Debug for Commander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commander")
            .field("name", &self.name)
            .field("transport", &self.interface.transport_type())
            .field("endpoint", &self.interface.endpoint())
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("connected", &self.connected)
            .finish()
    }
}

impl Commander {
    /// Validate a schema and build the commander and its transport.
    ///
    /// Every problem of the schema (unknown type or parameter, malformed
    /// range or format, invalid pattern, unusable transport settings) is
    /// reported here as [`CommanderError::InvalidConfiguration`].
    pub fn from_schema(
        schema: CommanderSchema,
        registry: Arc<ParameterRegistry>,
    ) -> CommanderResult<Self> {
        let interface = create_interface(&schema.connection_properties).map_err(|e| match e {
            TransportError::Configuration(msg) => CommanderError::InvalidConfiguration(msg),
            other => CommanderError::Transport(other),
        })?;
        Self::build(schema, registry, interface)
    }

    /// Like [`Commander::from_schema`] with a caller-provided transport.
    pub fn with_interface(
        schema: CommanderSchema,
        registry: Arc<ParameterRegistry>,
        interface: Box<dyn CommandInterface>,
    ) -> CommanderResult<Self> {
        Self::build(schema, registry, interface)
    }

    /// Load a schema file and build a commander with the built-in registry.
    pub fn from_json_file(path: impl AsRef<Path>) -> CommanderResult<Self> {
        let schema = CommanderSchema::from_json_file(path)?;
        Self::from_schema(schema, Arc::new(ParameterRegistry::builtin()))
    }

    fn build(
        schema: CommanderSchema,
        registry: Arc<ParameterRegistry>,
        interface: Box<dyn CommandInterface>,
    ) -> CommanderResult<Self> {
        debug!("Validating schema for '{}'", schema.name);

        let parameters = schema
            .parameters
            .iter()
            .map(|(name, spec)| {
                ParameterDefinition::from_spec(name, spec).map(|d| (name.clone(), Arc::new(d)))
            })
            .collect::<CommanderResult<BTreeMap<_, _>>>()?;

        let device_failure = schema
            .device_failure_pattern
            .as_deref()
            .filter(|p| !p.is_empty());
        if let Some(pattern) = device_failure {
            compile_pattern(pattern).map_err(|e| {
                CommanderError::config(format!("device failure pattern does not compile: {}", e))
            })?;
        }

        let lookup = |name: &str| {
            parameters
                .get(name)
                .or_else(|| registry.get(name))
                .cloned()
        };
        let commands = schema
            .commands
            .iter()
            .map(|(name, spec)| {
                if let Some(inner) = spec.name.as_deref() {
                    if inner != name {
                        return Err(CommanderError::config(format!(
                            "command \"{}\" is declared under key \"{}\"",
                            inner, name
                        )));
                    }
                }
                Command::compile(name, spec, lookup, device_failure).map(|c| (name.clone(), c))
            })
            .collect::<CommanderResult<BTreeMap<_, _>>>()?;

        info!(
            "Loaded '{}': {} parameters, {} commands over {}",
            schema.name,
            parameters.len(),
            commands.len(),
            schema.connection_properties.kind()
        );

        Ok(Self {
            name: schema.name,
            description: schema.description,
            connection: schema.connection_properties,
            device_failure_pattern: schema.device_failure_pattern,
            failure_marker: schema.failure_marker,
            registry,
            parameters,
            commands,
            interface,
            connected: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn connection_properties(&self) -> &ConnectionProperties {
        &self.connection
    }

    pub fn failure_marker(&self) -> &str {
        self.failure_marker
            .as_deref()
            .unwrap_or(DEFAULT_FAILURE_MARKER)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn interface(&self) -> &dyn CommandInterface {
        self.interface.as_ref()
    }

    /// Receive unsolicited instrument messages, such as RPC callback
    /// notifications. `None` when the transport has none. Subscribe before
    /// `connect` to see messages sent during the handshake.
    pub fn subscribe_notifications(&self) -> Option<broadcast::Receiver<Value>> {
        self.interface.notifications()
    }

    pub fn registry(&self) -> &Arc<ParameterRegistry> {
        &self.registry
    }

    pub async fn connect(&mut self) -> CommanderResult<()> {
        if self.connected {
            debug!("'{}' is already connected", self.name);
            return Ok(());
        }
        self.interface.connect().await?;
        self.connected = true;
        info!("Connected to '{}' at {}", self.name, self.interface.endpoint());
        Ok(())
    }

    pub async fn disconnect(&mut self) -> CommanderResult<()> {
        if !self.connected {
            debug!("'{}' is already disconnected", self.name);
            return Ok(());
        }
        self.interface.disconnect().await?;
        self.connected = false;
        info!("Disconnected from '{}'", self.name);
        Ok(())
    }

    /// Submit a command with typed arguments.
    pub async fn submit(
        &mut self,
        command: &str,
        args: &[ParameterValue],
    ) -> CommanderResult<Response> {
        self.execute(command, |cmd| cmd.marshal(args)).await
    }

    /// Submit a command with arguments given as wire strings.
    pub async fn submit_strings<S: AsRef<str>>(
        &mut self,
        command: &str,
        args: &[S],
    ) -> CommanderResult<Response> {
        self.execute(command, |cmd| cmd.demarshal(args)).await
    }

    /// Submit a command with a comma separated argument list.
    pub async fn submit_line(&mut self, command: &str, line: &str) -> CommanderResult<Response> {
        let args = split_arguments(line);
        self.submit_strings(command, &args).await
    }

    async fn execute<F>(&mut self, name: &str, prepare: F) -> CommanderResult<Response>
    where
        F: FnOnce(&Command) -> Result<Vec<Parameter>, ParameterError>,
    {
        if !self.connected {
            return Err(CommanderError::NotConnected(self.name.clone()));
        }
        debug!("Submitting command {}", name);
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| CommanderError::UnknownCommand(name.to_string()))?;
        let args = prepare(command)?;
        let rendered = command.render(&args)?;

        if !command.expects_reply() {
            self.interface.send_command(&rendered, &args).await?;
            return Ok(Response::None);
        }

        match self.interface.send_request(&rendered, &args).await? {
            RawReply::Text(reply) => {
                parse_reply(command, &reply, self.failure_marker.as_deref())
            }
            RawReply::Value(value) => Ok(Response::Value(ParameterValue::Opaque(value))),
        }
    }

    /// Parse a raw reply as `command` would, without any I/O.
    pub fn parse_reply(&self, command: &str, reply: &str) -> CommanderResult<Response> {
        parse_reply(self.command(command)?, reply, self.failure_marker.as_deref())
    }

    pub fn command(&self, name: &str) -> CommanderResult<&Command> {
        self.commands
            .get(name)
            .ok_or_else(|| CommanderError::UnknownCommand(name.to_string()))
    }

    /// Definition by name: schema-declared first, then built-in.
    pub fn parameter_definition(&self, name: &str) -> CommanderResult<Arc<ParameterDefinition>> {
        self.parameters
            .get(name)
            .or_else(|| self.registry.get(name))
            .cloned()
            .ok_or_else(|| ParameterError::UnknownParameter(name.to_string()).into())
    }

    pub fn commands(&self) -> &BTreeMap<String, Command> {
        &self.commands
    }

    /// Schema-declared parameter definitions.
    pub fn parameters(&self) -> &BTreeMap<String, Arc<ParameterDefinition>> {
        &self.parameters
    }

    /// Rebuild the schema document. Derived state is not part of it.
    pub fn to_schema(&self) -> CommanderSchema {
        CommanderSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            connection_properties: self.connection.clone(),
            device_failure_pattern: self.device_failure_pattern.clone(),
            failure_marker: self.failure_marker.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|(name, def)| (name.clone(), def.to_spec()))
                .collect(),
            commands: self
                .commands
                .iter()
                .map(|(name, cmd)| (name.clone(), cmd.to_spec()))
                .collect(),
        }
    }
}

fn parse_reply(
    command: &Command,
    reply: &str,
    marker: Option<&str>,
) -> CommanderResult<Response> {
    debug!("Parsing reply to {}: {:?}", command.name(), reply);
    if !command.expects_reply() {
        return Err(CommanderError::NoResponseConfigured(command.name().to_string()));
    }
    let mut rows = command.match_happy(reply)?;
    if rows.is_empty() {
        rows = command.match_sad(reply, marker.unwrap_or(DEFAULT_FAILURE_MARKER));
    }
    if rows.is_empty() {
        return Err(CommanderError::NoMatch {
            command: command.name().to_string(),
            response: reply.to_string(),
        });
    }
    Ok(Response::from_rows(rows))
}

/// Split a console argument line on commas; blank means no arguments.
pub fn split_arguments(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    line.split(',').map(|a| a.trim_start().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::TransportResult;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        sent: Vec<String>,
        replies: VecDeque<RawReply>,
    }

    /// In-memory transport replaying canned replies.
    struct ScriptedInterface {
        script: Arc<Mutex<Script>>,
        connected: bool,
    }

    #[async_trait]
    impl CommandInterface for ScriptedInterface {
        fn transport_type(&self) -> &'static str {
            "scripted"
        }

        fn endpoint(&self) -> String {
            "memory".to_string()
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn connect(&mut self) -> TransportResult<()> {
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> TransportResult<()> {
            self.connected = false;
            Ok(())
        }

        async fn send_command(&mut self, command: &str, _args: &[Parameter]) -> TransportResult<()> {
            self.script.lock().unwrap().sent.push(command.to_string());
            Ok(())
        }

        async fn send_request(
            &mut self,
            command: &str,
            _args: &[Parameter],
        ) -> TransportResult<RawReply> {
            let mut script = self.script.lock().unwrap();
            script.sent.push(command.to_string());
            script.replies.pop_front().ok_or(TransportError::EmptyResponse {
                endpoint: "memory".to_string(),
                timeout_ms: 0,
            })
        }
    }

    const SCHEMA: &str = r#"{
        "name": "cryostat",
        "connectionProperties": { "type": "stream", "host": "127.0.0.1", "port": 9 },
        "deviceFailurePattern": "ERR(\\d+)",
        "parameters": {
            "temp": { "type": "double", "range": "[0,500]", "description": "Kelvin" },
            "channel": { "type": "char", "range": "A,B" }
        },
        "commands": {
            "getTemp": { "commandTemplate": "KRDG? (channel)", "responseTemplate": "(temp)K" },
            "setPoint": { "commandTemplate": "SETP (channel),(temp)" },
            "list": { "commandTemplate": "LIST", "responseTemplate": "(channel)=(temp);" },
            "pair": { "commandTemplate": "PAIR", "responseTemplate": "(channel) (temp)" }
        }
    }"#;

    fn commander(replies: &[&str]) -> (Commander, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script {
            sent: Vec::new(),
            replies: replies.iter().map(|r| RawReply::Text(r.to_string())).collect(),
        }));
        let interface = ScriptedInterface {
            script: script.clone(),
            connected: false,
        };
        let commander = Commander::with_interface(
            CommanderSchema::from_json_str(SCHEMA).unwrap(),
            Arc::new(ParameterRegistry::builtin()),
            Box::new(interface),
        )
        .unwrap();
        (commander, script)
    }

    #[test]
    fn test_response_collapse() {
        let v = ParameterValue::Int(1);
        assert_eq!(Response::from_rows(vec![vec![v.clone()]]), Response::Value(v.clone()));
        assert_eq!(
            Response::from_rows(vec![vec![v.clone(), v.clone()]]),
            Response::Row(vec![v.clone(), v.clone()])
        );
        let rows = vec![vec![v.clone()], vec![v.clone()]];
        assert_eq!(Response::from_rows(rows.clone()), Response::Rows(rows.clone()));
        assert_eq!(Response::from_rows(rows.clone()).into_rows(), rows);
        assert_eq!(Response::Value(v.clone()).into_rows(), vec![vec![v]]);
    }

    #[test]
    fn test_response_display() {
        let row = vec![ParameterValue::String("A".into()), ParameterValue::Double(1.5)];
        assert_eq!(Response::Row(row.clone()).to_string(), "[A, 1.5]");
        assert_eq!(
            Response::Rows(vec![row.clone(), row]).to_string(),
            "[[A, 1.5], [A, 1.5]]"
        );
        assert_eq!(Response::None.to_string(), "");
    }

    #[test]
    fn test_split_arguments() {
        assert_eq!(split_arguments("A, 12.5"), vec!["A", "12.5"]);
        assert_eq!(split_arguments("A,B"), vec!["A", "B"]);
        assert!(split_arguments("   ").is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_connection() {
        let (mut commander, script) = commander(&[]);
        assert!(matches!(
            commander.submit("getTemp", &['A'.into()]).await,
            Err(CommanderError::NotConnected(_))
        ));
        commander.connect().await.unwrap();
        commander.connect().await.unwrap();
        assert!(matches!(
            commander.submit("nope", &[]).await,
            Err(CommanderError::UnknownCommand(_))
        ));
        commander.disconnect().await.unwrap();
        commander.disconnect().await.unwrap();
        assert!(script.lock().unwrap().sent.is_empty());
    }

    #[tokio::test]
    async fn test_scalar_reply() {
        let (mut commander, script) = commander(&["+292.286E+0K"]);
        commander.connect().await.unwrap();
        let response = commander.submit("getTemp", &['A'.into()]).await.unwrap();
        assert_eq!(response, Response::Value(ParameterValue::Double(292.286)));
        assert_eq!(script.lock().unwrap().sent, vec!["KRDG? A"]);
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let (mut commander, _) = commander(&["ERR12"]);
        commander.connect().await.unwrap();
        let response = commander.submit("getTemp", &['B'.into()]).await.unwrap();
        assert_eq!(
            response,
            Response::Row(vec![
                ParameterValue::String("ERROR".into()),
                ParameterValue::String("12".into())
            ])
        );
        assert!(response.is_failure(commander.failure_marker()));
    }

    #[tokio::test]
    async fn test_no_match() {
        let (mut commander, _) = commander(&["garbage"]);
        commander.connect().await.unwrap();
        assert!(matches!(
            commander.submit("getTemp", &['A'.into()]).await,
            Err(CommanderError::NoMatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_arity_checked_before_io() {
        let (mut commander, script) = commander(&["1.0K"]);
        commander.connect().await.unwrap();
        let cases: [Vec<ParameterValue>; 2] = [vec![], vec!['A'.into(), 'B'.into()]];
        for args in cases {
            assert!(matches!(
                commander.submit("getTemp", &args).await,
                Err(CommanderError::InvalidParameter(ParameterError::ArityMismatch { .. }))
            ));
        }
        assert!(matches!(
            commander.submit("getTemp", &['C'.into()]).await,
            Err(CommanderError::InvalidParameter(ParameterError::OutOfRange { .. }))
        ));
        assert!(script.lock().unwrap().sent.is_empty());
    }

    #[tokio::test]
    async fn test_fire_and_forget_with_device_failure_pattern() {
        // the device-wide failure pattern makes every command expect a reply
        let (mut commander, script) = commander(&["OK"]);
        commander.connect().await.unwrap();
        assert!(matches!(
            commander.submit_line("setPoint", "A, 120").await,
            Err(CommanderError::NoMatch { .. })
        ));
        assert_eq!(script.lock().unwrap().sent, vec!["SETP A,120.000000"]);
    }

    #[tokio::test]
    async fn test_multi_row_and_row_replies() {
        let (mut commander, _) = commander(&["A=1.5;B=2.5;", "B 4"]);
        commander.connect().await.unwrap();
        let response = commander.submit("list", &[]).await.unwrap();
        assert_eq!(
            response,
            Response::Rows(vec![
                vec![ParameterValue::Char('A'), ParameterValue::Double(1.5)],
                vec![ParameterValue::Char('B'), ParameterValue::Double(2.5)],
            ])
        );
        let response = commander.submit("pair", &[]).await.unwrap();
        assert_eq!(
            response,
            Response::Row(vec![ParameterValue::Char('B'), ParameterValue::Double(4.0)])
        );
    }

    #[tokio::test]
    async fn test_opaque_reply() {
        let (mut commander, script) = commander(&[]);
        script
            .lock()
            .unwrap()
            .replies
            .push_back(RawReply::Value(serde_json::json!([1, 2])));
        commander.connect().await.unwrap();
        let response = commander.submit("list", &[]).await.unwrap();
        assert_eq!(
            response,
            Response::Value(ParameterValue::Opaque(serde_json::json!([1, 2])))
        );
    }

    #[test]
    fn test_invalid_schemas() {
        let registry = Arc::new(ParameterRegistry::builtin());
        let mut schema = CommanderSchema::from_json_str(SCHEMA).unwrap();
        schema.commands.get_mut("getTemp").unwrap().response_template = Some("(kelvin)".into());
        assert!(matches!(
            Commander::from_schema(schema, registry.clone()),
            Err(CommanderError::InvalidConfiguration(_))
        ));

        let mut schema = CommanderSchema::from_json_str(SCHEMA).unwrap();
        schema.parameters.get_mut("temp").unwrap().kind = "quaternion".into();
        assert!(Commander::from_schema(schema, registry.clone()).is_err());

        let mut schema = CommanderSchema::from_json_str(SCHEMA).unwrap();
        schema.device_failure_pattern = Some("ERR(".into());
        assert!(Commander::from_schema(schema, registry).is_err());
    }

    #[test]
    fn test_lookup_and_schema_round_trip() {
        let (commander, _) = commander(&[]);
        assert_eq!(commander.parameter_definition("temp").unwrap().description(), Some("Kelvin"));
        assert!(commander.parameter_definition("int").is_ok());
        assert!(matches!(
            commander.parameter_definition("pressure"),
            Err(CommanderError::InvalidParameter(ParameterError::UnknownParameter(_)))
        ));
        assert_eq!(commander.command("list").unwrap().response_names(), vec!["channel", "temp"]);

        let original = CommanderSchema::from_json_str(SCHEMA).unwrap();
        let rebuilt = commander.to_schema();
        assert_eq!(rebuilt.commands.keys().collect::<Vec<_>>(), original.commands.keys().collect::<Vec<_>>());
        assert_eq!(rebuilt.parameters["temp"].range.as_deref(), Some("[0,500]"));
        assert_eq!(rebuilt.commands["getTemp"].response_template.as_deref(), Some("(temp)K"));
        assert_eq!(rebuilt.device_failure_pattern, original.device_failure_pattern);
    }

    #[test]
    fn test_parse_reply_offline() {
        let (commander, _) = commander(&[]);
        assert_eq!(
            commander.parse_reply("getTemp", "12.0K").unwrap(),
            Response::Value(ParameterValue::Double(12.0))
        );
    }
}
