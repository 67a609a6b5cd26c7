//! Remote procedure call transport.
//!
//! The first word of a rendered command selects a remote method through
//! the `methods` table of the connection settings; the marshalled
//! parameters become the positional call arguments. Remote objects are
//! reached through the [`RpcProxy`] / [`RpcConnector`] traits; the default
//! connector speaks line-delimited JSON-RPC 2.0 over TCP.
//!
//! When `callback` settings are present, `connect` also starts a background
//! listener that registers a callback identity with the remote side and
//! forwards its notifications to [`RpcInterface::subscribe`] receivers
//! until the remote session ends or the interface disconnects. A
//! [`Commander`](crate::Commander) exposes the same channel through
//! `subscribe_notifications`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{not_connected, CommandInterface, RawReply};
use crate::error::{TransportError, TransportResult};
use crate::schema::RpcSettings;
use crate::value::Parameter;

/// A remote object.
#[async_trait]
pub trait RpcProxy: Send + Sync {
    /// Invoke `method` with positional arguments.
    async fn call(&self, method: &str, args: Vec<Value>) -> TransportResult<Value>;

    /// Register `identity` through `register_method`, then forward every
    /// notification to `sink` until the remote session ends.
    async fn listen(
        &self,
        identity: &str,
        register_method: &str,
        sink: broadcast::Sender<Value>,
    ) -> TransportResult<()>;
}

/// Obtains a proxy when the interface connects.
#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn connect(&self, settings: &RpcSettings) -> TransportResult<Arc<dyn RpcProxy>>;
}

/// Connector for line-delimited JSON-RPC 2.0 over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcConnector;

#[async_trait]
impl RpcConnector for JsonRpcConnector {
    async fn connect(&self, settings: &RpcSettings) -> TransportResult<Arc<dyn RpcProxy>> {
        let proxy = JsonRpcProxy::connect(settings).await?;
        Ok(Arc::new(proxy))
    }
}

struct JsonRpcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl JsonRpcConnection {
    async fn open(host: &str, port: u16, limit: Duration) -> TransportResult<Self> {
        let stream = timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout(limit.as_millis() as u64))??;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    async fn send(&mut self, message: &Value) -> TransportResult<()> {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next JSON message, `None` at end of stream.
    async fn next_message(&mut self) -> TransportResult<Option<Value>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(line.trim())
                .map(Some)
                .map_err(|e| TransportError::Rpc(format!("malformed message: {}", e)));
        }
    }

    /// Wait for the response carrying `id`; notifications in between are skipped.
    async fn response(&mut self, id: u64, endpoint: &str) -> TransportResult<Value> {
        loop {
            let Some(message) = self.next_message().await? else {
                return Err(TransportError::Closed(endpoint.to_string()));
            };
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                debug!("Skipping message from {}: {}", endpoint, message);
                continue;
            }
            if let Some(error) = message.get("error") {
                let text = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(TransportError::Rpc(text));
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

/// JSON-RPC proxy.
///
/// Calls share one connection; the listener opens its own so that
/// notifications never interleave with call responses.
pub struct JsonRpcProxy {
    host: String,
    port: u16,
    object: Option<String>,
    timeout: Duration,
    next_id: AtomicU64,
    connection: Mutex<JsonRpcConnection>,
}

impl JsonRpcProxy {
    pub async fn connect(settings: &RpcSettings) -> TransportResult<Self> {
        let limit = Duration::from_millis(settings.timeout_ms.max(1));
        let connection = JsonRpcConnection::open(&settings.host, settings.port, limit).await?;
        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            object: settings.proxy.clone(),
            timeout: limit,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(connection),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Remote method name, qualified by the proxy object when configured.
    fn qualified(&self, method: &str) -> String {
        match &self.object {
            Some(object) => format!("{}.{}", object, method),
            None => method.to_string(),
        }
    }

    fn request(&self, method: &str, args: Vec<Value>) -> (u64, Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": self.qualified(method),
            "params": args,
        });
        (id, message)
    }
}

#[async_trait]
impl RpcProxy for JsonRpcProxy {
    async fn call(&self, method: &str, args: Vec<Value>) -> TransportResult<Value> {
        let (id, message) = self.request(method, args);
        let endpoint = self.endpoint();
        let mut connection = self.connection.lock().await;
        connection.send(&message).await?;
        timeout(self.timeout, connection.response(id, &endpoint))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_millis() as u64))?
    }

    async fn listen(
        &self,
        identity: &str,
        register_method: &str,
        sink: broadcast::Sender<Value>,
    ) -> TransportResult<()> {
        let endpoint = self.endpoint();
        let mut connection = JsonRpcConnection::open(&self.host, self.port, self.timeout).await?;
        let (id, message) = self.request(register_method, vec![Value::String(identity.to_string())]);
        connection.send(&message).await?;
        timeout(self.timeout, connection.response(id, &endpoint))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_millis() as u64))??;
        info!("Callback '{}' registered with {}", identity, endpoint);

        while let Some(message) = connection.next_message().await? {
            if message.get("method").is_some() {
                // no receivers is not an error
                let _ = sink.send(message);
            }
        }
        info!("Callback session with {} ended", endpoint);
        Ok(())
    }
}

struct Listener {
    stop: oneshot::Sender<()>,
    task: JoinHandle<TransportResult<()>>,
}

/// RPC transport.
pub struct RpcInterface {
    settings: RpcSettings,
    connector: Arc<dyn RpcConnector>,
    proxy: Option<Arc<dyn RpcProxy>>,
    listener: Option<Listener>,
    listener_started: bool,
    notifications: broadcast::Sender<Value>,
}

impl RpcInterface {
    pub fn new(settings: RpcSettings) -> Self {
        Self::with_connector(settings, Arc::new(JsonRpcConnector))
    }

    pub fn with_connector(settings: RpcSettings, connector: Arc<dyn RpcConnector>) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            settings,
            connector,
            proxy: None,
            listener: None,
            listener_started: false,
            notifications,
        }
    }

    pub fn settings(&self) -> &RpcSettings {
        &self.settings
    }

    /// Receive notifications forwarded by the callback listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    pub fn listener_running(&self) -> bool {
        self.listener
            .as_ref()
            .map(|l| !l.task.is_finished())
            .unwrap_or(false)
    }

    /// Start the callback listener. Allowed once per connection.
    pub fn start_listener(&mut self) -> TransportResult<()> {
        let Some(proxy) = self.proxy.clone() else {
            return not_connected();
        };
        if self.listener_started {
            return Err(TransportError::ListenerRunning);
        }
        let callback = self.settings.callback.clone().unwrap_or_default();
        let identity = callback
            .identity
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let register = callback.register_method;
        let sink = self.notifications.clone();
        let (stop, stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            tokio::select! {
                result = proxy.listen(&identity, &register, sink) => result,
                _ = stopped => Ok(()),
            }
        });
        self.listener = Some(Listener { stop, task });
        self.listener_started = true;
        debug!("Callback listener started for {}", self.endpoint());
        Ok(())
    }

    async fn stop_listener(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let _ = listener.stop.send(());
        match listener.task.await {
            Ok(Ok(())) => debug!("Callback listener for {} stopped", self.endpoint()),
            Ok(Err(e)) => warn!("Callback listener for {} failed: {}", self.endpoint(), e),
            Err(e) => warn!("Callback listener for {} panicked: {}", self.endpoint(), e),
        }
    }

    /// Resolve the command word and build positional arguments.
    fn resolve(&self, command: &str, args: &[Parameter]) -> TransportResult<(String, Vec<Value>)> {
        let word = command.split_whitespace().next().unwrap_or_default();
        let method = self
            .settings
            .methods
            .get(word)
            .ok_or_else(|| TransportError::UnknownMethod(word.to_string()))?;
        if let Some(arity) = method.arity {
            if arity != args.len() {
                return Err(TransportError::Rpc(format!(
                    "{} takes {} arguments, {} given",
                    word,
                    arity,
                    args.len()
                )));
            }
        }
        let remote = method.remote.clone().unwrap_or_else(|| word.to_string());
        let values = args.iter().map(|p| p.value().to_json()).collect();
        Ok((remote, values))
    }

    async fn invoke(&mut self, command: &str, args: &[Parameter]) -> TransportResult<Value> {
        let Some(proxy) = self.proxy.clone() else {
            return not_connected();
        };
        let (method, values) = self.resolve(command, args)?;
        debug!("Calling {}({:?}) on {}", method, values, self.endpoint());
        proxy.call(&method, values).await
    }
}

#[async_trait]
impl CommandInterface for RpcInterface {
    fn transport_type(&self) -> &'static str {
        "rpc"
    }

    fn endpoint(&self) -> String {
        match &self.settings.proxy {
            Some(proxy) => format!("{}@{}:{}", proxy, self.settings.host, self.settings.port),
            None => format!("{}:{}", self.settings.host, self.settings.port),
        }
    }

    fn is_connected(&self) -> bool {
        self.proxy.is_some()
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.proxy.is_some() {
            debug!("Already connected to {}", self.endpoint());
            return Ok(());
        }
        let proxy = self.connector.connect(&self.settings).await?;
        self.proxy = Some(proxy);
        self.listener_started = false;
        info!("Connected to {}", self.endpoint());
        if self.settings.callback.is_some() {
            self.start_listener()?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if self.proxy.is_none() {
            debug!("Already disconnected from {}", self.endpoint());
            return Ok(());
        }
        self.stop_listener().await;
        self.proxy = None;
        info!("Disconnected from {}", self.endpoint());
        Ok(())
    }

    fn notifications(&self) -> Option<broadcast::Receiver<Value>> {
        Some(self.subscribe())
    }

    async fn send_command(&mut self, command: &str, args: &[Parameter]) -> TransportResult<()> {
        self.invoke(command, args).await.map(|_| ())
    }

    async fn send_request(
        &mut self,
        command: &str,
        args: &[Parameter],
    ) -> TransportResult<RawReply> {
        match self.invoke(command, args).await? {
            Value::String(text) => Ok(RawReply::Text(text)),
            other => Ok(RawReply::Value(other)),
        }
    }
}
