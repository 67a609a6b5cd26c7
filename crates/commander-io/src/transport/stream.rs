//! Stream socket (TCP) transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::read::{ReadStrategy, ReplyReader};
use super::{frame, not_connected, CommandInterface, RawReply};
use crate::error::{TransportError, TransportResult};
use crate::schema::StreamSettings;
use crate::value::Parameter;

/// Persistent TCP connection to an instrument.
pub struct StreamInterface {
    settings: StreamSettings,
    stream: Option<TcpStream>,
    reader: ReplyReader,
}

impl StreamInterface {
    pub fn new(settings: StreamSettings) -> Self {
        let strategy = ReadStrategy::from_settings(
            settings.response_terminator.as_deref(),
            settings.response_length,
        );
        let reader = ReplyReader::new(strategy, Duration::from_millis(settings.timeout_ms));
        Self {
            settings,
            stream: None,
            reader,
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn read_strategy(&self) -> &ReadStrategy {
        self.reader.strategy()
    }

    async fn write(&mut self, command: &str) -> TransportResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return not_connected();
        };
        debug!("Sending '{}' to {}:{}", command, self.settings.host, self.settings.port);
        stream
            .write_all(&frame(command, &self.settings.command_terminator))
            .await?;
        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CommandInterface for StreamInterface {
    fn transport_type(&self) -> &'static str {
        "stream"
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.stream.is_some() {
            debug!("Already connected to {}", self.endpoint());
            return Ok(());
        }
        let endpoint = self.endpoint();
        let connect_timeout = Duration::from_millis(self.settings.timeout_ms.max(1));
        let stream = timeout(
            connect_timeout,
            TcpStream::connect((self.settings.host.as_str(), self.settings.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.settings.timeout_ms))??;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", endpoint, e);
        }
        self.reader.clear();
        self.stream = Some(stream);
        info!("Connected to {}", endpoint);
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let Some(mut stream) = self.stream.take() else {
            debug!("Already disconnected from {}", self.endpoint());
            return Ok(());
        };
        self.reader.clear();
        if let Err(e) = stream.shutdown().await {
            warn!("Error shutting down {}: {}", self.endpoint(), e);
        }
        info!("Disconnected from {}", self.endpoint());
        Ok(())
    }

    async fn send_command(&mut self, command: &str, _args: &[Parameter]) -> TransportResult<()> {
        self.write(command).await
    }

    async fn send_request(
        &mut self,
        command: &str,
        _args: &[Parameter],
    ) -> TransportResult<RawReply> {
        self.write(command).await?;
        let endpoint = self.endpoint();
        let Some(stream) = self.stream.as_mut() else {
            return not_connected();
        };
        let reply = self.reader.read_reply(stream, &endpoint).await?;
        debug!("Received '{}' from {}", reply, endpoint);
        Ok(RawReply::Text(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\r");
            socket.write_all(b"MOCK,1.0\n").await.unwrap();
        });

        let mut transport = StreamInterface::new(
            StreamSettings::new("127.0.0.1", port)
                .with_command_terminator("\r")
                .with_response_terminator("\n"),
        );
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        let reply = transport.send_request("*IDN?", &[]).await.unwrap();
        assert_eq!(reply, RawReply::Text("MOCK,1.0".into()));
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut transport = StreamInterface::new(StreamSettings::new("127.0.0.1", 1));
        assert!(matches!(
            transport.send_command("STOP", &[]).await,
            Err(TransportError::NotConnected)
        ));
    }
}
