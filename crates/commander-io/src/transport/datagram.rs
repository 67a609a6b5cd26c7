//! Datagram socket (UDP) transport.
//!
//! One packet out, one packet back. The only state kept between requests
//! is the local socket.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{decode_reply, frame, not_connected, CommandInterface, RawReply};
use crate::error::{TransportError, TransportResult};
use crate::schema::DatagramSettings;
use crate::value::Parameter;

pub struct DatagramInterface {
    settings: DatagramSettings,
    socket: Option<UdpSocket>,
}

impl DatagramInterface {
    pub fn new(settings: DatagramSettings) -> Self {
        Self {
            settings,
            socket: None,
        }
    }

    pub fn settings(&self) -> &DatagramSettings {
        &self.settings
    }

    async fn send(&self, command: &str) -> TransportResult<&UdpSocket> {
        let Some(socket) = self.socket.as_ref() else {
            return not_connected();
        };
        debug!("Sending '{}' to {}", command, self.endpoint());
        socket
            .send(&frame(command, &self.settings.command_terminator))
            .await?;
        Ok(socket)
    }
}

#[async_trait]
impl CommandInterface for DatagramInterface {
    fn transport_type(&self) -> &'static str {
        "datagram"
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.socket.is_some() {
            debug!("Already connected to {}", self.endpoint());
            return Ok(());
        }
        let remote = lookup_host((self.settings.host.as_str(), self.settings.port))
            .await?
            .next()
            .ok_or_else(|| {
                TransportError::Configuration(format!("cannot resolve {}", self.endpoint()))
            })?;
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        self.socket = Some(socket);
        info!("Connected to {}", self.endpoint());
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if self.socket.take().is_none() {
            debug!("Already disconnected from {}", self.endpoint());
        } else {
            info!("Disconnected from {}", self.endpoint());
        }
        Ok(())
    }

    async fn send_command(&mut self, command: &str, _args: &[Parameter]) -> TransportResult<()> {
        self.send(command).await.map(|_| ())
    }

    async fn send_request(
        &mut self,
        command: &str,
        _args: &[Parameter],
    ) -> TransportResult<RawReply> {
        let timeout_ms = self.settings.timeout_ms;
        let mut buf = vec![0u8; self.settings.max_buffer.max(1)];
        let socket = self.send(command).await?;
        let n = match timeout(Duration::from_millis(timeout_ms), socket.recv(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::EmptyResponse {
                    endpoint: self.endpoint(),
                    timeout_ms,
                })
            }
        };
        let reply = decode_reply(&buf[..n], &self.endpoint()).trim().to_string();
        debug!("Received '{}' from {}", reply, self.endpoint());
        Ok(RawReply::Text(reply))
    }
}
