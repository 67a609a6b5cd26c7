//! Serial line transport.
//!
//! Opens the port through tokio-serial and reads replies with the same
//! terminator / fixed length / until-quiet strategies as the stream
//! transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_serial::{DataBits, SerialPortBuilderExt, StopBits};
use tracing::{debug, info, warn};

use super::read::{ReadStrategy, ReplyReader};
use super::{frame, not_connected, CommandInterface, RawReply};
use crate::error::{TransportError, TransportResult};
use crate::schema::{Parity, SerialSettings};
use crate::value::Parameter;

/// Byte link behind a serial transport.
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialLink for T {}

pub struct SerialInterface {
    settings: SerialSettings,
    data_bits: DataBits,
    stop_bits: StopBits,
    link: Option<Box<dyn SerialLink>>,
    reader: ReplyReader,
}

impl SerialInterface {
    /// Validate line settings. The port itself is opened on `connect`.
    pub fn new(settings: SerialSettings) -> TransportResult<Self> {
        let data_bits = match settings.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(TransportError::Configuration(format!(
                    "unsupported data bits {} for {}",
                    other, settings.port
                )))
            }
        };
        let stop_bits = match settings.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(TransportError::Configuration(format!(
                    "unsupported stop bits {} for {}",
                    other, settings.port
                )))
            }
        };
        let strategy = ReadStrategy::from_settings(
            settings.response_terminator.as_deref(),
            settings.response_length,
        );
        let reader = ReplyReader::new(strategy, Duration::from_millis(settings.timeout_ms));
        Ok(Self {
            settings,
            data_bits,
            stop_bits,
            link: None,
            reader,
        })
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Use an already open link instead of opening the port.
    pub fn attach(&mut self, link: impl SerialLink + 'static) {
        self.reader.clear();
        self.link = Some(Box::new(link));
    }

    async fn write(&mut self, command: &str) -> TransportResult<()> {
        let Some(link) = self.link.as_mut() else {
            return not_connected();
        };
        debug!("Sending '{}' to {}", command, self.settings.port);
        link.write_all(&frame(command, &self.settings.command_terminator))
            .await?;
        link.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CommandInterface for SerialInterface {
    fn transport_type(&self) -> &'static str {
        "serial"
    }

    fn endpoint(&self) -> String {
        self.settings.port.clone()
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.link.is_some() {
            debug!("Already connected to {}", self.settings.port);
            return Ok(());
        }
        let parity = match self.settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        let port = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(parity)
            .timeout(Duration::from_millis(self.settings.timeout_ms))
            .open_native_async()
            .map_err(|e| TransportError::Io(e.into()))?;
        self.attach(port);
        info!(
            "Connected to {} at {} baud",
            self.settings.port, self.settings.baud_rate
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let Some(mut link) = self.link.take() else {
            debug!("Already disconnected from {}", self.settings.port);
            return Ok(());
        };
        self.reader.clear();
        if let Err(e) = link.shutdown().await {
            warn!("Error closing {}: {}", self.settings.port, e);
        }
        info!("Disconnected from {}", self.settings.port);
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
        let endpoint = self.settings.port.clone();
        let Some(link) = self.link.as_mut() else {
            return not_connected();
        };
        let reply = self.reader.read_reply(link, &endpoint).await?;
        debug!("Received '{}' from {}", reply, endpoint);
        Ok(RawReply::Text(reply))
    }
}
