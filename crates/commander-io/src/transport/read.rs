//! Reply completion strategies for byte-stream transports.
//!
//! Stream sockets and serial lines deliver bytes without framing, so a
//! reply is complete when one of three conditions holds:
//!
//! - [`ReadStrategy::Terminator`]: the response terminator was seen
//! - [`ReadStrategy::FixedLength`]: exactly N bytes arrived
//! - [`ReadStrategy::UntilQuiet`]: the line went silent for a hundredth of
//!   the timeout (at least 20ms) after data started, or the timeout
//!   elapsed; nothing at all is an error
//!
//! Bytes read past the end of a reply stay in the [`ReplyReader`] and start
//! the next one.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use super::decode_reply;
use crate::error::{TransportError, TransportResult};

const CHUNK_SIZE: usize = 1024;

/// Lower bound of the silence that ends an until-quiet reply.
const MIN_QUIET: Duration = Duration::from_millis(20);

/// How the end of a reply is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStrategy {
    Terminator(Vec<u8>),
    FixedLength(usize),
    UntilQuiet,
}

impl ReadStrategy {
    /// Strategy implied by transport settings: a non-empty terminator wins,
    /// then a fixed length, else read until quiet.
    pub fn from_settings(terminator: Option<&str>, length: Option<usize>) -> Self {
        match (terminator.filter(|t| !t.is_empty()), length) {
            (Some(t), _) => Self::Terminator(t.as_bytes().to_vec()),
            (None, Some(n)) if n > 0 => Self::FixedLength(n),
            _ => Self::UntilQuiet,
        }
    }
}

/// Reads complete replies from a byte stream.
#[derive(Debug)]
pub struct ReplyReader {
    strategy: ReadStrategy,
    timeout: Duration,
    pending: Vec<u8>,
}

impl ReplyReader {
    pub fn new(strategy: ReadStrategy, timeout: Duration) -> Self {
        Self {
            strategy,
            timeout,
            pending: Vec::new(),
        }
    }

    pub fn strategy(&self) -> &ReadStrategy {
        &self.strategy
    }

    /// Bytes received past the end of the last reply.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Forget leftover bytes, e.g. after reconnecting.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Read one reply and return it as trimmed text.
    pub async fn read_reply<R>(&mut self, reader: &mut R, endpoint: &str) -> TransportResult<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let deadline = Instant::now() + self.timeout;
        let result = match self.strategy.clone() {
            ReadStrategy::Terminator(terminator) => {
                self.read_terminated(reader, &terminator, deadline, endpoint)
                    .await
            }
            ReadStrategy::FixedLength(length) => {
                self.read_exact_len(reader, length, deadline, endpoint).await
            }
            ReadStrategy::UntilQuiet => self.read_until_quiet(reader, deadline, endpoint).await,
        };
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                // drop the incomplete reply
                if !self.pending.is_empty() {
                    debug!(
                        "Dropping {} unterminated bytes from {}",
                        self.pending.len(),
                        endpoint
                    );
                    self.pending.clear();
                }
                return Err(e);
            }
        };
        let text = decode_reply(&bytes, endpoint).trim().to_string();
        trace!("Reply from {}: {:?}", endpoint, text);
        Ok(text)
    }

    async fn fill<R>(&mut self, reader: &mut R, deadline: Instant, endpoint: &str) -> TransportResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut chunk = [0u8; CHUNK_SIZE];
        match timeout_at(deadline, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => Err(TransportError::Closed(endpoint.to_string())),
            Ok(Ok(n)) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn read_terminated<R>(
        &mut self,
        reader: &mut R,
        terminator: &[u8],
        deadline: Instant,
        endpoint: &str,
    ) -> TransportResult<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            // a terminator before any content is a leftover of an earlier reply
            while self.pending.starts_with(terminator) {
                self.pending.drain(..terminator.len());
            }
            if let Some(pos) = find(&self.pending, terminator) {
                let reply: Vec<u8> = self.pending.drain(..pos).collect();
                self.pending.drain(..terminator.len());
                return Ok(reply);
            }
            self.fill(reader, deadline, endpoint).await?;
        }
    }

    async fn read_exact_len<R>(
        &mut self,
        reader: &mut R,
        length: usize,
        deadline: Instant,
        endpoint: &str,
    ) -> TransportResult<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        while self.pending.len() < length {
            self.fill(reader, deadline, endpoint).await?;
        }
        Ok(self.pending.drain(..length).collect())
    }

    async fn read_until_quiet<R>(
        &mut self,
        reader: &mut R,
        deadline: Instant,
        endpoint: &str,
    ) -> TransportResult<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let quiet = (self.timeout / 100).max(MIN_QUIET);
        loop {
            // once data flows, a short silence ends the reply
            let until = if self.pending.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + quiet)
            };
            match self.fill(reader, until, endpoint).await {
                Ok(()) => continue,
                Err(TransportError::Timeout(_)) | Err(TransportError::Closed(_)) => break,
                Err(e) => return Err(e),
            }
        }
        if self.pending.is_empty() {
            return Err(TransportError::EmptyResponse {
                endpoint: endpoint.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            });
        }
        Ok(std::mem::take(&mut self.pending))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn reader(strategy: ReadStrategy) -> ReplyReader {
        ReplyReader::new(strategy, Duration::from_millis(200))
    }

    #[test]
    fn test_strategy_from_settings() {
        assert_eq!(
            ReadStrategy::from_settings(Some("\n"), Some(4)),
            ReadStrategy::Terminator(b"\n".to_vec())
        );
        assert_eq!(
            ReadStrategy::from_settings(Some(""), Some(4)),
            ReadStrategy::FixedLength(4)
        );
        assert_eq!(ReadStrategy::from_settings(None, None), ReadStrategy::UntilQuiet);
    }

    #[tokio::test]
    async fn test_terminator_discards_leading_terminators() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"\n\n+12.5\n").await.unwrap();
        let mut r = reader(ReadStrategy::Terminator(b"\n".to_vec()));
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "+12.5");
    }

    #[tokio::test]
    async fn test_terminator_keeps_leftover_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"first\r\nsecond\r\n").await.unwrap();
        let mut r = reader(ReadStrategy::Terminator(b"\r\n".to_vec()));
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "first");
        assert_eq!(r.pending(), b"second\r\n");
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut r = reader(ReadStrategy::Terminator(b"\r\n".to_vec()));
        let writer = tokio::spawn(async move {
            server.write_all(b"OK\r").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"\n").await.unwrap();
            server
        });
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "OK");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_terminator_timeout() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"partial").await.unwrap();
        let mut r = reader(ReadStrategy::Terminator(b"\n".to_vec()));
        assert!(matches!(
            r.read_reply(&mut client, "mock").await,
            Err(TransportError::Timeout(200))
        ));
    }

    #[tokio::test]
    async fn test_fixed_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"ABCDEFGH").await.unwrap();
        let mut r = reader(ReadStrategy::FixedLength(5));
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "ABCDE");
        assert_eq!(r.pending(), b"FGH");
    }

    #[tokio::test]
    async fn test_until_quiet_returns_partial_data() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"line one\nline two\n").await.unwrap();
        let mut r = reader(ReadStrategy::UntilQuiet);
        assert_eq!(
            r.read_reply(&mut client, "mock").await.unwrap(),
            "line one\nline two"
        );
        drop(server);
    }

    #[tokio::test]
    async fn test_until_quiet_returns_once_silent() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"+4.20K").await.unwrap();
        let mut r = ReplyReader::new(ReadStrategy::UntilQuiet, Duration::from_millis(2000));
        let started = Instant::now();
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "+4.20K");
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_until_quiet_collects_bursts() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            server.write_all(b"A=1;").await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            server.write_all(b"B=2;").await.unwrap();
            server
        });
        let mut r = ReplyReader::new(ReadStrategy::UntilQuiet, Duration::from_millis(5000));
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "A=1;B=2;");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_drops_partial_reply() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"stale").await.unwrap();
        let mut r = reader(ReadStrategy::Terminator(b"\n".to_vec()));
        assert!(matches!(
            r.read_reply(&mut client, "mock").await,
            Err(TransportError::Timeout(_))
        ));
        assert!(r.pending().is_empty());

        server.write_all(b"OK\n").await.unwrap();
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"T=\xff\n").await.unwrap();
        let mut r = reader(ReadStrategy::Terminator(b"\n".to_vec()));
        assert_eq!(r.read_reply(&mut client, "mock").await.unwrap(), "T=\u{fffd}");
    }

    #[tokio::test]
    async fn test_until_quiet_nothing_is_empty_response() {
        let (mut client, _server) = tokio::io::duplex(64);
        let mut r = reader(ReadStrategy::UntilQuiet);
        assert!(matches!(
            r.read_reply(&mut client, "mock").await,
            Err(TransportError::EmptyResponse { timeout_ms: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let mut r = reader(ReadStrategy::Terminator(b"\n".to_vec()));
        assert!(matches!(
            r.read_reply(&mut client, "mock").await,
            Err(TransportError::Closed(_))
        ));
    }
}
