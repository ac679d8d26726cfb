use crate::envelope::Envelope;
use meta_core::CoreError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Send-one/receive-one over a self-delimited envelope stream.
///
/// Framing is newline-delimited JSON — one `Envelope` per line. `Transport`
/// is agnostic to what a message *means*; it only validates framing.
pub struct Transport<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> Transport<R, W>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Transport {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Read and decode the next envelope. Returns `Ok(None)` on clean EOF.
    ///
    /// Malformed lines are reported as `CoreError::Internal` to the caller,
    /// who is expected to log and keep reading — a malformed envelope is
    /// logged and skipped, it never tears down the reader. Blank lines are
    /// skipped silently.
    pub async fn recv_one(&mut self) -> Result<Option<Envelope>, CoreError> {
        loop {
            let mut line = String::new();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| CoreError::Transient(format!("transport read failed: {e}")))?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let envelope = serde_json::from_str(trimmed)
                .map_err(|e| CoreError::Internal(format!("malformed envelope: {e}")))?;
            return Ok(Some(envelope));
        }
    }

    /// Encode and write one envelope, followed by a newline.
    pub async fn send_one(&mut self, envelope: &Envelope) -> Result<(), CoreError> {
        let mut line = serde_json::to_string(envelope)
            .map_err(|e| CoreError::Internal(format!("failed to encode envelope: {e}")))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::Transient(format!("transport write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| CoreError::Transient(format!("transport flush failed: {e}")))?;
        Ok(())
    }
}

impl<R, W> Transport<R, W>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    /// Split into an owned reader half and writer half.
    ///
    /// The reader half is meant to be driven by a single task so envelopes
    /// are decoded in order; the writer half is shared (behind a mutex, by
    /// callers of this crate) between outbound RPC calls and reply writes.
    pub fn split(self) -> (TransportReader<R>, TransportWriter<W>) {
        (
            TransportReader { reader: self.reader },
            TransportWriter { writer: self.writer },
        )
    }
}

/// The read half of a split `Transport`.
pub struct TransportReader<R> {
    reader: BufReader<R>,
}

impl<R: tokio::io::AsyncRead + Unpin> TransportReader<R> {
    pub async fn recv_one(&mut self) -> Result<Option<Envelope>, CoreError> {
        loop {
            let mut line = String::new();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| CoreError::Transient(format!("transport read failed: {e}")))?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let envelope = serde_json::from_str(trimmed)
                .map_err(|e| CoreError::Internal(format!("malformed envelope: {e}")))?;
            return Ok(Some(envelope));
        }
    }
}

/// The write half of a split `Transport`.
pub struct TransportWriter<W> {
    writer: W,
}

impl<W: tokio::io::AsyncWrite + Unpin> TransportWriter<W> {
    pub async fn send_one(&mut self, envelope: &Envelope) -> Result<(), CoreError> {
        let mut line = serde_json::to_string(envelope)
            .map_err(|e| CoreError::Internal(format!("failed to encode envelope: {e}")))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::Transient(format!("transport write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| CoreError::Transient(format!("transport flush failed: {e}")))?;
        Ok(())
    }
}

/// Construct a `Transport` wired to the process's real stdin/stdout.
pub fn stdio() -> Transport<tokio::io::Stdin, tokio::io::Stdout> {
    Transport::new(tokio::io::stdin(), tokio::io::stdout())
}
