//! Bridging a control channel over a byte stream.
//!
//! In process isolation the session and a worker each hold an ordinary
//! [`ChannelEndpoint`]; a [`Bridge`] on either side pumps messages between
//! that endpoint and the child's stdio as newline-delimited JSON.
//!
//! ```text
//!  worker code <-> endpoint <-> Bridge <== stdin/stdout ==> Bridge <-> endpoint <-> supervisor
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed frames are logged and skipped, I/O failures end the bridge

use std::time::Duration;

use playplot_protocol::{frame, ControlMessage, FrameError, MAX_MESSAGE_SIZE};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{ChannelEndpoint, ChannelReceiver, ChannelSender};

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that end a bridge direction.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Write did not complete in time
    #[error("Write timeout")]
    WriteTimeout,

    /// Peer closed the stream
    #[error("End of stream")]
    Eof,
}

/// Running bridge between a channel endpoint and a byte stream.
#[derive(Debug)]
pub struct Bridge {
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl Bridge {
    /// Starts pumping in both directions.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `reader` - Stream of incoming frames
    /// * `writer` - Stream receiving outgoing frames
    /// * `endpoint` - Channel end connected to local code
    /// * `label` - Name used in logs
    pub fn spawn<R, W>(reader: R, writer: W, endpoint: ChannelEndpoint, label: &str) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = endpoint.split();
        let inbound_label = label.to_string();
        let outbound_label = label.to_string();
        Self {
            inbound: tokio::spawn(pump_inbound(reader, sender, inbound_label)),
            outbound: tokio::spawn(pump_outbound(writer, receiver, outbound_label)),
        }
    }

    /// Waits for outgoing frames to drain, then stops reading.
    ///
    /// The outbound pump finishes once every sender feeding the local
    /// endpoint has been dropped.
    pub async fn finish(self, limit: Duration) {
        if timeout(limit, self.outbound).await.is_err() {
            warn!("Bridge did not drain in time");
        }
        self.inbound.abort();
    }

    /// Returns true once the inbound side has hit end of stream.
    pub fn is_inbound_finished(&self) -> bool {
        self.inbound.is_finished()
    }
}

async fn pump_inbound<R>(mut reader: R, sender: ChannelSender, label: String)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                trace!(bridge = %label, kind = message.name(), "Frame in");
                if sender.send(message).await.is_err() {
                    debug!(bridge = %label, "Local endpoint closed, stopping inbound pump");
                    break;
                }
            }
            Err(BridgeError::Eof) => {
                debug!(bridge = %label, "Stream closed by peer");
                break;
            }
            Err(BridgeError::Frame(e)) => {
                warn!(bridge = %label, error = %e, "Skipping malformed frame");
            }
            Err(e) => {
                warn!(bridge = %label, error = %e, "Inbound stream failed");
                break;
            }
        }
    }
}

async fn pump_outbound<W>(mut writer: W, mut receiver: ChannelReceiver, label: String)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = receiver.recv().await {
        trace!(bridge = %label, kind = message.name(), "Frame out");
        if let Err(e) = write_message(&mut writer, &message).await {
            warn!(bridge = %label, error = %e, "Outbound stream failed");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(bridge = %label, error = %e, "Stream shutdown failed");
    }
}

/// Reads one frame.
///
/// # Errors
///
/// `BridgeError::Eof` at end of stream, `BridgeError::Frame` for an oversized
/// or malformed line (the line is consumed), `BridgeError::Io` otherwise.
pub async fn read_message<R>(reader: &mut R) -> Result<ControlMessage, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    Ok(frame::decode(&line)?)
}

/// Reads one raw line, enforcing the frame size limit.
pub async fn read_line<R>(reader: &mut R) -> Result<String, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Err(BridgeError::Eof);
    }
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(BridgeError::Frame(FrameError::TooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        }));
    }
    Ok(line)
}

/// Writes one frame followed by a newline and flushes.
pub async fn write_message<W>(writer: &mut W, message: &ControlMessage) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let line = frame::encode(message)?;
    write_line(writer, &line).await
}

/// Writes a pre-encoded line under the write timeout.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    timeout(WRITE_TIMEOUT, async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    })
    .await
    .map_err(|_| BridgeError::WriteTimeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel_pair;
    use playplot_protocol::{Command, Lifecycle};
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_message_parses_frame() {
        let line = frame::encode(&ControlMessage::command(4, Command::ToggleLoop)).unwrap();
        let input = format!("{line}\n");
        let mut reader = BufReader::new(input.as_bytes());
        let msg = read_message(&mut reader).await.unwrap();
        assert_eq!(msg, ControlMessage::command(4, Command::ToggleLoop));
        assert!(matches!(read_message(&mut reader).await, Err(BridgeError::Eof)));
    }

    #[tokio::test]
    async fn test_write_message_appends_newline() {
        let mut out = Vec::new();
        write_message(&mut out, &ControlMessage::lifecycle(Lifecycle::Ready))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn test_bridges_connect_two_endpoints() {
        // Two in-memory pipes stand in for the child's stdin and stdout.
        let (parent_out, child_in) = tokio::io::duplex(4096);
        let (child_out, parent_in) = tokio::io::duplex(4096);

        let (mut parent, parent_bridge_end) = channel_pair(4);
        let (mut child, child_bridge_end) = channel_pair(4);

        let parent_bridge = Bridge::spawn(
            BufReader::new(parent_in),
            parent_out,
            parent_bridge_end,
            "parent",
        );
        let _child_bridge = Bridge::spawn(
            BufReader::new(child_in),
            child_out,
            child_bridge_end,
            "child",
        );

        parent
            .send(ControlMessage::command(1, Command::Seek { time: 0.5 }))
            .await
            .unwrap();
        let received = child.receive(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(received, ControlMessage::command(1, Command::Seek { time: 0.5 }));

        child
            .send(ControlMessage::lifecycle(Lifecycle::Exited))
            .await
            .unwrap();
        let received = parent.receive(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(received, ControlMessage::lifecycle(Lifecycle::Exited));

        drop(parent);
        parent_bridge.finish(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let good = frame::encode(&ControlMessage::lifecycle(Lifecycle::Closed)).unwrap();
        let input = format!("not json\n{good}\n");
        let (_unused_writer, sink) = tokio::io::duplex(64);

        let (mut local, bridge_end) = channel_pair(4);
        let _bridge = Bridge::spawn(
            BufReader::new(std::io::Cursor::new(input.into_bytes())),
            sink,
            bridge_end,
            "test",
        );
        let received = local.receive(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(received, ControlMessage::lifecycle(Lifecycle::Closed));
    }
}
