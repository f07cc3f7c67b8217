//! Bounded, ordered control channels.
//!
//! A [`ChannelEndpoint`] is one end of a bidirectional link between the
//! session and a worker. Each direction is a bounded FIFO queue: a full
//! queue makes [`ChannelSender::send`] wait rather than drop the message,
//! and [`ChannelSender::try_send`] hands the message back instead.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel failures are mapped to `ChannelError`

pub mod stream;

use std::time::Duration;

use playplot_protocol::ControlMessage;
use thiserror::Error;
use tokio::sync::mpsc;

pub use stream::Bridge;

// ============================================================================
// Errors
// ============================================================================

/// Errors from channel operations.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The other end has been dropped.
    #[error("Control channel closed")]
    Closed,

    /// No message arrived within the timeout.
    #[error("No message received within {0:?}")]
    Timeout(Duration),

    /// The queue is full (only from non-waiting sends).
    #[error("Control channel full")]
    Full,
}

/// A message refused by [`ChannelSender::try_send`], returned to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub error: ChannelError,
    pub message: ControlMessage,
}

// ============================================================================
// Sender
// ============================================================================

/// Cheap-to-clone sending half of one channel direction.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    inner: mpsc::Sender<ControlMessage>,
}

impl ChannelSender {
    /// Enqueues a message, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Closed` if the receiver has been dropped.
    pub async fn send(&self, message: ControlMessage) -> Result<(), ChannelError> {
        self.inner
            .send(message)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Enqueues a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns the message together with `ChannelError::Full` or
    /// `ChannelError::Closed`.
    pub fn try_send(&self, message: ControlMessage) -> Result<(), Rejected> {
        self.inner.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(message) => Rejected {
                error: ChannelError::Full,
                message,
            },
            mpsc::error::TrySendError::Closed(message) => Rejected {
                error: ChannelError::Closed,
                message,
            },
        })
    }

    /// Returns true once the receiving end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Receiving half of one channel direction.
#[derive(Debug)]
pub struct ChannelReceiver {
    inner: mpsc::Receiver<ControlMessage>,
}

impl ChannelReceiver {
    /// Waits for the next message.
    ///
    /// With `timeout = None` this waits until a message arrives or the
    /// channel closes.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Timeout` if nothing arrived in time
    /// - `ChannelError::Closed` if all senders are gone and the queue is empty
    pub async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<ControlMessage, ChannelError> {
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.recv())
                .await
                .map_err(|_| ChannelError::Timeout(limit))?,
            None => self.inner.recv().await,
        };
        next.ok_or(ChannelError::Closed)
    }

    /// Returns the next message if one is queued.
    ///
    /// `Ok(None)` means the queue is empty but still open.
    pub fn try_receive(&mut self) -> Result<Option<ControlMessage>, ChannelError> {
        match self.inner.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    /// Cancel-safe receive for `select!` loops; `None` once closed.
    pub async fn recv(&mut self) -> Option<ControlMessage> {
        self.inner.recv().await
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// One end of a bidirectional control channel.
#[derive(Debug)]
pub struct ChannelEndpoint {
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

/// Creates a connected pair of endpoints.
///
/// Messages sent on one endpoint are received on the other, in order.
/// `capacity` bounds each direction independently.
pub fn channel_pair(capacity: usize) -> (ChannelEndpoint, ChannelEndpoint) {
    let capacity = capacity.max(1);
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        ChannelEndpoint {
            sender: ChannelSender { inner: a_tx },
            receiver: ChannelReceiver { inner: b_rx },
        },
        ChannelEndpoint {
            sender: ChannelSender { inner: b_tx },
            receiver: ChannelReceiver { inner: a_rx },
        },
    )
}

impl ChannelEndpoint {
    /// Returns a clone of the sending half.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// See [`ChannelSender::send`].
    pub async fn send(&self, message: ControlMessage) -> Result<(), ChannelError> {
        self.sender.send(message).await
    }

    /// See [`ChannelSender::try_send`].
    pub fn try_send(&self, message: ControlMessage) -> Result<(), Rejected> {
        self.sender.try_send(message)
    }

    /// See [`ChannelReceiver::receive`].
    pub async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<ControlMessage, ChannelError> {
        self.receiver.receive(timeout).await
    }

    /// See [`ChannelReceiver::try_receive`].
    pub fn try_receive(&mut self) -> Result<Option<ControlMessage>, ChannelError> {
        self.receiver.try_receive()
    }

    /// See [`ChannelReceiver::recv`].
    pub async fn recv(&mut self) -> Option<ControlMessage> {
        self.receiver.recv().await
    }

    /// Splits the endpoint into its two halves.
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}
