//! A communication channel used to send/receive messages to/from another party.

use std::{fmt, future::Future, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug)]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be (de-)serialized.
    SerdeError(String),
    /// No message arrived before the phase timeout elapsed.
    Timeout,
}

/// A communication channel used to send/receive messages to/from another party.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index.
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a message from the party with the given index.
    fn recv_bytes_from(
        &self,
        party: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a message to the other party.
pub(crate) async fn send_to(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &impl Serialize,
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    trace!(party, phase, bytes = msg.len(), "sending message");
    channel.send_bytes_to(party, msg).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })
}

/// Receives and deserializes a message from the other party, waiting at most `max_wait`.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    max_wait: Duration,
) -> Result<T, Error> {
    let msg = match timeout(max_wait, channel.recv_bytes_from(party)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            return Err(Error {
                phase: phase.to_string(),
                reason: ErrorKind::RecvError(format!("{e:?}")),
            });
        }
        Err(_) => {
            return Err(Error {
                phase: phase.to_string(),
                reason: ErrorKind::Timeout,
            });
        }
    };
    trace!(party, phase, bytes = msg.len(), "received message");
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// An in-memory channel using [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
}

impl SimpleChannel {
    /// Creates a star of channels for `parties` parties and one coordinator.
    ///
    /// The coordinator has index `parties` and is connected to every party, while the parties
    /// `0..parties` are only connected to the coordinator.
    pub fn star(parties: usize) -> (Self, Vec<Self>) {
        let buffer_capacity = 16;
        let hub = parties;
        let empty = || SimpleChannel {
            s: (0..=parties).map(|_| None).collect(),
            r: (0..=parties).map(|_| None).collect(),
        };
        let mut coordinator = empty();
        let mut leaves: Vec<_> = (0..parties).map(|_| empty()).collect();
        for (p, leaf) in leaves.iter_mut().enumerate() {
            let (send_to_party, recv_from_hub) = channel(buffer_capacity);
            let (send_to_hub, recv_from_party) = channel(buffer_capacity);
            coordinator.s[p] = Some(send_to_party);
            coordinator.r[p] = Some(Mutex::new(recv_from_party));
            leaf.s[hub] = Some(send_to_hub);
            leaf.r[hub] = Some(Mutex::new(recv_from_hub));
        }
        (coordinator, leaves)
    }
}

/// The error raised by `send` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncSendError {
    /// The channel has been closed.
    Closed,
    /// There is no link to the given party.
    NoSuchParty(usize),
}

impl From<SendError<Vec<u8>>> for AsyncSendError {
    fn from(_: SendError<Vec<u8>>) -> Self {
        Self::Closed
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// There is no link to the given party.
    NoSuchParty(usize),
}

impl Channel for SimpleChannel {
    type SendError = AsyncSendError;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), AsyncSendError> {
        let Some(sender) = self.s.get(p).and_then(Option::as_ref) else {
            return Err(AsyncSendError::NoSuchParty(p));
        };
        sender.send(msg).await?;
        Ok(())
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let Some(receiver) = self.r.get(p).and_then(Option::as_ref) else {
            return Err(AsyncRecvError::NoSuchParty(p));
        };
        receiver.lock().await.recv().await.ok_or(AsyncRecvError::Closed)
    }
}
