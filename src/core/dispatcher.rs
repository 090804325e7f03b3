//! Serialized event dispatch
//!
//! Detector callbacks, timer jobs and user requests all post into one queue.
//! A single consumer task drains it, so protocol transitions run strictly one
//! at a time no matter which thread raised the event.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use super::error::ProtocolError;
use super::state_machine::{ProtocolEvent, ProtocolState};

/// Who raised an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Synchronous user request, answered through a reply channel
    Command,
    /// Raised by the inbound stream on a recognized chunk
    Detector,
    /// Raised by a scheduled job
    Timer {
        /// Job id
        id: String,
        /// Registration the firing belongs to
        generation: u64,
    },
}

impl Origin {
    /// True for events nobody is waiting on
    pub fn is_async(&self) -> bool {
        !matches!(self, Origin::Command)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Command => f.write_str("command"),
            Origin::Detector => f.write_str("detector"),
            Origin::Timer { id, generation } => write!(f, "timer:{id}#{generation}"),
        }
    }
}

/// Reply channel for a synchronous request
pub type Reply = oneshot::Sender<Result<ProtocolState, ProtocolError>>;

/// A queued event
#[derive(Debug)]
pub struct Envelope {
    /// The event
    pub event: ProtocolEvent,
    /// Who raised it
    pub origin: Origin,
    /// Where to send the outcome, for synchronous requests
    pub reply: Option<Reply>,
}

/// Posting side; cheap to clone and usable from any thread
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Consuming side, owned by the dispatcher task
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Create a connected dispatcher / queue pair
pub fn event_channel() -> (EventDispatcher, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventDispatcher { tx }, EventQueue { rx })
}

impl EventDispatcher {
    /// Enqueue an event without waiting for it to be handled
    pub fn post(&self, event: ProtocolEvent, origin: Origin) -> Result<(), ProtocolError> {
        self.tx
            .send(Envelope { event, origin, reply: None })
            .map_err(|_| ProtocolError::DriverStopped)
    }

    /// Enqueue an event and wait for its outcome
    pub async fn request(&self, event: ProtocolEvent) -> Result<ProtocolState, ProtocolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope { event, origin: Origin::Command, reply: Some(reply_tx) })
            .map_err(|_| ProtocolError::DriverStopped)?;
        reply_rx.await.map_err(|_| ProtocolError::DriverStopped)?
    }

    /// True once the queue is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventQueue {
    /// Next event, `None` once every dispatcher is dropped
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Stop accepting events
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Envelope {
    /// Deliver the outcome to the waiting requester, if any
    pub fn respond(self, result: Result<ProtocolState, ProtocolError>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(result);
        }
    }
}
