#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Install state machine and event bus for sideload
//!
//! Producers never touch the bus directly. They describe what happened as a
//! [`Transition`] and push it through an [`EventSender`]; a single forwarder
//! task applies queued transitions to the [`InstallEventBus`] in FIFO order.
//! Progress emitted from a blocking write loop therefore cannot overtake the
//! OS status that arrives later on another thread, as long as the producer
//! calls [`EventEmitter::flush`] before handing the session to the OS.

pub mod bus;
pub mod machine;

pub use bus::{InstallEventBus, Subscription, DEFAULT_CHANNEL_CAPACITY};
pub use machine::{next_state, OsOutcome, Transition};

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Item carried by the ordered publish queue
#[derive(Debug)]
pub enum BusMessage {
    /// Apply a transition to the bus
    Transition(Transition),
    /// Acknowledge once everything queued before it has been applied
    Barrier(std::sync::mpsc::SyncSender<()>),
}

/// Type alias for the publish queue sender
pub type EventSender = UnboundedSender<BusMessage>;

/// Type alias for the publish queue receiver
pub type EventReceiver = UnboundedReceiver<BusMessage>;

/// Create a new publish queue
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Drain `rx` into `bus` until every sender is dropped.
///
/// Rejected transitions are logged by the bus and otherwise dropped; a stale
/// OS callback must not take the forwarder down.
pub fn spawn_forwarder(bus: Arc<InstallEventBus>, mut rx: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                BusMessage::Transition(transition) => {
                    let _ = bus.emit(transition);
                }
                BusMessage::Barrier(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("install event forwarder stopped");
    })
}

/// The unified trait for publishing install transitions
///
/// Implemented by `EventSender` itself and by any component that carries one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Queue a transition for the bus
    fn emit(&self, transition: Transition) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if the forwarder is gone, we just continue
            let _ = sender.send(BusMessage::Transition(transition));
        }
    }

    /// Queue an `Installing` progress update
    fn emit_progress(&self, fraction: f32) {
        self.emit(Transition::Progress(fraction));
    }

    /// Queue a failure carrying a user-readable message
    fn emit_failed(&self, message: impl Into<String>) {
        self.emit(Transition::Failed(message.into()));
    }

    /// Block until every transition queued so far has been applied.
    ///
    /// Must be called from a thread that may block (a `spawn_blocking`
    /// worker or a plain thread), never from inside an async task.
    fn flush(&self) {
        let Some(sender) = self.event_sender() else {
            return;
        };
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        if sender.send(BusMessage::Barrier(ack_tx)).is_ok() {
            // Err means the forwarder dropped the barrier while shutting down
            let _ = ack_rx.recv();
        }
    }
}

impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}
