//! Process-wide install event bus
//!
//! One bus is created at the application root and handed to every producer
//! and subscriber by `Arc`. It keeps the most recent states so a subscriber
//! that attaches late (a UI reattaching, a CLI started after the OS callback
//! fired) immediately sees where the current attempt stands.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use sideload_errors::Error;
use sideload_types::InstallState;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::machine::{next_state, Transition};

/// Default number of live states buffered per subscriber before it lags
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel of [`InstallState`] with a replay buffer
#[derive(Debug)]
pub struct InstallEventBus {
    replay: Mutex<VecDeque<InstallState>>,
    replay_capacity: usize,
    sender: broadcast::Sender<InstallState>,
}

impl InstallEventBus {
    /// Create a bus whose retained state is `Idle`
    #[must_use]
    pub fn new(replay_capacity: usize, channel_capacity: usize) -> Self {
        Self::with_state(InstallState::Idle, replay_capacity, channel_capacity)
    }

    /// Create a bus that already retains `state`, e.g. one carried over from
    /// a previous application lifetime
    #[must_use]
    pub fn with_state(state: InstallState, replay_capacity: usize, channel_capacity: usize) -> Self {
        let replay_capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        let mut replay = VecDeque::with_capacity(replay_capacity);
        replay.push_back(state);
        Self {
            replay: Mutex::new(replay),
            replay_capacity,
            sender,
        }
    }

    /// Apply a transition to the current state and broadcast the result.
    ///
    /// Safe to call from any thread. Concurrent calls are serialized, so every
    /// subscriber observes states in the order they were accepted here.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::IllegalTransition` if the transition table does
    /// not allow `transition` in the current state; nothing is published.
    pub fn emit(&self, transition: Transition) -> Result<InstallState, Error> {
        let mut replay = self.lock_replay();
        let current = replay.back().cloned().unwrap_or_default();

        let next = match next_state(&current, &transition) {
            Ok(next) => next,
            Err(err) => {
                warn!(
                    from = current.name(),
                    trigger = transition.name(),
                    "rejected install state transition"
                );
                return Err(err.into());
            }
        };

        debug!(
            from = current.name(),
            to = next.name(),
            trigger = transition.name(),
            "install state transition"
        );
        self.push_locked(&mut replay, next.clone());
        Ok(next)
    }

    /// Replace a stale `Success` or `Error` left from an earlier attempt with
    /// `Idle`, dropping the stale history so it cannot resurface.
    ///
    /// Returns `true` if a reset happened.
    pub fn reset_stale_terminal(&self) -> bool {
        let mut replay = self.lock_replay();
        let stale = replay.back().is_some_and(InstallState::is_terminal);
        if stale {
            debug!("resetting stale terminal install state");
            replay.clear();
            self.push_locked(&mut replay, InstallState::Idle);
        }
        stale
    }

    /// Latest published state
    #[must_use]
    pub fn current(&self) -> InstallState {
        self.lock_replay().back().cloned().unwrap_or_default()
    }

    /// Attach a subscriber.
    ///
    /// The subscription first yields the retained states (oldest first), then
    /// every state published afterwards. Snapshot and attach happen under the
    /// publish lock so no state is skipped or seen twice.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let replay = self.lock_replay();
        Subscription {
            backlog: replay.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    fn push_locked(&self, replay: &mut VecDeque<InstallState>, state: InstallState) {
        if replay.len() == self.replay_capacity {
            replay.pop_front();
        }
        replay.push_back(state.clone());
        // No subscribers is fine: the replay buffer still holds the state
        let _ = self.sender.send(state);
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<InstallState>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.replay
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for InstallEventBus {
    fn default() -> Self {
        Self::new(1, DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Ordered view of the bus for one subscriber
#[derive(Debug)]
pub struct Subscription {
    backlog: VecDeque<InstallState>,
    receiver: broadcast::Receiver<InstallState>,
}

impl Subscription {
    /// Wait for the next state. Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<InstallState> {
        if let Some(state) = self.backlog.pop_front() {
            return Some(state);
        }
        loop {
            match self.receiver.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "install state subscriber lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next state if one is already available
    pub fn try_recv(&mut self) -> Option<InstallState> {
        if let Some(state) = self.backlog.pop_front() {
            return Some(state);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(state) => return Some(state),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "install state subscriber lagged, skipping ahead");
                }
                Err(_) => return None,
            }
        }
    }
}
