//! Typed failures of the environments.
//!
//! Public functions return [`anyhow::Result`]; when the failure is one of the cases below it is
//! carried as an [`EnvError`] and can be recovered with
//! [`anyhow::Error::downcast_ref`].
//!
//! An illegal action is *not* an error: it ends the episode with a penalty (see
//! [`GameSession::step`](crate::session::GameSession::step)).

use std::time::Duration;

/// Failures that callers may want to tell apart.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvError {
    /// `step` received a number of actions different from the number of slots.
    #[error("expected {expected} actions (one per slot), got {got}")]
    ActionCountMismatch {
        /// Number of slots.
        expected: usize,
        /// Number of actions received.
        got: usize,
    },

    /// Some workers did not answer before the collection deadline.
    #[error("workers {indices:?} did not answer within {waited:?}")]
    WorkerUnresponsive {
        /// Slots still missing a result.
        indices: Vec<usize>,
        /// How long the orchestrator waited.
        waited: Duration,
    },

    /// The result channel of a worker was closed (crash, kill, broken pipe).
    #[error("worker {index} disconnected")]
    WorkerDisconnected {
        /// Slot of the worker.
        index: usize,
    },

    /// A worker could not be started.
    #[error("could not start worker {index}")]
    WorkerSpawn {
        /// Slot of the worker.
        index: usize,
    },

    /// A worker sent something that does not follow the protocol.
    #[error("worker {index} broke the protocol: {message}")]
    Protocol {
        /// Slot of the worker.
        index: usize,
        /// What went wrong.
        message: String,
    },

    /// A worker could not compute the result of its action.
    #[error("worker {index} failed: {message}")]
    WorkerFailed {
        /// Slot of the worker.
        index: usize,
        /// The worker's own report.
        message: String,
    },

    /// A board vector does not describe a playable position.
    #[error("invalid board vector: {0}")]
    InvalidBoard(String),

    /// The opponent policy returned no legal reply in a position that is not over.
    #[error("opponent policy produced no legal reply")]
    OpponentStalled,

    /// The environment was used after `clean()`.
    #[error("environment already cleaned up")]
    Cleaned,
}
