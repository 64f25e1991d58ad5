//! # Chess VecEnv
//!
//! Batched, resettable chess environments for comparing the cost of stepping many independent
//! games under different execution strategies.
//!
//! It provides:
//! - A fixed 64-entry numeric board encoding ([`codec`])
//! - A self-resetting game session that plays one agent move and one opponent reply per step
//!   ([`session`])
//! - Three interchangeable strategies behind the [`Environment`](crate::environment::Environment)
//!   trait: [`SequentialEnvironment`](crate::sequential::SequentialEnvironment),
//!   [`ParallelEnvironment`](crate::parallel::ParallelEnvironment) and
//!   [`BatchedEnvironment`](crate::batched::BatchedEnvironment) (one worker per game, as a thread
//!   or as a child process)
//! - A benchmark driver producing the raw duration of every `step` call ([`bench`])
//!
//! Every strategy returns index-aligned batches: slot `i` of the states, rewards and dones always
//! refers to the same game, even though games are silently restarted underneath that index when
//! they end.
//!
//! # Documentation Overview
//!
//! - For the step semantics (rewards, illegal moves, auto-reset), see
//!   [`GameSession::step`](crate::session::GameSession::step).
//! - For the worker protocol, see the [`worker`] module.
//! - For timeouts, seeds, threads and execution mode, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the failures an environment can report, see [`EnvError`](crate::error::EnvError).
//!
//! # Usage Example
//!
//! ```
//! use chess_vecenv::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_seed(Some(7));
//!     let mut env = SequentialEnvironment::new(4, &config);
//!
//!     let states = env.reset()?;
//!     assert_eq!(states.len(), 4);
//!
//!     // the same opening move in every game, except an illegal one in slot 3
//!     let mut actions: Vec<Action> = vec!["e2e4".parse()?; 4];
//!     actions[3] = "e2e5".parse()?;
//!
//!     let batch = env.step(&actions)?;
//!     assert_eq!(batch.dones, vec![false, false, false, true]);
//!     assert_eq!(batch.rewards[3], -1.0);
//!
//!     env.clean()?;
//!     Ok(())
//! }
//! ```
//!
//! # Worker Processes
//!
//! With [`Execution::Processes`](crate::configuration::Execution::Processes), every worker of a
//! [`BatchedEnvironment`](crate::batched::BatchedEnvironment) is a child process running the
//! `worker` subcommand of the `chess-vecenv` binary:
//!
//! - Orchestrator -> Worker : one UCI move per line on stdin
//! - Worker -> Orchestrator : one JSON [`WorkerMessage`](crate::worker::WorkerMessage) per line
//!   on stdout
#![warn(missing_docs)]

pub use anyhow;
pub mod batch;
pub mod batched;
pub mod bench;
pub mod codec;
pub mod configuration;
pub mod environment;
pub mod error;
pub mod logger;
pub mod opponent;
pub mod parallel;
mod process;
pub mod sequential;
pub mod session;
pub mod worker;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use chess_vecenv::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - the [`Environment`](crate::environment::Environment) trait and its three implementations
/// - the built-in opponents
pub mod prelude {
    pub use crate::batch::{Batch, StepResult};
    pub use crate::batched::BatchedEnvironment;
    pub use crate::codec::BoardVector;
    pub use crate::configuration::{Configuration, Execution};
    pub use crate::environment::Environment;
    pub use crate::error::EnvError;
    pub use crate::opponent::{FirstLegalOpponent, OpponentPolicy, RandomOpponent};
    pub use crate::parallel::ParallelEnvironment;
    pub use crate::sequential::SequentialEnvironment;
    pub use crate::session::Action;
}
