//! Module defining the contract shared by every execution strategy.
//!
//! [`SequentialEnvironment`](crate::sequential::SequentialEnvironment),
//! [`ParallelEnvironment`](crate::parallel::ParallelEnvironment) and
//! [`BatchedEnvironment`](crate::batched::BatchedEnvironment) all implement [`Environment`] and
//! return batches of identical shape, so one can be swapped for another in a benchmark.

use crate::batch::Batch;
use crate::codec::BoardVector;
use crate::error::EnvError;
use crate::session::Action;

/// A batch of `num_envs()` independent, self-resetting chess games.
pub trait Environment {
    /// Short name used in benchmark output.
    fn name(&self) -> &'static str;

    /// Number of slots.
    fn num_envs(&self) -> usize;

    /// The current board of every slot.
    ///
    /// Meant to be called once, right after construction, when every slot is at the initial
    /// position.
    fn reset(&mut self) -> anyhow::Result<Vec<BoardVector>>;

    /// Applies `actions[i]` to slot `i` and returns the aligned results.
    ///
    /// # Error
    /// [`EnvError::ActionCountMismatch`] if `actions.len() != num_envs()`. Illegal actions are
    /// not errors.
    fn step(&mut self, actions: &[Action]) -> anyhow::Result<Batch>;

    /// Releases whatever the environment holds (threads, processes). The environment cannot be
    /// stepped afterwards.
    fn clean(&mut self) -> anyhow::Result<()>;
}

pub(crate) fn check_action_count(expected: usize, actions: &[Action]) -> anyhow::Result<()> {
    if actions.len() != expected {
        return Err(EnvError::ActionCountMismatch {
            expected,
            got: actions.len(),
        }
        .into());
    }
    Ok(())
}
