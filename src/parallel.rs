//! Slots partitioned across a fixed number of scoped threads for every step.
//!
//! This is the shared-memory counterpart of the worker-per-game strategy: no channels, no
//! long-lived workers, just a parallel loop over contiguous chunks of slots.

use std::thread;

use anyhow::{anyhow, Context};
use tracing::{debug, instrument};

use crate::batch::{Batch, StepResult};
use crate::codec::BoardVector;
use crate::configuration::Configuration;
use crate::environment::{check_action_count, Environment};
use crate::opponent::{OpponentFactory, OpponentPolicy, RandomOpponent, RandomOpponentFactory};
use crate::sequential::{create_slots, Slot};
use crate::session::Action;

/// N independent games stepped by up to `threads` threads at once.
#[derive(Debug)]
pub struct ParallelEnvironment<O = RandomOpponent> {
    slots: Vec<Slot<O>>,
    threads: usize,
}

impl ParallelEnvironment<RandomOpponent> {
    /// `n` games against random opponents, stepped by `config.threads()` threads.
    pub fn new(n: usize, config: &Configuration) -> Self {
        Self::with_opponents(
            n,
            config.threads(),
            &RandomOpponentFactory::new(config.seed()),
        )
    }
}

impl<O: OpponentPolicy + Send> ParallelEnvironment<O> {
    /// `n` games, slot `i` answered by `factory.new_opponent(i)`.
    #[instrument(skip(factory))]
    pub fn with_opponents<F: OpponentFactory<O>>(n: usize, threads: usize, factory: &F) -> Self {
        let threads = threads.max(1);
        debug!("creating parallel environment");
        Self {
            slots: create_slots(n, factory),
            threads,
        }
    }

    /// Upper bound on the threads used by one `step`.
    pub fn threads(&self) -> usize {
        self.threads
    }

    fn chunk_len(&self) -> usize {
        self.slots.len().div_ceil(self.threads).max(1)
    }
}

impl<O: OpponentPolicy + Send> Environment for ParallelEnvironment<O> {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn num_envs(&self) -> usize {
        self.slots.len()
    }

    fn reset(&mut self) -> anyhow::Result<Vec<BoardVector>> {
        Ok(self.slots.iter().map(|slot| slot.session.encode()).collect())
    }

    fn step(&mut self, actions: &[Action]) -> anyhow::Result<Batch> {
        check_action_count(self.slots.len(), actions)?;
        let chunk_len = self.chunk_len();

        let chunks: Vec<anyhow::Result<Vec<StepResult>>> = thread::scope(|scope| {
            let handles = self
                .slots
                .chunks_mut(chunk_len)
                .zip(actions.chunks(chunk_len))
                .enumerate()
                .map(|(c, (slots, actions))| {
                    scope.spawn(move || step_chunk(c * chunk_len, slots, actions))
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("stepping thread panicked")))
                })
                .collect()
        });

        let mut batch = Batch::with_capacity(self.slots.len());
        for chunk in chunks {
            for result in chunk? {
                batch.push(result);
            }
        }
        Ok(batch)
    }

    /// Nothing to release: threads only live for the duration of a step.
    fn clean(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn step_chunk<O: OpponentPolicy>(
    first_index: usize,
    slots: &mut [Slot<O>],
    actions: &[Action],
) -> anyhow::Result<Vec<StepResult>> {
    slots
        .iter_mut()
        .zip(actions)
        .enumerate()
        .map(|(j, (slot, action))| {
            slot.step(action)
                .with_context(|| format!("slot {}", first_index + j))
        })
        .collect()
}
