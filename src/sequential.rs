//! All slots stepped one after the other on the calling thread.

use anyhow::Context;
use tracing::{debug, instrument};

use crate::batch::{Batch, StepResult};
use crate::codec::BoardVector;
use crate::configuration::Configuration;
use crate::environment::{check_action_count, Environment};
use crate::opponent::{OpponentFactory, OpponentPolicy, RandomOpponent, RandomOpponentFactory};
use crate::session::{Action, GameSession};

/// A session together with the opponent answering in it.
#[derive(Debug, Clone)]
pub(crate) struct Slot<O> {
    pub(crate) session: GameSession,
    pub(crate) opponent: O,
}

impl<O: OpponentPolicy> Slot<O> {
    pub(crate) fn new(opponent: O) -> Self {
        Self {
            session: GameSession::new(),
            opponent,
        }
    }

    pub(crate) fn step(&mut self, action: &Action) -> anyhow::Result<StepResult> {
        let outcome = self.session.step(action, &mut self.opponent)?;
        Ok(StepResult {
            state: self.session.encode(),
            reward: outcome.reward,
            done: outcome.done,
        })
    }
}

pub(crate) fn create_slots<O, F>(n: usize, factory: &F) -> Vec<Slot<O>>
where
    O: OpponentPolicy,
    F: OpponentFactory<O>,
{
    (0..n).map(|i| Slot::new(factory.new_opponent(i))).collect()
}

/// N independent games stepped in index order, with no concurrency.
#[derive(Debug)]
pub struct SequentialEnvironment<O = RandomOpponent> {
    slots: Vec<Slot<O>>,
}

impl SequentialEnvironment<RandomOpponent> {
    /// `n` games against random opponents seeded from `config`.
    pub fn new(n: usize, config: &Configuration) -> Self {
        Self::with_opponents(n, &RandomOpponentFactory::new(config.seed()))
    }
}

impl<O: OpponentPolicy> SequentialEnvironment<O> {
    /// `n` games, slot `i` answered by `factory.new_opponent(i)`.
    #[instrument(skip(factory))]
    pub fn with_opponents<F: OpponentFactory<O>>(n: usize, factory: &F) -> Self {
        debug!("creating sequential environment");
        Self {
            slots: create_slots(n, factory),
        }
    }

    /// The sessions, in slot order.
    pub fn sessions(&self) -> impl Iterator<Item = &GameSession> {
        self.slots.iter().map(|slot| &slot.session)
    }
}

impl<O: OpponentPolicy> Environment for SequentialEnvironment<O> {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn num_envs(&self) -> usize {
        self.slots.len()
    }

    fn reset(&mut self) -> anyhow::Result<Vec<BoardVector>> {
        Ok(self.slots.iter().map(|slot| slot.session.encode()).collect())
    }

    fn step(&mut self, actions: &[Action]) -> anyhow::Result<Batch> {
        check_action_count(self.slots.len(), actions)?;

        let mut batch = Batch::with_capacity(self.slots.len());
        for (i, (slot, action)) in self.slots.iter_mut().zip(actions).enumerate() {
            batch.push(slot.step(action).with_context(|| format!("slot {i}"))?);
        }
        Ok(batch)
    }

    /// Nothing to release.
    fn clean(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
