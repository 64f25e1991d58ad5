//! Index-aligned batches of step results.
//!
//! Slot `i` of every array in a [`Batch`] always refers to the same game, whatever the order in
//! which the games were actually stepped.

use serde::{Deserialize, Serialize};

use crate::codec::BoardVector;

/// What one slot reports after a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The board after the step (the initial board if the episode ended).
    pub state: BoardVector,
    /// Reward of the step, from White's side.
    pub reward: f32,
    /// Whether the episode ended with this step.
    pub done: bool,
}

/// The aligned `(states, rewards, dones)` triple returned by `step`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    /// Board of every slot after the step.
    pub states: Vec<BoardVector>,
    /// Reward of every slot.
    pub rewards: Vec<f32>,
    /// Episode end flag of every slot.
    pub dones: Vec<bool>,
}

impl Batch {
    /// An empty batch with room for `n` slots.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            states: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the batch has no slot.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Appends the result of the next slot.
    pub fn push(&mut self, result: StepResult) {
        self.states.push(result.state);
        self.rewards.push(result.reward);
        self.dones.push(result.done);
    }

    /// The result of slot `index`.
    pub fn get(&self, index: usize) -> Option<StepResult> {
        Some(StepResult {
            state: *self.states.get(index)?,
            reward: *self.rewards.get(index)?,
            done: *self.dones.get(index)?,
        })
    }

    /// The results in slot order.
    pub fn iter(&self) -> impl Iterator<Item = StepResult> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}

impl FromIterator<StepResult> for Batch {
    fn from_iter<I: IntoIterator<Item = StepResult>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut batch = Batch::with_capacity(iter.size_hint().0);
        for result in iter {
            batch.push(result);
        }
        batch
    }
}

/// Pre-allocated slots that can be filled in any order.
#[derive(Debug)]
pub struct BatchCollector<T> {
    slots: Vec<Option<T>>,
    filled: usize,
}

impl<T> BatchCollector<T> {
    /// `n` empty slots.
    pub fn new(n: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(n).collect(),
            filled: 0,
        }
    }

    /// Fills slot `index`. Returns `false` (and keeps the first value) if the slot was already
    /// filled or does not exist.
    pub fn insert(&mut self, index: usize, value: T) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(value);
                self.filled += 1;
                true
            }
            _ => false,
        }
    }

    /// Whether every slot is filled.
    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Slots still waiting for a value, in increasing order.
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect()
    }

    /// All values in slot order, or `None` if some slot is still empty.
    pub fn into_vec(self) -> Option<Vec<T>> {
        self.slots.into_iter().collect()
    }
}

#[cfg(test)]
mod batch_tests {
    use super::*;

    fn result(code: u8, reward: f32, done: bool) -> StepResult {
        let mut state = BoardVector::empty();
        state.0[0] = code;
        StepResult {
            state,
            reward,
            done,
        }
    }

    #[test]
    fn collector_aligns_out_of_order_inserts() {
        let mut collector = BatchCollector::new(4);
        for i in [3, 1, 0, 2] {
            assert!(!collector.is_complete());
            assert!(collector.insert(i, result(i as u8, i as f32, i % 2 == 0)));
        }
        assert!(collector.is_complete());

        let batch: Batch = collector.into_vec().unwrap().into_iter().collect();
        assert_eq!(batch.len(), 4);
        for (i, r) in batch.iter().enumerate() {
            assert_eq!(r.state.0[0], i as u8);
            assert_eq!(r.reward, i as f32);
            assert_eq!(r.done, i % 2 == 0);
        }
    }

    #[test]
    fn collector_keeps_first_value() {
        let mut collector = BatchCollector::new(2);
        assert!(collector.insert(1, 10));
        assert!(!collector.insert(1, 20));
        assert!(!collector.insert(5, 30));
        assert_eq!(collector.missing(), vec![0]);
        assert!(collector.into_vec().is_none());
    }

    #[test]
    fn empty_collector_is_complete() {
        let collector = BatchCollector::<StepResult>::new(0);
        assert!(collector.is_complete());
        assert_eq!(collector.into_vec(), Some(vec![]));
    }

    #[test]
    fn batch_get_out_of_range() {
        let batch: Batch = vec![result(1, 0.0, false)].into_iter().collect();
        assert!(batch.get(0).is_some());
        assert!(batch.get(1).is_none());
        assert!(!batch.is_empty());
    }
}
