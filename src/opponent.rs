//! The side that answers the scored side's moves.
//!
//! An [`OpponentPolicy`] picks the reply played after every accepted action. Environments create
//! one policy per slot through an [`OpponentFactory`], so a policy never has to be shared between
//! threads or processes.

use rand::{rngs::StdRng, seq::IndexedRandom, SeedableRng};
use shakmaty::{Chess, Move, Position};

/// Chooses a reply in a position that is not over.
pub trait OpponentPolicy {
    /// Returns the move to play in `position`.
    ///
    /// Returning `None` (or a move that is not legal) in a position that is not over is a
    /// policy failure, reported by the session as
    /// [`EnvError::OpponentStalled`](crate::error::EnvError::OpponentStalled).
    fn select_reply(&mut self, position: &Chess) -> Option<Move>;
}

impl<F> OpponentPolicy for F
where
    F: FnMut(&Chess) -> Option<Move>,
{
    fn select_reply(&mut self, position: &Chess) -> Option<Move> {
        self(position)
    }
}

/// Uniformly random choice among the legal moves. The default opponent.
#[derive(Debug, Clone)]
pub struct RandomOpponent {
    rng: StdRng,
}

impl RandomOpponent {
    /// Seeded from `seed`, or from OS entropy when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }
}

impl OpponentPolicy for RandomOpponent {
    fn select_reply(&mut self, position: &Chess) -> Option<Move> {
        position.legal_moves().choose(&mut self.rng).cloned()
    }
}

/// Always plays the first legal move in generation order.
///
/// Fully deterministic, which makes runs of different execution strategies comparable move for
/// move.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstLegalOpponent;

impl OpponentPolicy for FirstLegalOpponent {
    fn select_reply(&mut self, position: &Chess) -> Option<Move> {
        position.legal_moves().first().cloned()
    }
}

/// What will be given to an environment to create one opponent per slot.
pub trait OpponentFactory<O: OpponentPolicy> {
    /// Returns the opponent of slot `index`.
    fn new_opponent(&self, index: usize) -> O;
}

impl<O, F> OpponentFactory<O> for F
where
    O: OpponentPolicy,
    F: Fn(usize) -> O,
{
    fn new_opponent(&self, index: usize) -> O {
        self(index)
    }
}

/// Creates [`RandomOpponent`]s; slot `i` is seeded with `seed + i` when a seed is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOpponentFactory {
    seed: Option<u64>,
}

impl RandomOpponentFactory {
    /// Seeds derived from `seed`, or OS entropy for every slot when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }
}

impl OpponentFactory<RandomOpponent> for RandomOpponentFactory {
    fn new_opponent(&self, index: usize) -> RandomOpponent {
        RandomOpponent::new(slot_seed(self.seed, index))
    }
}

/// Seed of slot `index` derived from a base seed.
pub fn slot_seed(seed: Option<u64>, index: usize) -> Option<u64> {
    seed.map(|s| s.wrapping_add(index as u64))
}
