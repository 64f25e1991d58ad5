//! One chess game driven one action at a time.
//!
//! A [`GameSession`] is either in play or, for the duration of a single [`GameSession::step`]
//! call, finishing an episode. A finished episode is immediately replaced by the initial position
//! so callers never observe a terminal position.

use serde::{Deserialize, Serialize};
use shakmaty::{
    uci::Uci,
    zobrist::{Zobrist64, ZobristHash},
    Chess, Color, EnPassantMode, Outcome, Position,
};
use tracing::trace;

use crate::codec::{encode, BoardVector};
use crate::error::EnvError;
use crate::opponent::OpponentPolicy;

/// A move proposed by the caller, in UCI notation.
///
/// It only describes intent: the session checks it against its own position.
pub type Action = Uci;

/// The side whose moves are supplied by the caller and whose result is rewarded.
pub const SCORED_SIDE: Color = Color::White;

/// Halfmove clock value at which the game is drawn by the seventy-five-move rule.
const SEVENTY_FIVE_MOVE_PLIES: u32 = 150;

/// Occurrences of one position that draw the game.
const FIVEFOLD: usize = 5;

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpisodeEnd {
    /// The proposed action was not legal in the current position.
    IllegalMove,
    /// The scored side won.
    Won,
    /// The scored side lost.
    Lost,
    /// Stalemate, insufficient material, seventy-five-move rule or fivefold repetition.
    Drawn,
}

impl EpisodeEnd {
    /// Reward given to the scored side.
    pub fn reward(self) -> f32 {
        match self {
            EpisodeEnd::Won => 1.0,
            EpisodeEnd::Drawn => 0.0,
            EpisodeEnd::Lost | EpisodeEnd::IllegalMove => -1.0,
        }
    }
}

/// Result of a single [`GameSession::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// `1`, `0` or `-1` when the episode ended, `0` otherwise.
    pub reward: f32,
    /// Whether the episode ended with this step.
    pub done: bool,
    /// Set exactly when `done` is.
    pub end: Option<EpisodeEnd>,
}

impl StepOutcome {
    const IN_PLAY: StepOutcome = StepOutcome {
        reward: 0.0,
        done: false,
        end: None,
    };

    fn finished(end: EpisodeEnd) -> StepOutcome {
        StepOutcome {
            reward: end.reward(),
            done: true,
            end: Some(end),
        }
    }
}

/// A single game, owned by exactly one execution strategy.
#[derive(Debug, Clone)]
pub struct GameSession {
    position: Chess,
    /// Hashes of the positions since the last irreversible move, current one included.
    history: Vec<Zobrist64>,
    finished_episodes: u64,
    plies: u64,
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    /// A session at the initial position.
    pub fn new() -> Self {
        Self::from_position(Chess::default())
    }

    /// A session starting from `position` instead of the initial one. Episodes after the first
    /// still start from the initial position.
    pub fn from_position(position: Chess) -> Self {
        Self {
            history: vec![position_hash(&position)],
            position,
            finished_episodes: 0,
            plies: 0,
        }
    }

    /// The position the next action applies to.
    pub fn position(&self) -> &Chess {
        &self.position
    }

    /// The current board as a [`BoardVector`].
    pub fn encode(&self) -> BoardVector {
        encode(self.position.board())
    }

    /// Number of episodes that ended since the session was created.
    pub fn finished_episodes(&self) -> u64 {
        self.finished_episodes
    }

    /// Number of moves played by both sides since the session was created.
    pub fn plies(&self) -> u64 {
        self.plies
    }

    /// Plays `action` and, if the game goes on, the reply chosen by `opponent`.
    ///
    /// - An action that is not legal ends the episode with reward `-1`.
    /// - If either move ends the game, the reward is `1`, `0` or `-1` from the point of view of
    ///   [`SCORED_SIDE`].
    /// - Otherwise the reward is `0` and the episode continues.
    ///
    /// Whenever `done` is returned the session is already back at the initial position.
    ///
    /// # Errors
    /// [`EnvError::OpponentStalled`] if `opponent` gives no legal reply in a position that is not
    /// over. The session is reset in that case too.
    pub fn step<O>(&mut self, action: &Action, opponent: &mut O) -> anyhow::Result<StepOutcome>
    where
        O: OpponentPolicy + ?Sized,
    {
        let Ok(proposed) = action.to_move(&self.position) else {
            trace!(%action, "illegal action");
            return Ok(self.finish(EpisodeEnd::IllegalMove));
        };
        self.play(&proposed);
        if let Some(end) = self.episode_end() {
            return Ok(self.finish(end));
        }

        let reply = opponent
            .select_reply(&self.position)
            .filter(|m| self.position.is_legal(m));
        let Some(reply) = reply else {
            self.reset();
            return Err(EnvError::OpponentStalled.into());
        };
        self.play(&reply);
        if let Some(end) = self.episode_end() {
            return Ok(self.finish(end));
        }

        Ok(StepOutcome::IN_PLAY)
    }

    fn play(&mut self, m: &shakmaty::Move) {
        self.position.play_unchecked(m);
        self.plies += 1;
        if self.position.halfmoves() == 0 {
            // no earlier position can come back
            self.history.clear();
        }
        self.history.push(position_hash(&self.position));
    }

    /// How the game stands for [`SCORED_SIDE`], if it is over.
    fn episode_end(&self) -> Option<EpisodeEnd> {
        match self.position.outcome() {
            Some(Outcome::Decisive { winner }) if winner == SCORED_SIDE => Some(EpisodeEnd::Won),
            Some(Outcome::Decisive { .. }) => Some(EpisodeEnd::Lost),
            Some(Outcome::Draw) => Some(EpisodeEnd::Drawn),
            None if self.position.halfmoves() >= SEVENTY_FIVE_MOVE_PLIES => Some(EpisodeEnd::Drawn),
            None if self.repetitions() >= FIVEFOLD => Some(EpisodeEnd::Drawn),
            None => None,
        }
    }

    /// How many times the current position has occurred since the last irreversible move.
    fn repetitions(&self) -> usize {
        match self.history.last() {
            Some(current) => self.history.iter().filter(|h| *h == current).count(),
            None => 0,
        }
    }

    fn finish(&mut self, end: EpisodeEnd) -> StepOutcome {
        trace!(?end, episode = self.finished_episodes, "episode finished");
        self.finished_episodes += 1;
        self.reset();
        StepOutcome::finished(end)
    }

    fn reset(&mut self) {
        self.position = Chess::default();
        self.history.clear();
        self.history.push(position_hash(&self.position));
    }
}

fn position_hash(position: &Chess) -> Zobrist64 {
    position.zobrist_hash(EnPassantMode::Legal)
}
