//! Step-time measurement of an [`Environment`].
//!
//! The driver behaves like an agent that only sees the observed boards: for every slot it decodes
//! the last state, picks a uniformly random legal move for the scored side and sends it. Only the
//! `step` call itself is timed.

use std::time::{Duration, Instant};

use rand::{rngs::StdRng, seq::IndexedRandom, SeedableRng};
use shakmaty::{uci::Uci, CastlingMode, Position};
use tracing::{debug, info, instrument};

use crate::codec::{decode_position, BoardVector};
use crate::environment::Environment;
use crate::session::{Action, SCORED_SIDE};

/// Timings of one environment configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    /// [`Environment::name`] of the measured environment.
    pub name: String,
    /// Number of slots.
    pub n_envs: usize,
    /// Duration of each `step` call, in call order.
    pub step_times: Vec<Duration>,
}

impl BenchReport {
    /// `name,n_envs,t_1,…,t_k` with times in seconds.
    pub fn csv_row(&self) -> String {
        let mut fields = vec![self.name.clone(), self.n_envs.to_string()];
        fields.extend(
            self.step_times
                .iter()
                .map(|time| format!("{:.9}", time.as_secs_f64())),
        );
        fields.join(",")
    }
}

/// Resets `env`, then times `steps` calls to `step` with agent moves drawn by a generator
/// seeded with `seed` (OS entropy when `None`). Cleans `env` afterwards, also on failure.
#[instrument(skip(env), fields(name = env.name(), n_envs = env.num_envs()))]
pub fn benchmark<E>(env: &mut E, steps: usize, seed: Option<u64>) -> anyhow::Result<BenchReport>
where
    E: Environment + ?Sized,
{
    let result = time_steps(env, steps, seed);
    let cleaned = env.clean();
    let step_times = result?;
    cleaned?;

    let total: Duration = step_times.iter().sum();
    info!(?total, "benchmark finished");
    Ok(BenchReport {
        name: env.name().to_owned(),
        n_envs: env.num_envs(),
        step_times,
    })
}

fn time_steps<E>(env: &mut E, steps: usize, seed: Option<u64>) -> anyhow::Result<Vec<Duration>>
where
    E: Environment + ?Sized,
{
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut states = env.reset()?;
    let mut step_times = Vec::with_capacity(steps);
    for step in 0..steps {
        let actions = states
            .iter()
            .map(|state| sample_action(state, &mut rng))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let start = Instant::now();
        let batch = env.step(&actions)?;
        let elapsed = start.elapsed();

        debug!(step, ?elapsed, done = batch.dones.iter().filter(|d| **d).count());
        step_times.push(elapsed);
        states = batch.states;
    }
    Ok(step_times)
}

/// A uniformly random legal move of the scored side in the position `state` shows.
///
/// Falls back to the null move when there is none; the environment treats it as illegal, which
/// ends the episode.
pub fn sample_action(state: &BoardVector, rng: &mut StdRng) -> anyhow::Result<Action> {
    let position = decode_position(state, SCORED_SIDE)?;
    let action = position
        .legal_moves()
        .choose(rng)
        .map(|m| Uci::from_move(m, CastlingMode::Standard))
        .unwrap_or(Uci::Null);
    Ok(action)
}

/// The default list of environment counts: 1, 2, 4, …, 512.
pub fn default_env_counts() -> Vec<usize> {
    (0..10).map(|p| 1 << p).collect()
}
