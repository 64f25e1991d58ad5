use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use chess_vecenv::{
    bench::sample_action,
    codec::{decode, encode},
    prelude::*,
    session::GameSession,
};
use rand::{rngs::StdRng, SeedableRng};
use shakmaty::{Chess, Move, Position};
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};

struct CustomLevelFilter;
impl<S> Filter<S> for CustomLevelFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::INFO
    }
}

fn init_debug_logger() {
    let format = fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);

    let reg = Registry::default().with(
        fmt::layer()
            .with_test_writer()
            .event_format(format)
            .with_filter(CustomLevelFilter),
    );

    let _ = tracing::subscriber::set_global_default(reg);
}

fn uci(s: &str) -> Action {
    s.parse().unwrap()
}

fn initial() -> BoardVector {
    GameSession::new().encode()
}

fn config() -> Configuration {
    Configuration::new()
        .with_seed(Some(2024))
        .with_threads(3)
        .with_collect_timeout(Some(Duration::from_secs(20)))
}

/// One of each strategy, all answered by [`FirstLegalOpponent`].
fn deterministic_envs(n: usize) -> Vec<Box<dyn Environment>> {
    let factory = |_: usize| FirstLegalOpponent;
    vec![
        Box::new(SequentialEnvironment::with_opponents(n, &factory)),
        Box::new(ParallelEnvironment::with_opponents(n, 3, &factory)),
        Box::new(BatchedEnvironment::with_threads(n, &factory, &config()).unwrap()),
    ]
}

#[test]
fn round_trip_through_random_games() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut session = GameSession::new();
    let mut opponent = RandomOpponent::new(Some(100));

    for _ in 0..400 {
        let state = session.encode();
        assert_eq!(&decode(&state), session.position().board());
        assert_eq!(encode(&decode(&state)), state);

        let action = sample_action(&state, &mut rng).unwrap();
        session.step(&action, &mut opponent).unwrap();
    }
    assert!(session.plies() > 0);
}

#[test]
fn strategies_agree_with_deterministic_opponents() {
    let n = 6;
    let mut envs = deterministic_envs(n);
    for env in envs.iter_mut() {
        assert_eq!(env.reset().unwrap(), vec![initial(); n]);
    }

    let rounds = [
        ["e2e4", "d2d4", "g1f3", "e2e5", "c2c4", "b1c3"],
        ["g1f3", "c2c4", "d2d4", "f2f4", "b1c3", "e1e8"],
        ["f1c4", "b1c3", "e2e3", "g1f3", "g1f3", "e2e4"],
        ["a2a3", "a2a3", "a2a3", "a2a3", "a2a3", "a2a3"],
    ];
    for round in rounds {
        let actions: Vec<Action> = round.iter().map(|s| uci(s)).collect();
        let batches: Vec<Batch> = envs
            .iter_mut()
            .map(|env| env.step(&actions).unwrap())
            .collect();
        for batch in &batches[1..] {
            assert_eq!(batch.len(), n);
            assert_eq!(batch, &batches[0]);
        }
    }

    for env in envs.iter_mut() {
        env.clean().unwrap();
    }
}

#[test]
fn strategies_agree_with_seeded_random_opponents() {
    let n = 5;
    let config = config();
    let mut envs: Vec<Box<dyn Environment>> = vec![
        Box::new(SequentialEnvironment::new(n, &config)),
        Box::new(ParallelEnvironment::new(n, &config)),
        Box::new(BatchedEnvironment::new(n, &config).unwrap()),
    ];

    let mut rngs: Vec<StdRng> = (0..envs.len()).map(|_| StdRng::seed_from_u64(8)).collect();
    let mut states: Vec<Vec<BoardVector>> = envs.iter_mut().map(|e| e.reset().unwrap()).collect();

    for _ in 0..30 {
        let mut batches = Vec::new();
        for ((env, rng), states) in envs.iter_mut().zip(&mut rngs).zip(&mut states) {
            let actions: Vec<Action> = states
                .iter()
                .map(|s| sample_action(s, rng).unwrap())
                .collect();
            let batch = env.step(&actions).unwrap();
            *states = batch.states.clone();
            batches.push(batch);
        }
        assert!(batches.iter().all(|b| b == &batches[0]));
    }
}

#[test]
fn illegal_move_outcome_in_every_strategy() {
    let n = 4;
    for mut env in deterministic_envs(n) {
        env.reset().unwrap();
        env.step(&vec![uci("e2e4"); n]).unwrap();

        // the pawn already left e2
        let mut actions = vec![uci("d2d4"); n];
        actions[2] = uci("e2e4");
        let batch = env.step(&actions).unwrap();

        assert_eq!(batch.rewards[2], -1.0, "{}", env.name());
        assert!(batch.dones[2]);
        assert_eq!(batch.states[2], initial());
        for i in [0, 1, 3] {
            assert!(!batch.dones[i]);
            assert_eq!(batch.rewards[i], 0.0);
            assert_ne!(batch.states[i], initial());
        }
        env.clean().unwrap();
    }
}

#[test]
fn auto_reset_in_every_strategy() {
    let n = 3;
    for mut env in deterministic_envs(n) {
        env.reset().unwrap();

        // slot 1 ends its episode on the first step
        let batch = env
            .step(&[uci("e2e4"), uci("e1e2"), uci("e2e4")])
            .unwrap();
        assert_eq!(batch.dones, vec![false, true, false]);
        assert_eq!(batch.states[1], initial());

        // without any reset, the next action of slot 1 is played from the initial position
        let batch = env
            .step(&[uci("d2d4"), uci("e2e4"), uci("d2d4")])
            .unwrap();
        assert_eq!(batch.dones, vec![false, false, false]);

        let mut expected = GameSession::new();
        expected
            .step(&uci("e2e4"), &mut FirstLegalOpponent)
            .unwrap();
        assert_eq!(batch.states[1], expected.encode(), "{}", env.name());
        env.clean().unwrap();
    }
}

#[test]
fn alignment_under_reversed_completion() {
    let n = 5;
    let finished = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let finished = Arc::clone(&finished);
        move |index: usize| {
            let finished = Arc::clone(&finished);
            // lower slots answer later
            let delay = Duration::from_millis(60 * (n - index) as u64);
            move |pos: &Chess| -> Option<Move> {
                thread::sleep(delay);
                finished.lock().unwrap().push(index);
                pos.legal_moves().first().cloned()
            }
        }
    };

    let mut batched = BatchedEnvironment::with_threads(n, &factory, &config()).unwrap();
    let mut sequential = SequentialEnvironment::with_opponents(n, &|_: usize| FirstLegalOpponent);
    batched.reset().unwrap();

    let actions: Vec<Action> = ["a2a3", "b2b4", "c2c3", "e1e2", "g1f3"]
        .iter()
        .map(|s| uci(s))
        .collect();
    let batch = batched.step(&actions).unwrap();

    let order = finished.lock().unwrap().clone();
    // slot 3 played an illegal move, so no opponent reply
    assert_eq!(order, vec![4, 2, 1, 0]);

    assert_eq!(batch, sequential.step(&actions).unwrap());
    assert_eq!(batch.dones, vec![false, false, false, true, false]);
    batched.clean().unwrap();
}

#[test]
fn clean_with_a_step_in_flight() {
    init_debug_logger();
    for n in [1, 8, 64] {
        let slow = |_: usize| {
            |pos: &Chess| -> Option<Move> {
                thread::sleep(Duration::from_millis(50));
                pos.legal_moves().first().cloned()
            }
        };
        let mut env = BatchedEnvironment::with_threads(n, &slow, &config()).unwrap();
        env.reset().unwrap();
        env.send_actions(&vec![uci("e2e4"); n]).unwrap();

        env.clean().unwrap();
        let err = env.step(&vec![uci("d2d4"); n]).unwrap_err();
        assert_eq!(err.downcast_ref::<EnvError>(), Some(&EnvError::Cleaned));
    }
}

#[test]
fn drop_without_clean_stops_workers() {
    for n in [1, 8, 64] {
        let mut env =
            BatchedEnvironment::with_threads(n, &|_: usize| FirstLegalOpponent, &config()).unwrap();
        env.send_actions(&vec![uci("e2e4"); n]).unwrap();
        drop(env);
    }
}

#[test]
fn action_count_is_checked_everywhere() {
    for mut env in deterministic_envs(3) {
        env.reset().unwrap();
        let err = env.step(&[uci("e2e4")]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<EnvError>(),
            Some(&EnvError::ActionCountMismatch {
                expected: 3,
                got: 1
            })
        );
        env.clean().unwrap();
    }
}
