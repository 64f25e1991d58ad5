//! One worker per game, fanned out and fanned back in by an orchestrator.
//!
//! Every slot of a [`BatchedEnvironment`] is a [`Worker`] exclusively owning its session, reached
//! through two unbounded channels (actions in, messages out). Workers run either on a dedicated
//! thread each or in a child process each (see [`Execution`]); in the second case the channels are
//! the child's stdin and stdout.
//!
//! Collecting a batch is a blocking multi-wait over every worker that has not answered yet, so
//! a slow worker delays the batch without starving the others. Results are written at their
//! slot index whatever order they arrive in.
//!
//! The wait is bounded by [`Configuration::collect_timeout`]. When it expires, when a worker
//! disconnects or when a worker breaks the protocol, the call fails with the matching
//! [`EnvError`] and the environment tears itself down: every later call fails with
//! [`EnvError::Cleaned`]. That teardown never waits for a thread worker still busy with a step;
//! such a thread is detached and exits at its next receive. Only [`Environment::clean`] joins.

use std::{
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    process::{ChildStdin, ChildStdout},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use tracing::{debug, info, instrument, trace, warn};

use crate::batch::{Batch, BatchCollector};
use crate::codec::BoardVector;
use crate::configuration::{Configuration, Execution};
use crate::environment::{check_action_count, Environment};
use crate::error::EnvError;
use crate::opponent::{slot_seed, OpponentFactory, OpponentPolicy, RandomOpponentFactory};
use crate::process::WorkerProcess;
use crate::session::Action;
use crate::worker::{parse_message_line, ChannelTransport, Incoming, Worker, WorkerMessage};

const KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// Orchestrator of N workers, one per slot.
#[derive(Debug)]
pub struct BatchedEnvironment {
    links: Vec<WorkerLink>,
    execution: Execution,
    collect_timeout: Option<Duration>,
    /// Last states seen, `None` until the initial states are collected.
    observed: Option<Vec<BoardVector>>,
    in_flight: bool,
    cleaned: bool,
}

impl BatchedEnvironment {
    /// `n` workers playing against random opponents, run as threads or processes according to
    /// `config.execution()`.
    pub fn new(n: usize, config: &Configuration) -> anyhow::Result<Self> {
        match config.execution() {
            Execution::Threads => {
                Self::with_threads(n, &RandomOpponentFactory::new(config.seed()), config)
            }
            Execution::Processes => Self::with_processes(n, &config.worker_program()?, config),
        }
    }

    /// `n` worker threads, worker `i` answered by `factory.new_opponent(i)`.
    ///
    /// # Errors
    /// [`EnvError::WorkerSpawn`] if a thread cannot be started; workers already started are
    /// stopped before returning.
    #[instrument(skip(factory, config))]
    pub fn with_threads<O, F>(n: usize, factory: &F, config: &Configuration) -> anyhow::Result<Self>
    where
        O: OpponentPolicy + Send + 'static,
        F: OpponentFactory<O>,
    {
        Self::start(n, Execution::Threads, config, |index| {
            WorkerLink::spawn_thread(index, factory.new_opponent(index))
        })
    }

    /// `n` child processes running `program worker --index i [--seed s]`, each against a random
    /// opponent.
    ///
    /// # Errors
    /// [`EnvError::WorkerSpawn`] if a process cannot be started; processes already started are
    /// killed before returning.
    #[instrument(skip(config))]
    pub fn with_processes(n: usize, program: &Path, config: &Configuration) -> anyhow::Result<Self> {
        Self::start(n, Execution::Processes, config, |index| {
            WorkerLink::spawn_process(index, program, slot_seed(config.seed(), index))
        })
    }

    fn start(
        n: usize,
        execution: Execution,
        config: &Configuration,
        mut spawn: impl FnMut(usize) -> anyhow::Result<WorkerLink>,
    ) -> anyhow::Result<Self> {
        let started = Instant::now();
        let mut links = Vec::with_capacity(n);
        for index in 0..n {
            match spawn(index) {
                Ok(link) => links.push(link),
                Err(e) => {
                    warn!(index, "could not start worker: {e:#}");
                    shutdown_all(&mut links);
                    return Err(e.context(EnvError::WorkerSpawn { index }));
                }
            }
        }
        info!(n, ?execution, elapsed = ?started.elapsed(), "workers started");

        Ok(Self {
            links,
            execution,
            collect_timeout: config.collect_timeout(),
            observed: None,
            in_flight: false,
            cleaned: false,
        })
    }

    /// How the workers run.
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Sends `actions[i]` to worker `i` without waiting for the results.
    ///
    /// Must be followed by [`collect_step`](Self::collect_step) before anything else is sent.
    pub fn send_actions(&mut self, actions: &[Action]) -> anyhow::Result<()> {
        self.check_usable()?;
        check_action_count(self.links.len(), actions)?;
        if self.in_flight {
            bail!("the results of the previous actions were not collected");
        }
        self.ensure_started()?;

        let failure = self
            .links
            .iter_mut()
            .zip(actions)
            .find_map(|(link, action)| link.send(action).err());
        if let Some(e) = failure {
            return Err(self.fail(e));
        }
        self.in_flight = true;
        Ok(())
    }

    /// Waits for the answer of every worker to the actions sent last.
    pub fn collect_step(&mut self) -> anyhow::Result<Batch> {
        self.check_usable()?;
        if !self.in_flight {
            bail!("no actions were sent");
        }

        let results = match self.collect("step results", |message| match message {
            WorkerMessage::Step(result) => Some(result),
            _ => None,
        }) {
            Ok(results) => results,
            Err(e) => return Err(self.fail(e)),
        };
        self.in_flight = false;

        let batch: Batch = results.into_iter().collect();
        self.observed = Some(batch.states.clone());
        Ok(batch)
    }

    /// Collects the initial state of every worker, once.
    fn ensure_started(&mut self) -> anyhow::Result<()> {
        if self.observed.is_some() {
            return Ok(());
        }
        match self.collect("initial states", |message| match message {
            WorkerMessage::Initial(state) => Some(state),
            _ => None,
        }) {
            Ok(states) => {
                self.observed = Some(states);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Blocks until every worker sent one message accepted by `accept`, in any order.
    fn collect<T>(
        &self,
        what: &str,
        accept: impl Fn(WorkerMessage) -> Option<T>,
    ) -> anyhow::Result<Vec<T>> {
        let started = Instant::now();
        let deadline = self.collect_timeout.map(|timeout| started + timeout);
        let mut collector = BatchCollector::new(self.links.len());

        while !collector.is_complete() {
            let pending = collector.missing();
            let mut select = Select::new();
            for &index in &pending {
                select.recv(&self.links[index].messages);
            }

            let operation = match deadline {
                Some(deadline) => match select.select_deadline(deadline) {
                    Ok(operation) => operation,
                    Err(_) => {
                        return Err(EnvError::WorkerUnresponsive {
                            indices: pending,
                            waited: started.elapsed(),
                        }
                        .into())
                    }
                },
                None => select.select(),
            };

            let index = pending[operation.index()];
            let incoming = operation
                .recv(&self.links[index].messages)
                .map_err(|_| EnvError::WorkerDisconnected { index })?;
            let message = incoming.map_err(|message| EnvError::Protocol { index, message })?;
            trace!(index, "message received");

            match message {
                WorkerMessage::Failed(message) => {
                    return Err(EnvError::WorkerFailed { index, message }.into())
                }
                message => {
                    let Some(value) = accept(message) else {
                        return Err(EnvError::Protocol {
                            index,
                            message: format!("unexpected message while waiting for {what}"),
                        }
                        .into());
                    };
                    collector.insert(index, value);
                }
            }
        }

        debug!(what, elapsed = ?started.elapsed(), "batch collected");
        collector
            .into_vec()
            .ok_or_else(|| anyhow!("incomplete batch of {what}"))
    }

    fn check_usable(&self) -> anyhow::Result<()> {
        if self.cleaned {
            return Err(EnvError::Cleaned.into());
        }
        Ok(())
    }

    /// Tears everything down after a failure the environment cannot recover from.
    fn fail(&mut self, error: anyhow::Error) -> anyhow::Error {
        warn!("batched environment failed, tearing down: {error:#}");
        self.abandon();
        error
    }

    /// Like [`clean`](Environment::clean), without waiting for busy thread workers.
    fn abandon(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.in_flight = false;

        for link in self.links.iter_mut() {
            link.close();
        }
        for link in self.links.iter_mut() {
            if let Err(e) = link.detach() {
                warn!("{e:#}");
            }
        }
    }
}

impl Environment for BatchedEnvironment {
    fn name(&self) -> &'static str {
        match self.execution {
            Execution::Threads => "batched",
            Execution::Processes => "batched-processes",
        }
    }

    fn num_envs(&self) -> usize {
        self.links.len()
    }

    fn reset(&mut self) -> anyhow::Result<Vec<BoardVector>> {
        self.check_usable()?;
        if self.in_flight {
            self.collect_step()?;
        }
        self.ensure_started()?;
        Ok(self.observed.clone().unwrap_or_default())
    }

    fn step(&mut self, actions: &[Action]) -> anyhow::Result<Batch> {
        self.send_actions(actions)?;
        self.collect_step()
    }

    /// Stops every worker without draining what they are computing.
    ///
    /// Process workers are killed. Thread workers are told to stop and joined; one still in the
    /// middle of a step finishes it first. Calling `clean` again does nothing.
    #[instrument(skip(self), fields(n = self.links.len()))]
    fn clean(&mut self) -> anyhow::Result<()> {
        if self.cleaned {
            return Ok(());
        }
        self.cleaned = true;
        self.in_flight = false;

        let started = Instant::now();
        let errors = shutdown_all(&mut self.links);
        info!(elapsed = ?started.elapsed(), "workers stopped");

        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for BatchedEnvironment {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Closes every action side first so all workers stop concurrently, then waits for each.
fn shutdown_all(links: &mut [WorkerLink]) -> Vec<anyhow::Error> {
    for link in links.iter_mut() {
        link.close();
    }
    links
        .iter_mut()
        .filter_map(|link| link.shutdown().err())
        .collect()
}

/// Where actions for one worker go.
#[derive(Debug)]
enum ActionSink {
    Channel(Sender<Action>),
    Pipe(BufWriter<ChildStdin>),
}

/// What runs one worker.
#[derive(Debug)]
enum Runner {
    Thread(JoinHandle<()>),
    Process {
        process: WorkerProcess,
        reader: JoinHandle<()>,
    },
}

/// The orchestrator's end of one worker.
#[derive(Debug)]
struct WorkerLink {
    index: usize,
    actions: Option<ActionSink>,
    messages: Receiver<Incoming>,
    runner: Option<Runner>,
}

impl WorkerLink {
    fn spawn_thread<O>(index: usize, opponent: O) -> anyhow::Result<Self>
    where
        O: OpponentPolicy + Send + 'static,
    {
        let (tx_action, rx_action) = unbounded();
        let (tx_message, rx_message) = unbounded();

        let handle = thread::Builder::new()
            .name(format!("chess-worker-{index}"))
            .spawn(move || {
                let mut transport = ChannelTransport::new(rx_action, tx_message);
                if let Err(e) = Worker::new(index, opponent).run(&mut transport) {
                    debug!(index, "worker thread stopped: {e:#}");
                }
            })
            .context("could not spawn worker thread")?;

        Ok(Self {
            index,
            actions: Some(ActionSink::Channel(tx_action)),
            messages: rx_message,
            runner: Some(Runner::Thread(handle)),
        })
    }

    fn spawn_process(index: usize, program: &Path, seed: Option<u64>) -> anyhow::Result<Self> {
        let mut args = vec!["worker".to_owned(), "--index".to_owned(), index.to_string()];
        if let Some(seed) = seed {
            args.push("--seed".to_owned());
            args.push(seed.to_string());
        }

        let mut process = WorkerProcess::launch(program, &args)?;
        let (stdin, stdout) = match (process.take_stdin(), process.take_stdout()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => bail!("worker process {} has no piped stdio", process.id()),
        };

        let (tx_message, rx_message) = unbounded();
        let reader = thread::Builder::new()
            .name(format!("chess-worker-{index}-reader"))
            .spawn(move || forward_messages(stdout, tx_message))
            .context("could not spawn reader thread")?;

        Ok(Self {
            index,
            actions: Some(ActionSink::Pipe(BufWriter::new(stdin))),
            messages: rx_message,
            runner: Some(Runner::Process { process, reader }),
        })
    }

    fn send(&mut self, action: &Action) -> anyhow::Result<()> {
        let index = self.index;
        let sent = match &mut self.actions {
            Some(ActionSink::Channel(sender)) => sender.send(action.clone()).is_ok(),
            Some(ActionSink::Pipe(pipe)) => writeln!(pipe, "{action}")
                .and_then(|_| pipe.flush())
                .is_ok(),
            None => false,
        };
        if !sent {
            return Err(EnvError::WorkerDisconnected { index }.into());
        }
        Ok(())
    }

    /// Closes the action side: a thread worker stops at its next receive, a process worker
    /// reads end of file.
    fn close(&mut self) {
        self.actions = None;
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.close();
        let index = self.index;
        match self.runner.take() {
            None => Ok(()),
            Some(Runner::Thread(handle)) => handle
                .join()
                .map_err(|_| anyhow!("worker thread {index} panicked")),
            Some(Runner::Process {
                mut process,
                reader,
            }) => {
                let killed = process
                    .try_kill(KILL_TIMEOUT)
                    .with_context(|| format!("worker process {index}"));
                finish_reader(index, killed, reader)
            }
        }
    }

    /// Stops the worker, joining a thread worker only if it already returned.
    ///
    /// A thread worker in the middle of a step is left running; its action channel is closed,
    /// so it exits once the step is done.
    fn detach(&mut self) -> anyhow::Result<()> {
        self.close();
        match self.runner.take() {
            Some(Runner::Thread(handle)) if !handle.is_finished() => {
                warn!(index = self.index, "detaching busy worker thread");
                Ok(())
            }
            runner => {
                self.runner = runner;
                self.shutdown()
            }
        }
    }
}

/// Joins the reader of a killed worker process. If the kill failed the child may still hold
/// its stdout open, so the reader is detached instead.
fn finish_reader(
    index: usize,
    killed: anyhow::Result<()>,
    reader: JoinHandle<()>,
) -> anyhow::Result<()> {
    match killed {
        Ok(()) => reader
            .join()
            .map_err(|_| anyhow!("reader thread of worker {index} panicked")),
        Err(e) => {
            warn!(index, "detaching reader thread of a worker that could not be killed");
            drop(reader);
            Err(e)
        }
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{e:#}");
        }
    }
}

/// Turns the lines written by a worker process into messages, until its stdout closes.
fn forward_messages(stdout: ChildStdout, messages: Sender<Incoming>) {
    for line in BufReader::new(stdout).lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let incoming = parse_message_line(&line);
        let broken = incoming.is_err();
        if messages.send(incoming).is_err() || broken {
            break;
        }
    }
}

#[cfg(test)]
mod batched_tests {
    use shakmaty::{Chess, Move, Position};

    use super::*;
    use crate::opponent::FirstLegalOpponent;
    use crate::session::GameSession;

    fn uci(s: &str) -> Action {
        s.parse().unwrap()
    }

    fn config() -> Configuration {
        Configuration::new().with_collect_timeout(Some(Duration::from_secs(10)))
    }

    #[test]
    fn reset_collects_initial_states() {
        let mut env = BatchedEnvironment::with_threads(4, &|_: usize| FirstLegalOpponent, &config())
            .unwrap();
        assert_eq!(env.num_envs(), 4);
        assert_eq!(env.reset().unwrap(), vec![GameSession::new().encode(); 4]);
        // a second reset does not wait for messages that will never come
        assert_eq!(env.reset().unwrap().len(), 4);
        env.clean().unwrap();
    }

    #[test]
    fn step_without_reset_collects_initial_states_first() {
        let mut env = BatchedEnvironment::with_threads(2, &|_: usize| FirstLegalOpponent, &config())
            .unwrap();
        let batch = env.step(&[uci("e2e4"), uci("e2e5")]).unwrap();
        assert_eq!(batch.dones, vec![false, true]);
    }

    #[test]
    fn unresponsive_worker_times_out() {
        let hang = |index: usize| {
            move |pos: &Chess| -> Option<Move> {
                if index == 1 {
                    thread::sleep(Duration::from_millis(1500));
                }
                pos.legal_moves().first().cloned()
            }
        };
        let config = config().with_collect_timeout(Some(Duration::from_millis(300)));
        let mut env = BatchedEnvironment::with_threads(3, &hang, &config).unwrap();
        env.reset().unwrap();

        let err = env.step(&vec![uci("e2e4"); 3]).unwrap_err();
        match err.downcast_ref::<EnvError>() {
            Some(EnvError::WorkerUnresponsive { indices, .. }) => assert_eq!(indices, &vec![1]),
            other => panic!("unexpected error {other:?}"),
        }

        // torn down after the failure
        let err = env.step(&vec![uci("e2e4"); 3]).unwrap_err();
        assert_eq!(err.downcast_ref::<EnvError>(), Some(&EnvError::Cleaned));
    }

    /// Slot 0 answers after `delay`, the others right away.
    struct SlowFirst {
        index: usize,
        delay: Duration,
    }

    impl OpponentPolicy for SlowFirst {
        fn select_reply(&mut self, position: &Chess) -> Option<Move> {
            if self.index == 0 {
                thread::sleep(self.delay);
            }
            position.legal_moves().first().cloned()
        }
    }

    fn slow_first(delay: Duration) -> impl Fn(usize) -> SlowFirst {
        move |index| SlowFirst { index, delay }
    }

    #[test]
    fn timeout_does_not_wait_for_the_late_worker() {
        let config = config().with_collect_timeout(Some(Duration::from_millis(100)));
        let mut env =
            BatchedEnvironment::with_threads(2, &slow_first(Duration::from_secs(4)), &config)
                .unwrap();
        env.reset().unwrap();

        let started = Instant::now();
        let err = env.step(&vec![uci("e2e4"); 2]).unwrap_err();
        let elapsed = started.elapsed();

        match err.downcast_ref::<EnvError>() {
            Some(EnvError::WorkerUnresponsive { indices, .. }) => assert_eq!(indices, &vec![0]),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(elapsed < Duration::from_secs(2), "step took {elapsed:?}");
    }

    #[test]
    fn drop_does_not_wait_for_a_step_in_flight() {
        let mut env =
            BatchedEnvironment::with_threads(2, &slow_first(Duration::from_secs(4)), &config())
                .unwrap();
        env.reset().unwrap();
        env.send_actions(&vec![uci("e2e4"); 2]).unwrap();

        let started = Instant::now();
        drop(env);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn reader_is_detached_when_the_kill_fails() {
        let (keep_open, blocked) = unbounded::<()>();
        let reader = thread::spawn(move || {
            let _ = blocked.recv();
        });

        let started = Instant::now();
        let err = finish_reader(3, Err(anyhow!("kill failed")), reader).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.to_string(), "kill failed");
        drop(keep_open);

        let reader = thread::spawn(|| ());
        finish_reader(3, Ok(()), reader).unwrap();
    }

    #[test]
    fn failed_worker_step_is_reported() {
        let stall = |_: usize| |_: &Chess| -> Option<Move> { None };
        let mut env = BatchedEnvironment::with_threads(2, &stall, &config()).unwrap();
        env.reset().unwrap();
        let err = env.step(&[uci("e2e4"), uci("e2e4")]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::WorkerFailed { .. })
        ));
    }

    #[test]
    fn send_twice_without_collecting() {
        let mut env = BatchedEnvironment::with_threads(1, &|_: usize| FirstLegalOpponent, &config())
            .unwrap();
        env.send_actions(&[uci("e2e4")]).unwrap();
        assert!(env.send_actions(&[uci("d2d4")]).is_err());
        assert!(!env.collect_step().unwrap().dones[0]);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = BatchedEnvironment::with_processes(
            3,
            Path::new("./no-such-worker-program"),
            &config(),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<EnvError>(),
            Some(&EnvError::WorkerSpawn { index: 0 })
        );
    }

    #[test]
    fn clean_is_idempotent_and_final() {
        let mut env = BatchedEnvironment::with_threads(3, &|_: usize| FirstLegalOpponent, &config())
            .unwrap();
        env.clean().unwrap();
        env.clean().unwrap();
        let err = env.reset().unwrap_err();
        assert_eq!(err.downcast_ref::<EnvError>(), Some(&EnvError::Cleaned));
    }
}
