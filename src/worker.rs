//! The worker side of the batched environment.
//!
//! A [`Worker`] owns exactly one [`GameSession`] and talks to the orchestrator through a
//! [`Transport`]. The protocol is a strict alternation:
//!
//! 1. on start, the worker sends [`WorkerMessage::Initial`] with the fresh board;
//! 2. then, for every action received, it steps its session and sends exactly one
//!    [`WorkerMessage::Step`] (or [`WorkerMessage::Failed`] if the step itself failed).
//!
//! The worker never sends anything unsolicited. It stops when the action side of its transport is
//! closed, or earlier when it is killed.
//!
//! Two transports are provided: [`ChannelTransport`] for workers running on a thread of the
//! orchestrator process and [`StdioTransport`] for workers running as child processes, where an
//! action is one UCI line on stdin and a message is one JSON line on stdout.

use std::io::{BufRead, Write};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::batch::StepResult;
use crate::codec::BoardVector;
use crate::opponent::{OpponentPolicy, RandomOpponent};
use crate::session::{Action, GameSession};

/// Everything a worker can send to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// The board of the fresh session, sent once on start.
    Initial(BoardVector),
    /// The answer to one action.
    Step(StepResult),
    /// The action could not be processed. The session is back at the initial position.
    Failed(String),
}

/// What the orchestrator receives from one worker: a message, or a description of why the
/// incoming bytes were not a message.
pub type Incoming = Result<WorkerMessage, String>;

/// Both directions of the link between a worker and the orchestrator.
pub trait Transport {
    /// Blocks until the next action arrives. `None` means the orchestrator is gone.
    fn recv_action(&mut self) -> anyhow::Result<Option<Action>>;

    /// Sends one message to the orchestrator.
    fn send(&mut self, message: WorkerMessage) -> anyhow::Result<()>;
}

/// One session, one opponent, one loop.
#[derive(Debug)]
pub struct Worker<O> {
    index: usize,
    session: GameSession,
    opponent: O,
}

impl<O: OpponentPolicy> Worker<O> {
    /// Worker of slot `index`, starting from the initial position.
    pub fn new(index: usize, opponent: O) -> Self {
        Self {
            index,
            session: GameSession::new(),
            opponent,
        }
    }

    /// Runs the protocol until the orchestrator closes the action side.
    ///
    /// # Errors
    /// Returns an error if the transport fails (broken pipe, unparsable action).
    #[instrument(skip_all, fields(index = self.index))]
    pub fn run<T: Transport>(mut self, transport: &mut T) -> anyhow::Result<()> {
        debug!("worker started");
        transport.send(WorkerMessage::Initial(self.session.encode()))?;

        while let Some(action) = transport.recv_action()? {
            trace!(%action);
            let message = match self.session.step(&action, &mut self.opponent) {
                Ok(outcome) => WorkerMessage::Step(StepResult {
                    state: self.session.encode(),
                    reward: outcome.reward,
                    done: outcome.done,
                }),
                Err(e) => {
                    warn!("step failed: {e:#}");
                    WorkerMessage::Failed(format!("{e:#}"))
                }
            };
            transport.send(message)?;
        }

        debug!(
            episodes = self.session.finished_episodes(),
            plies = self.session.plies(),
            "worker stopped"
        );
        Ok(())
    }
}

/// Transport of a worker running on a thread of the orchestrator process.
#[derive(Debug)]
pub struct ChannelTransport {
    actions: Receiver<Action>,
    messages: Sender<Incoming>,
}

impl ChannelTransport {
    /// Receives actions on `actions` and answers on `messages`.
    pub fn new(actions: Receiver<Action>, messages: Sender<Incoming>) -> Self {
        Self { actions, messages }
    }
}

impl Transport for ChannelTransport {
    fn recv_action(&mut self) -> anyhow::Result<Option<Action>> {
        Ok(self.actions.recv().ok())
    }

    fn send(&mut self, message: WorkerMessage) -> anyhow::Result<()> {
        self.messages
            .send(Ok(message))
            .context("orchestrator stopped listening")
    }
}

/// Line-based transport: UCI actions in, JSON messages out.
#[derive(Debug)]
pub struct StdioTransport<R, W> {
    input: R,
    output: W,
    line: String,
}

impl<R: BufRead, W: Write> StdioTransport<R, W> {
    /// Reads actions from `input` and writes messages to `output`.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            line: String::new(),
        }
    }
}

impl<R: BufRead, W: Write> Transport for StdioTransport<R, W> {
    fn recv_action(&mut self) -> anyhow::Result<Option<Action>> {
        loop {
            self.line.clear();
            if self.input.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            let action = text
                .parse::<Action>()
                .with_context(|| format!("'{text}' is not a UCI move"))?;
            return Ok(Some(action));
        }
    }

    fn send(&mut self, message: WorkerMessage) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.output, &message)?;
        self.output.write_all(b"\n")?;
        self.output.flush()?;
        Ok(())
    }
}

/// Parses one line written by a [`StdioTransport`].
pub fn parse_message_line(line: &str) -> Incoming {
    serde_json::from_str(line.trim()).map_err(|e| format!("unreadable message '{line}': {e}"))
}

/// Runs worker `index` on this process's stdin and stdout, against a random opponent.
///
/// Nothing else may write to stdout while this runs.
pub fn serve_stdio(index: usize, seed: Option<u64>) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut transport = StdioTransport::new(stdin.lock(), stdout.lock());
    Worker::new(index, RandomOpponent::new(seed)).run(&mut transport)
}
