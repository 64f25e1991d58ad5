//! Config for the environments' behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive; set them to `"true"` to enable.
//!
//! - `CHESSENV_LOG`: Write a trace log file in the current directory (default: `false`)
//! - `CHESSENV_COLLECT_TIMEOUT_MS`: How long the batched environment waits for its workers, `0`
//!   meaning forever (default: `30000`)
//! - `CHESSENV_SEED`: Base seed of the opponents, slot `i` uses `seed + i` (default: entropy)
//! - `CHESSENV_THREADS`: Threads of the parallel environment (default: number of CPUs)
//! - `CHESSENV_EXECUTION`: `threads` or `processes`, how batched workers run (default: `threads`)
//! - `CHESSENV_WORKER_PROGRAM`: Executable launched as a worker in `processes` mode (default:
//!   the current executable)

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::bail;

/// How the workers of a [`BatchedEnvironment`](crate::batched::BatchedEnvironment) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// One dedicated OS thread per worker.
    #[default]
    Threads,
    /// One OS child process per worker, talking over its stdin/stdout.
    Processes,
}

impl FromStr for Execution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "threads" | "thread" => Ok(Execution::Threads),
            "processes" | "process" => Ok(Execution::Processes),
            other => bail!("unknown execution mode '{other}' (expected 'threads' or 'processes')"),
        }
    }
}

/// Configuration for environment behaviors.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub(crate) log: bool,
    pub(crate) collect_timeout: Option<Duration>,
    pub(crate) seed: Option<u64>,
    pub(crate) threads: usize,
    pub(crate) execution: Execution,
    pub(crate) worker_program: Option<PathBuf>,
}

impl Configuration {
    /// Default wait for a batch before workers are reported unresponsive.
    pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Logging to file is disabled.
    /// - Batch collection gives up after [`DEFAULT_COLLECT_TIMEOUT`](Self::DEFAULT_COLLECT_TIMEOUT).
    /// - Opponents are seeded from OS entropy.
    /// - The parallel environment uses one thread per CPU.
    /// - Batched workers are threads.
    pub fn new() -> Self {
        Self {
            log: false,
            collect_timeout: Some(Self::DEFAULT_COLLECT_TIMEOUT),
            seed: None,
            threads: num_cpus::get(),
            execution: Execution::Threads,
            worker_program: None,
        }
    }

    /// Create configuration from environment variables (see module documentation).
    ///
    /// Unset variables keep their default value.
    ///
    /// # Errors
    /// Returns an error if a variable is set to a value that cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn parse_env<T>(var: &str) -> anyhow::Result<Option<T>>
        where
            T: FromStr,
            T::Err: std::fmt::Display,
        {
            match std::env::var(var) {
                Ok(val) => match val.trim().parse() {
                    Ok(parsed) => Ok(Some(parsed)),
                    Err(e) => bail!("invalid value '{val}' for {var}: {e}"),
                },
                Err(_) => Ok(None),
            }
        }

        let mut config = Self::new().with_log(get_env_flag("CHESSENV_LOG", false));
        if let Some(ms) = parse_env::<u64>("CHESSENV_COLLECT_TIMEOUT_MS")? {
            config = config.with_collect_timeout((ms > 0).then(|| Duration::from_millis(ms)));
        }
        if let Some(seed) = parse_env::<u64>("CHESSENV_SEED")? {
            config = config.with_seed(Some(seed));
        }
        if let Some(threads) = parse_env::<usize>("CHESSENV_THREADS")? {
            config = config.with_threads(threads);
        }
        if let Some(execution) = parse_env::<Execution>("CHESSENV_EXECUTION")? {
            config = config.with_execution(execution);
        }
        if let Some(program) = parse_env::<PathBuf>("CHESSENV_WORKER_PROGRAM")? {
            config = config.with_worker_program(program);
        }
        Ok(config)
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Bound the wait for a batch. `None` waits forever.
    pub fn with_collect_timeout(mut self, value: Option<Duration>) -> Self {
        self.collect_timeout = value;
        self
    }

    /// Seed the opponents. `None` uses OS entropy.
    pub fn with_seed(mut self, value: Option<u64>) -> Self {
        self.seed = value;
        self
    }

    /// Number of threads of the parallel environment. `0` is treated as `1`.
    pub fn with_threads(mut self, value: usize) -> Self {
        self.threads = value.max(1);
        self
    }

    /// How batched workers run.
    pub fn with_execution(mut self, value: Execution) -> Self {
        self.execution = value;
        self
    }

    /// Executable launched for each worker in [`Execution::Processes`] mode.
    ///
    /// It must implement the `worker` subcommand of the `chess-vecenv` binary.
    pub fn with_worker_program(mut self, value: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(value.into());
        self
    }

    /// Whether logs go to a file.
    pub fn log(&self) -> bool {
        self.log
    }

    /// Bound on the wait for a batch of worker messages, `None` for no bound.
    pub fn collect_timeout(&self) -> Option<Duration> {
        self.collect_timeout
    }

    /// Base seed of the opponents.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Thread count of the parallel strategy.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// How batched workers run.
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// The worker executable, defaulting to the current one.
    pub fn worker_program(&self) -> anyhow::Result<PathBuf> {
        match &self.worker_program {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod configuration_tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert!(!config.log());
        assert_eq!(
            config.collect_timeout(),
            Some(Configuration::DEFAULT_COLLECT_TIMEOUT)
        );
        assert_eq!(config.seed(), None);
        assert!(config.threads() >= 1);
        assert_eq!(config.execution(), Execution::Threads);
    }

    #[test]
    fn builder_overrides() {
        let config = Configuration::new()
            .with_seed(Some(9))
            .with_threads(0)
            .with_collect_timeout(None)
            .with_execution(Execution::Processes)
            .with_worker_program("/bin/worker");
        assert_eq!(config.seed(), Some(9));
        assert_eq!(config.threads(), 1);
        assert_eq!(config.collect_timeout(), None);
        assert_eq!(config.execution(), Execution::Processes);
        assert_eq!(
            config.worker_program().unwrap(),
            PathBuf::from("/bin/worker")
        );
    }

    #[test]
    fn execution_from_str() {
        assert_eq!("Threads".parse::<Execution>().unwrap(), Execution::Threads);
        assert_eq!(
            "processes".parse::<Execution>().unwrap(),
            Execution::Processes
        );
        assert!("fibers".parse::<Execution>().is_err());
    }
}
