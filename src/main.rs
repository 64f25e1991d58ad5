//! chess-vecenv - step-time benchmarks of batched chess environments
//!
//! `chess-vecenv bench` prints one CSV row per environment count:
//! `name,n_envs,t_1,...,t_steps` (seconds). Logs go to stderr, or to a file when
//! `CHESSENV_LOG=true`.
//!
//! `chess-vecenv worker` is the entry point of worker processes and is not meant to be run by
//! hand.

use std::io::Write;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chess_vecenv::{
    batched::BatchedEnvironment,
    bench::{benchmark, default_env_counts},
    configuration::{Configuration, Execution},
    environment::Environment,
    logger::init_logger,
    parallel::ParallelEnvironment,
    sequential::SequentialEnvironment,
    worker::serve_stdio,
};

#[derive(Debug, Parser)]
#[command(name = "chess-vecenv", version, about)]
struct Cli {
    /// Maximum level of the logs written to stderr
    #[arg(long, global = true, default_value_t = Level::WARN)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Time every `step` call of an execution strategy
    Bench(BenchArgs),

    /// Serve one game on stdin/stdout
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Sequential,
    Parallel,
    Batched,
}

#[derive(Debug, Args)]
struct BenchArgs {
    #[arg(long, value_enum, default_value_t = Strategy::Sequential)]
    strategy: Strategy,

    /// Comma-separated environment counts (default: 1,2,4,...,512)
    #[arg(long, value_delimiter = ',')]
    envs: Vec<usize>,

    /// Timed `step` calls per environment count
    #[arg(long, default_value_t = 100)]
    steps: usize,

    /// Seed of the opponents and of the benchmark's own moves
    #[arg(long)]
    seed: Option<u64>,

    /// Threads of the parallel strategy
    #[arg(long)]
    threads: Option<usize>,

    /// `threads` or `processes`, how batched workers run
    #[arg(long)]
    execution: Option<Execution>,

    /// Collection timeout of the batched strategy in milliseconds, 0 for none
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Configuration::from_env()?;

    match cli.command {
        Command::Bench(args) => {
            init_tracing(&config, cli.log_level)?;
            run_bench(args, config)
        }
        Command::Worker { index, seed } => {
            // stdout is the protocol channel and every worker would share the log file
            init_tracing(&config.with_log(false), cli.log_level)?;
            serve_stdio(index, seed)
        }
    }
}

fn init_tracing(config: &Configuration, level: Level) -> anyhow::Result<()> {
    if config.log() {
        return init_logger();
    }
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("could not set global default tracing subscriber")
}

fn run_bench(args: BenchArgs, mut config: Configuration) -> anyhow::Result<()> {
    if let Some(seed) = args.seed {
        config = config.with_seed(Some(seed));
    }
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if let Some(execution) = args.execution {
        config = config.with_execution(execution);
    }
    if let Some(ms) = args.timeout_ms {
        config =
            config.with_collect_timeout((ms > 0).then(|| std::time::Duration::from_millis(ms)));
    }
    info!(?args, ?config, "starting benchmark");

    let counts = if args.envs.is_empty() {
        default_env_counts()
    } else {
        args.envs
    };

    let mut stdout = std::io::stdout().lock();
    for n in counts {
        let mut env: Box<dyn Environment> = match args.strategy {
            Strategy::Sequential => Box::new(SequentialEnvironment::new(n, &config)),
            Strategy::Parallel => Box::new(ParallelEnvironment::new(n, &config)),
            Strategy::Batched => Box::new(
                BatchedEnvironment::new(n, &config)
                    .with_context(|| format!("starting {n} workers"))?,
            ),
        };
        let report = benchmark(env.as_mut(), args.steps, config.seed())
            .with_context(|| format!("benchmarking {} with {n} environments", env.name()))?;
        writeln!(stdout, "{}", report.csv_row())?;
        stdout.flush()?;
    }
    Ok(())
}
