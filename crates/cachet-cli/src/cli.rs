use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cachet",
    about = "Cachet: memoized pure functions and a swarm of workers to compute them",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Store directory. Falls back to $CACHET_STORE.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Claim and compute queued calls until the ancestor exits
    Worker(WorkerArgs),
    /// Keep a pool of worker processes running
    Pool(PoolArgs),
    /// Queue a call for the workers
    Enqueue(EnqueueArgs),
    /// Compute a call in this process
    Compute(CallArgs),
    /// Summarize the store
    Status(StatusArgs),
    /// Release claims held by dead workers
    Sweep(SweepArgs),
    /// Show the execution history of a call
    Show(CallArgs),
    /// Show recorded crashes
    Crashes(CrashesArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

/// A function name followed by `name=value` arguments.
#[derive(Args)]
pub struct CallArgs {
    pub function: String,
    pub args: Vec<String>,
}

#[derive(Args)]
pub struct WorkerArgs {
    #[arg(long, requires = "ancestor_start")]
    pub ancestor_pid: Option<u32>,
    #[arg(long, requires = "ancestor_pid")]
    pub ancestor_start: Option<i64>,
    /// Exit once nothing is claimable instead of polling.
    #[arg(long)]
    pub drain: bool,
}

#[derive(Args)]
pub struct PoolArgs {
    /// Run exactly this many workers.
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,
    /// Stop after this many seconds.
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Args)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub call: CallArgs,
    /// Block until a worker has computed the call.
    #[arg(short, long)]
    pub wait: bool,
    /// Give up waiting after this many seconds.
    #[arg(long, requires = "wait")]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct StatusArgs {}

#[derive(Args)]
pub struct SweepArgs {}

#[derive(Args)]
pub struct CrashesArgs {
    /// Only this day (YYYY-MM-DD).
    #[arg(long)]
    pub day: Option<chrono::NaiveDate>,
}

#[derive(Args)]
pub struct ConfigArgs {}
