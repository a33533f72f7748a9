use clap::Parser;
use ensemble::config::DirectorMode;
use std::path::PathBuf;

/// Ensemble CLI - Run a demo dataflow graph on the Ensemble runtime
///
/// The demo merges the output of several sequence sources, prints every merged
/// message and counts them with a counter that is reset once at startup.
#[derive(Debug, Parser)]
#[command(name = "ensemble")]
#[command(author, version, about)]
pub struct RunArgs {
    /// Runtime configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Director to run the graph with: 'process' or 'sequential'
    #[arg(short, long)]
    pub mode: Option<DirectorMode>,

    /// Number of sequence sources feeding the merge
    #[arg(long, default_value_t = 2)]
    pub sources: usize,

    /// Values emitted by each source
    #[arg(long, default_value_t = 3)]
    pub values: usize,

    /// Start value of the counter
    #[arg(long, default_value_t = 0)]
    pub start: i64,

    /// Firings per actor before it is considered complete
    #[arg(long)]
    pub max_iterations: Option<u64>,

    /// Logging level (e.g. 'info', 'debug'); overrides the configuration file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log to stdout
    #[arg(long)]
    pub log_stdout: bool,

    /// Log directory; logs go to <dir>/ensemble.log
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}
