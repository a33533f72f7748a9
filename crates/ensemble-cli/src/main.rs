use anyhow::Result;
use clap::Parser;

mod args;
mod runner;

use args::RunArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let args = RunArgs::parse();
    if !runner::run(&args).await? {
        std::process::exit(1);
    }
    Ok(())
}
