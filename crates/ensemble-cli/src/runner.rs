use anyhow::{Context, Result};
use ensemble::actors::{Console, Counter, Merge, Sequence, Trigger};
use ensemble::config::{LogOutput, RuntimeConfig};
use ensemble::director::{self, Director, RunReport, Termination};
use ensemble::graph::Graph;
use ensemble::logging;
use std::path::PathBuf;
use tracing::{error, info};

use crate::args::RunArgs;

/// Runs the demo graph. Returns whether the run succeeded.
pub async fn run(args: &RunArgs) -> Result<bool> {
    let config = load_config(args)?;
    logging::setup_global_logging(&config.logging)?;

    let mut graph = demo_graph(args)?;
    let mut director = director::from_config(&config);
    info!(
        "Running graph {} with the {:?} director",
        graph.name(),
        config.director.mode
    );

    let handle = director.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping the run");
            handle.stop();
        }
    });

    match director.run(&mut graph).await {
        Ok(report) => {
            print_report(&report, args.json)?;
            Ok(true)
        }
        Err(e) => {
            error!("Run failed: {}", e);
            if let Some(report) = e.report() {
                print_report(report, args.json)?;
            }
            eprintln!("Error: {:#}", anyhow::Error::from(e));
            Ok(false)
        }
    }
}

fn load_config(args: &RunArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.director.mode = mode;
    }
    if args.max_iterations.is_some() {
        config.director.max_iterations = args.max_iterations;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        let dir = shellexpand::env(dir)
            .map_err(|e| anyhow::anyhow!("Failed to expand log directory: {}", e))?;
        config.logging.output = LogOutput::File;
        config.logging.file_path = PathBuf::from(dir.as_ref()).join("ensemble.log");
    }
    if args.log_stdout {
        config.logging.output = LogOutput::Stdout;
    }

    config.validate()?;
    Ok(config)
}

/// `source0..N -> merge -> console`, with every merged message also
/// triggering `counter -> tally`; `reset` resets the counter once.
fn demo_graph(args: &RunArgs) -> Result<Graph> {
    let mut graph = Graph::new("demo");

    graph.add(Merge::new("merge", args.sources)?)?;
    for i in 0..args.sources {
        let name = format!("source{}", i);
        let values: Vec<String> = (0..args.values).map(|n| format!("{}:{}", name, n)).collect();
        graph.add(Sequence::new(name.as_str(), values)?)?;
        graph.link(&format!("{}.output", name), &format!("merge.input{}", i))?;
    }

    graph.add(Trigger::new("reset")?)?;
    graph.add(Counter::new("counter", args.start)?)?;
    graph.add(Console::new("console")?)?;
    graph.add(Console::new("tally")?)?;
    graph.set_parameter("console", Console::PREFIX, "merged: ")?;
    graph.set_parameter("tally", Console::PREFIX, "count: ")?;

    graph.link("merge.output", "console.input")?;
    graph.link("merge.output", "counter.trigger")?;
    graph.link("reset.output", "counter.reset")?;
    graph.link("counter.output", "tally.input")?;

    Ok(graph)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let cause = match &report.termination {
        Termination::Exhausted => "all sources exhausted".to_string(),
        Termination::Deadlock => "deadlock resolved".to_string(),
        Termination::Stopped => "stopped".to_string(),
        Termination::Failed { actor } => format!("failed in {}", actor),
    };
    println!(
        "Run {} of {}: {} ({}) in {} ms",
        report.run_id.short(),
        report.graph,
        report.state,
        cause,
        report.elapsed_ms
    );
    let width = report.actors.iter().map(|a| a.name.len()).max().unwrap_or(0);
    for actor in &report.actors {
        println!(
            "  {:<width$}  {:>4} firings  {:>2} errors  {}",
            actor.name,
            actor.iterations,
            actor.processing_errors,
            actor.outcome,
            width = width
        );
    }
    if report.is_partially_complete() {
        println!("Some actors finished before the failure; their output is complete.");
    }
    Ok(())
}
