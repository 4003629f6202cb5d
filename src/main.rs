// Command-line runner for the `pixlflow` library.
//
// Without `--key` or `--event` every regular file in the source directory is
// processed; with them, only the keys the notification names.

use anyhow::Context;
use clap::Parser;
use pixlflow::{EventLocator, MemorySink, PipelineConfig, RunReport, Trigger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "pixlflow=info";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory the source images are read from
    #[arg(long, env = "SOURCE_DIR")]
    source_dir: PathBuf,

    /// Directory the derivatives are written to
    #[arg(long, env = "DEST_DIR")]
    dest_dir: PathBuf,

    /// Namespace prepended to every output key (e.g. "processed")
    #[arg(long, env = "DEST_PREFIX")]
    prefix: Option<String>,

    /// Process only this source key; may be repeated
    #[arg(long = "key", conflicts_with = "event")]
    keys: Vec<String>,

    /// Process the keys listed in an S3-style notification document
    #[arg(long)]
    event: Option<PathBuf>,

    /// Render everything but keep the derivatives in memory
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::new(&args.source_dir, &args.dest_dir);
    if let Some(prefix) = &args.prefix {
        config = config.with_key_prefix(prefix);
    }
    config.validate().context("Invalid configuration")?;

    let trigger = if let Some(path) = &args.event {
        let document = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event document {}", path.display()))?;
        Trigger::Event(EventLocator::from_event_json(&document)?)
    } else if !args.keys.is_empty() {
        Trigger::Event(EventLocator::from_keys(args.keys.clone()))
    } else {
        Trigger::DirectoryScan
    };

    let report = if args.dry_run {
        let sink = Arc::new(MemorySink::new());
        let report = config.runner_with_sink(trigger, sink.clone()).run().await?;
        tracing::info!(
            artifacts = sink.len(),
            bytes = sink.total_bytes(),
            "Dry run, nothing written"
        );
        report
    } else {
        config.runner(trigger)?.run().await?
    };

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    for outcome in &report.outcomes {
        match &outcome.source_error {
            Some(error) => println!("SKIP  {}: {}", outcome.source_key, error),
            None => {
                println!(
                    "{}  {} ({}/{} derivatives, {} ms)",
                    if outcome.is_complete() { "OK  " } else { "PART" },
                    outcome.source_key,
                    outcome.succeeded(),
                    outcome.results.len(),
                    outcome.elapsed.as_millis()
                );
                for result in &outcome.results {
                    if let Some(error) = result.failure() {
                        println!("      {} failed: {}", result.output_key, error);
                    }
                }
            }
        }
    }
    println!(
        "{} processed, {} skipped, {} derivatives written, {} failed in {} ms",
        report.processed(),
        report.skipped(),
        report.derivatives_succeeded(),
        report.derivatives_failed(),
        report.elapsed.as_millis()
    );
}
