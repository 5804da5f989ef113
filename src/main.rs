use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use website_replicator::{ReplicaConfig, ReplicateCommand, WebsiteReplicator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ReplicateCommand::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = ReplicaConfig::from_command(&args).context("Invalid arguments")?;
    let replicator = WebsiteReplicator::new(config)?;

    let report = match replicator.replicate().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("\n{}", "❌ Replication failed!".red().bold());
            return Err(e).with_context(|| format!("Could not replicate {}", replicator.config().url));
        }
    };

    report.print_summary();
    println!(
        "\n{} {}",
        "✨ Success! Your replica is ready in:".green().bold(),
        report.output_dir.display()
    );
    println!("🌐 To view: open {}", report.index_path().display());
    Ok(())
}
