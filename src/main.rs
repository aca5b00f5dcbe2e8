mod app;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;

use app::Cli;
use filtration::config::Settings;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("CLI: Failed to initialize thread pool")?;
    }

    let settings = Settings::load(cli.config.as_deref())?;
    let named = settings.compile_filters()?;
    tracing::info!("Settings: {} named filters", named.len());

    app::run(&cli, &settings)
}
