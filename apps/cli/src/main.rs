//! Snapgate command line entry point.

mod args;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use snapgate_client::{BuildEnvironment, Config, Transport, user_agent};
use snapgate_snapshot::{
    DEFAULT_WORKERS, MAX_WORKERS, ProgressEvent, SnapshotConfig, SnapshotRunner,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    let cli = args::Cli::parse();
    let config = Config::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if config.debug { "debug" } else { "info" })
        }))
        .init();

    match cli.command {
        args::Commands::Snapshot {
            root_dir,
            baseurl,
            strip_prefix,
            snapshots_regex,
            ignore_regex,
            widths,
            snapshot_limit,
            enable_javascript,
            include_all,
            threads,
        } => {
            let token = config
                .token
                .clone()
                .context("SNAPGATE_TOKEN must be set to create builds")?;
            let environment = BuildEnvironment::resolve();
            let transport = Transport::new(
                &token,
                &config.api_url,
                &user_agent(environment.ci_info.as_deref()),
            )?;

            let snapshot_config = SnapshotConfig {
                baseurl,
                strip_prefix,
                snapshots_regex,
                ignore_regex,
                widths: if widths.is_empty() {
                    Some(config.default_widths.clone())
                } else {
                    Some(widths)
                },
                snapshot_limit,
                enable_javascript,
                include_all,
                workers: threads.unwrap_or(DEFAULT_WORKERS).clamp(1, MAX_WORKERS),
            };

            info!(
                version = env!("CARGO_PKG_VERSION"),
                api = %config.api_url,
                "starting snapshot run"
            );

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_snapshot(
                Arc::new(transport),
                root_dir,
                environment,
                snapshot_config,
            ))
        }
    }
}

async fn run_snapshot(
    transport: Arc<Transport>,
    root_dir: PathBuf,
    environment: BuildEnvironment,
    config: SnapshotConfig,
) -> anyhow::Result<ExitCode> {
    let mut runner = SnapshotRunner::new(transport, config);
    let printer = runner.take_events().map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProgressEvent::BuildCreated { build_id, web_url } => {
                        info!(build_id, web_url = web_url.as_deref().unwrap_or("-"), "build created");
                    }
                    ProgressEvent::ResourceUploaded { url, completed, total } => {
                        info!("uploaded resource {completed}/{total}: {url}");
                    }
                    ProgressEvent::SnapshotStarted { url, index, total } => {
                        info!("snapshot {index}/{total}: {url}");
                    }
                    ProgressEvent::SnapshotFailed { url, error } => {
                        warn!(%url, %error, "snapshot failed");
                    }
                    ProgressEvent::BuildFinalized { .. } => {}
                }
            }
        })
    });

    let report = runner.run(&root_dir, &environment).await;
    // Dropping the runner closes the event channel so the printer drains.
    drop(runner);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let report = report?;

    if report.failed {
        warn!(
            build_id = %report.build_id,
            "finished with failed snapshots, the build was not finalized"
        );
        return Ok(ExitCode::FAILURE);
    }

    info!(snapshots = report.total_snapshots, "all snapshots uploaded");
    if let Some(web_url) = &report.web_url {
        println!("{web_url}");
    }
    Ok(ExitCode::SUCCESS)
}
