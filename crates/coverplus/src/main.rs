use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use coverplus::config::Config;
use coverplus::engine::backend_from_config;
use coverplus::format_diagnostics;
use coverplus::Engine;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Virtual tilt-and-position covers on top of open/close/stop motors
#[derive(Parser, Debug)]
#[command(name = "coverplus")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "coverplus.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let (config, diagnostics) = match Config::from_file(path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            anyhow::bail!("configuration in {} is not usable", path.display());
        }
    };

    if !diagnostics.is_empty() {
        eprintln!("{}", format_diagnostics(&diagnostics));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    if args.check {
        println!(
            "{}: {} cover(s) configured",
            args.config.display(),
            config.covers.len()
        );
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("coverplus {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loaded config from: {}", args.config.display());

    let backend = backend_from_config(&config)?;
    let engine = Arc::new(
        Engine::new(backend, config.scheduler.state_file.clone())
            .with_startup_settings(config.startup_settings()),
    );
    engine.start().await?;
    engine.load(&config.covers, &config.scheduler).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api = tokio::spawn(coverplus::api::serve(
        config.api.listen.clone(),
        config.api.port,
        engine.clone(),
        Some(args.config.clone()),
        shutdown_rx,
    ));

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    tracing::info!("Press Ctrl+C to exit, send SIGHUP to reload");
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP, reloading {}", args.config.display());
                match engine.reload_from_file(&args.config).await {
                    Ok(diagnostics) if diagnostics.is_empty() => {}
                    Ok(diagnostics) => {
                        tracing::warn!("{}", format_diagnostics(&diagnostics));
                    }
                    Err(e) => {
                        tracing::error!("Reload failed, keeping current covers: {}", e);
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => tracing::info!("Received shutdown signal"),
                    Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
        }
    }

    engine.shutdown().await;

    let _ = shutdown_tx.send(());
    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("HTTP API server failed: {}", e),
        Err(e) => tracing::error!("HTTP API task panicked: {}", e),
    }

    tracing::info!("coverplus shutdown complete");
    Ok(())
}
