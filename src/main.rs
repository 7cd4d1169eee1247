use anyhow::{Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use synthgate::cli::{Args, Command};
use synthgate::config::AppConfig;
use synthgate::gateway::{SynthesisGateway, SynthesisRequest};
use synthgate::monitor::validate_system_resources;
use synthgate::server::create_router;
use synthgate::utils::logging;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = AppConfig::load(args.config.as_deref())?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting synthgate v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Build the gateway
    let gateway = Arc::new(SynthesisGateway::new(&config)?);

    match args.command {
        Command::Serve => serve(config, gateway).await,
        Command::Synthesize {
            model,
            voice,
            text,
            output,
            attempts,
        } => synthesize(gateway, model, voice, text, output, attempts).await,
    }
}

async fn serve(config: AppConfig, gateway: Arc<SynthesisGateway>) -> Result<()> {
    // Phase 4: Check the host can carry the configured load
    let report = validate_system_resources(Path::new(&config.monitor.disk_path));
    for warning in &report.warnings {
        warn!("Resource check: {}", warning);
    }
    if !report.passed {
        for problem in &report.errors {
            error!("Resource check failed: {}", problem);
        }
        warn!("Continuing despite failed resource validation");
    }

    // Phase 5: Background maintenance
    gateway.start_background();

    // Phase 6: Build and start HTTP server
    let app = create_router(Arc::clone(&gateway));
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!("Starting monitoring server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 7: Run server with graceful shutdown, then drain workers
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = gateway
        .shutdown(Duration::from_secs(config.shutdown.timeout_secs))
        .await;
    info!(
        terminated = report.terminated,
        killed = report.killed,
        "Server shut down gracefully"
    );
    Ok(())
}

async fn synthesize(
    gateway: Arc<SynthesisGateway>,
    model: Option<String>,
    voice: Option<String>,
    text: Option<String>,
    output: Option<PathBuf>,
    attempts: u32,
) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read text from stdin")?;
            buffer
        }
    };

    let mut request = SynthesisRequest::new(text);
    request.model = model;
    request.voice = voice;
    let result = gateway.synthesize_with_retry(request, attempts).await;

    gateway.shutdown(Duration::from_secs(5)).await;
    let synthesis = result?;

    if let Some(reason) = &synthesis.degraded {
        warn!("Degraded result: {}", reason);
    }
    info!(
        correlation_id = %synthesis.correlation_id,
        model = %synthesis.model,
        cache_hit = synthesis.cache_hit,
        bytes = synthesis.audio.len(),
        "Synthesis finished"
    );

    match output {
        Some(path) => tokio::fs::write(&path, &synthesis.audio)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&synthesis.audio)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
