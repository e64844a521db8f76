//! Flare server - run-phase HTTP server.
//!
//! Starts generic, specializes once on request, then serves invocations of
//! the loaded function until shutdown.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use flare_core::CompileOptions;
use routes::{create_router, AppState};

#[derive(Parser)]
#[command(name = "flare-server")]
#[command(about = "Serve a Flare function package")]
#[command(version)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8888")]
    port: u16,

    /// Default function package directory
    #[arg(long, default_value = "/userfunc")]
    package: PathBuf,

    /// Optimization level passed to the function compile
    #[arg(long, default_value = "2")]
    opt_level: u8,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let options = CompileOptions {
        out_dir: cli.package.join(".build"),
        opt_level: cli.opt_level,
        ..Default::default()
    };
    let state = Arc::new(
        AppState::new(&cli.package, options).context("cannot initialize runtime loader")?,
    );
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid address {}:{}", cli.host, cli.port))?;
    tracing::info!(
        "flare-server listening on {} (package {})",
        addr,
        cli.package.display()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
        })
        .await?;

    Ok(())
}
