//! SLM API Entrypoint
//!
//! Usage: slm-api [--host 0.0.0.0] [--port 9008] [--db-path PATH]
//!
//! Runs on a node with store access and receives job updates from
//! compute nodes over HTTP.

use clap::Parser;
use slm_api::{serve, ApiState};
use slm_store::JobStore;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slm-api")]
#[command(about = "SLM HTTP API service", version)]
struct Args {
    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind to
    #[arg(long, default_value_t = 9008)]
    port: u16,

    /// Path to the job database (default: $SLM_DB_PATH or ~/.slm/slm.db)
    #[arg(long, env = "SLM_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SLM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let db_path = args.db_path.unwrap_or_else(slm_store::default_db_path);

    let store = match JobStore::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(path = %db_path.display(), "failed to open job database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, database = %db_path.display(), "starting SLM HTTP API service");

    if let Err(e) = serve(listener, ApiState::new(store)).await {
        tracing::error!("server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
