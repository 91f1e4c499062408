use clap::Parser;
use handreceipt_service::config::Config;
use handreceipt_service::scheduler::Scheduler;
use handreceipt_service::{build_router, BootstrapError, ServiceState};
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "handreceiptd", version, about = "HandReceipt custody service")]
struct Cli {
    /// Socket address to bind the HTTP API to.
    #[arg(long, default_value = "0.0.0.0:8080", env = "HANDRECEIPT_LISTEN")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("HANDRECEIPT_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "handreceipt_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let state = match ServiceState::bootstrap(config).await {
        Ok(state) => state,
        Err(err @ BootstrapError::Database(_)) => {
            error!(err = %err, "failed to reach the database");
            return ExitCode::from(2);
        }
        Err(err @ BootstrapError::Migration(_)) => {
            error!(err = %err, "failed to apply migrations");
            return ExitCode::from(3);
        }
    };

    let scheduler = Scheduler::start(state.repository.clone(), state.pg_pool.clone(), state.ocr.clone());
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(cli.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(err = %err, addr = %cli.listen, "failed to bind listen address");
            return ExitCode::from(1);
        }
    };
    info!("handreceipt-service listening on {}", cli.listen);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    scheduler.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(err = %err, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}
