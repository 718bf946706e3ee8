use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::command::CallApiCommand;
use crate::config::Config;
use crate::health;
use crate::platform::discord::{self, Handler};
use crate::quote::QuoteClient;
use crate::registrar::Scope;

/// How long each side gets to stop before its task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Why the supervisor started shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Signal,
    GatewayStopped,
    HttpStopped,
}

/// Run the gateway client and the health server until either stops or
/// the process receives SIGINT/SIGTERM.
pub async fn run(config: Arc<Config>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Health endpoint listening on http://{}", addr);

    let source = Arc::new(QuoteClient::new(&config.api)?);
    let command = Arc::new(CallApiCommand::new(
        config.access.allowed_role_ids.clone(),
        source,
    ));
    let handler = Handler::new(command, Scope::from_guild_id(config.discord.guild_id));
    let mut client = discord::build_client(&config.discord.bot_token, handler).await?;
    let shard_manager = client.shard_manager.clone();

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let http_task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, health::router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await
            .context("Health server error")
    });

    info!("Discord bot starting...");
    let gateway_task: JoinHandle<Result<()>> = tokio::spawn(async move {
        client.start().await.context("Discord client error")
    });

    supervise(
        gateway_task,
        http_task,
        shutdown_signal(),
        shutdown_tx,
        async move { shard_manager.shutdown_all().await },
        SHUTDOWN_GRACE,
    )
    .await
}

/// Wait for the first of `signal`, the gateway task or the HTTP task, then
/// shut both down.
///
/// Order: `stop_http` is flipped and the HTTP task awaited (it drains open
/// connections), then `close_gateway` runs and the gateway task is awaited.
/// Each wait is bounded by `grace`; a task still running after that is
/// aborted and counted as stopped. Errors from either task are returned
/// only after both sides are down, gateway first.
async fn supervise<S, C>(
    mut gateway_task: JoinHandle<Result<()>>,
    mut http_task: JoinHandle<Result<()>>,
    signal: S,
    stop_http: watch::Sender<bool>,
    close_gateway: C,
    grace: Duration,
) -> Result<()>
where
    S: Future<Output = ()>,
    C: Future<Output = ()>,
{
    let mut http_result = None;
    let mut gateway_result = None;

    let trigger = tokio::select! {
        _ = signal => Trigger::Signal,
        res = &mut gateway_task => {
            gateway_result = Some(res);
            Trigger::GatewayStopped
        }
        res = &mut http_task => {
            http_result = Some(res);
            Trigger::HttpStopped
        }
    };

    match trigger {
        Trigger::Signal => info!("Shutdown signal received, shutting down..."),
        Trigger::GatewayStopped => warn!("Discord connection ended, shutting down..."),
        Trigger::HttpStopped => warn!("Health server ended, shutting down..."),
    }

    let _ = stop_http.send(true);
    let http_result = match http_result {
        Some(res) => res,
        None => {
            let drained = tokio::time::timeout(grace, &mut http_task).await;
            match drained {
                Ok(res) => res,
                Err(_) => {
                    warn!("Health server did not drain within {:?}; aborting", grace);
                    http_task.abort();
                    Ok(Ok(()))
                }
            }
        }
    };
    info!("Health server stopped");

    let gateway_result = match gateway_result {
        Some(res) => res,
        None => {
            let stop = async {
                close_gateway.await;
                (&mut gateway_task).await
            };
            let stopped = tokio::time::timeout(grace, stop).await;
            match stopped {
                Ok(res) => res,
                Err(_) => {
                    // No connected shard answers shutdown while it is still
                    // connecting or backing off.
                    warn!("Discord client did not stop within {:?}; aborting", grace);
                    gateway_task.abort();
                    Ok(Ok(()))
                }
            }
        }
    };
    info!("Discord bot has been shut down gracefully");

    gateway_result.context("Discord task panicked")??;
    http_result.context("Health server task panicked")??;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Interrupt received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
