//! Service wiring: build shared state, spawn the background loops, serve
//! HTTP, and unwind in order on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use fahrplan_core::Config;
use fahrplan_funkturm::{ConnectionManager, TaskPublisher};
use fahrplan_identity::{IdentityClient, JwksCache, TokenVerifier};
use fahrplan_queue::{QueueProvider, SqsQueueProvider};
use fahrplan_scheduler::SchedulerEngine;
use fahrplan_store::{ServiceDirectory, Store, StoreSession};

use crate::router;
use crate::state::AppState;

/// Inbound broker messages buffered toward the response router.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // The identity client comes up first, as a standalone service, so the
    // broker adapter can be constructed with a usable credential source.
    let identity = Arc::new(
        IdentityClient::new(&config.identity, shutdown_rx.clone())
            .context("failed to initialize the identity client")?,
    );
    identity
        .start()
        .await
        .context("failed to connect to the identity service")?;

    let session = Arc::new(
        StoreSession::connect(&config.database)
            .await
            .context("failed to connect to the scheduler database")?,
    );
    let store = Store::new(session.clone());

    let registrations =
        fahrplan_core::services::load_registrations(&config.services.registrations_path)
            .context("failed to load registered services")?;
    let directory = Arc::new(
        ServiceDirectory::initialize(&store, &registrations)
            .await
            .context("failed to initialize the service registry")?,
    );

    let queues: Arc<dyn QueueProvider> = Arc::new(
        SqsQueueProvider::new(&config.queue)
            .await
            .context("failed to initialize the queue provider")?,
    );

    let broker = Arc::new(ConnectionManager::new(
        &config.broker,
        identity.clone(),
        shutdown_rx.clone(),
    ));

    let jwks_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .context("failed to build the JWKS HTTP client")?;
    let jwks = Arc::new(JwksCache::new(jwks_http, &config.identity.base_url()));

    let engine = SchedulerEngine::new(
        store.clone(),
        directory.clone(),
        queues.clone(),
        broker.clone() as Arc<dyn TaskPublisher>,
        jwks.clone() as Arc<dyn TokenVerifier>,
        config.broker.qos,
    );

    let state = Arc::new(AppState {
        engine: engine.clone(),
        store: store.clone(),
        verifier: jwks.clone(),
        api_authn_enabled: config.server.api_authn_enabled,
        metrics: Default::default(),
        started_at: Instant::now(),
    });

    let app = router::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.rest_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "scheduler REST endpoint listening");

    // A fatal broker/identity failure terminates the process after a
    // graceful shutdown attempt.
    let fatal = Arc::new(AtomicBool::new(false));

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let mut background = Vec::new();

    {
        let broker = broker.clone();
        let fatal = fatal.clone();
        let shutdown_tx = shutdown_tx.clone();
        background.push(tokio::spawn(async move {
            if let Err(err) = broker.run(inbound_tx).await {
                error!(error = %err, "broker adapter failed fatally");
                fatal.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(true);
            }
        }));
    }

    {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            engine.run_scheduler_daemon(shutdown).await;
        }));
    }
    {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            engine.run_input_watcher(shutdown).await;
        }));
    }
    {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            engine.run_dispatch_worker(shutdown).await;
        }));
    }
    {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            engine.run_response_router(inbound_rx, shutdown).await;
        }));
    }

    // Credential refresher: renews the app token and swaps the database
    // session on the configured interval.
    {
        let identity = identity.clone();
        let session = session.clone();
        let database_config = config.database.clone();
        let interval = Duration::from_secs(config.identity.refresh_interval_secs);
        let mut shutdown = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => return,
                }
                if let Err(err) = identity.refresh_token().await {
                    error!(error = %err, "scheduled app credential refresh failed");
                }
                if let Err(err) = session.refresh(&database_config).await {
                    error!(error = %err, "scheduled database session refresh failed");
                }
            }
        }));
    }

    // Root signal handler.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("received shutdown signal, stopping request intake");
            let _ = shutdown_tx.send(true);
        });
    }

    let mut serve_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await
        .context("HTTP server failed")?;

    // Stop everything that is still running, then close storage last.
    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }
    session.close().await;

    if fatal.load(Ordering::SeqCst) {
        anyhow::bail!("identity service unreachable after all retries");
    }
    info!("scheduler service stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sig) => sig,
            Err(err) => {
                error!(error = %err, "failed to register SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                error!(error = %err, "failed to register SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
