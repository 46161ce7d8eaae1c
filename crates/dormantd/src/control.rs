//! Control mode: provider API, launcher endpoint and autoscaler.
//!
//! In this mode, the daemon:
//! 1. Opens the state store written by `provision`
//! 2. Derives the world-scoped grant policy from the configuration
//! 3. Serves the provider API and the launcher on one port
//! 4. Runs the autoscaler loop until shutdown

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dormant_api::ApiState;
use dormant_autoscale::Autoscaler;
use dormant_core::duration::parse_or;
use dormant_core::{DormantConfig, parse_duration};
use dormant_iam::{Policy, Principal};
use dormant_launcher::{InteractionVerifier, Launcher, LauncherState};
use dormant_provider::{GuardedScheduler, LocalProvider};
use dormant_state::StateStore;

const DEFAULT_PORT: u16 = 8480;
const DEFAULT_AUTOSCALE_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_control(config_path: &Path, data_dir: &Path, port: Option<u16>) -> anyhow::Result<()> {
    info!("dormant daemon starting in control mode");
    let config = DormantConfig::from_file(config_path)
        .with_context(|| format!("load {}", config_path.display()))?;

    // ── State store ──────────────────────────────────────────────
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("dormant.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let provisioned = store.list_worlds()?.len();
    if provisioned == 0 {
        warn!("no worlds provisioned; run `dormantd provision` first");
    }

    // ── Permissions ──────────────────────────────────────────────
    let launcher_principal = config
        .launcher
        .principal
        .clone()
        .map(Principal::new)
        .unwrap_or_else(Principal::launcher);
    let policy = Arc::new(Policy::for_worlds(&config.worlds, &launcher_principal)?);
    info!(grants = policy.grants().len(), "grant policy built");

    // ── Provider API ─────────────────────────────────────────────
    let retention = match config.control.metrics_retention.as_deref() {
        Some(raw) => Some(
            parse_duration(raw).with_context(|| format!("invalid control.metrics_retention {raw:?}"))?,
        ),
        None => None,
    };
    let tokens = config
        .principals
        .iter()
        .map(|p| (p.token.clone(), Principal::new(p.name.clone())));
    let api_state = ApiState::new(store.clone(), policy.clone())
        .with_tokens(tokens)
        .with_retention(retention);

    // ── Launcher ─────────────────────────────────────────────────
    let launcher_scheduler = GuardedScheduler::new(
        LocalProvider::new(store.clone(), launcher_principal.clone()),
        policy.clone(),
        launcher_principal,
    );
    let launcher = Launcher::new(Arc::new(launcher_scheduler), config.launcher.default_world.clone());
    let verifier = match config.launcher.interaction_public_key.as_deref() {
        Some(key) => Some(Arc::new(
            InteractionVerifier::from_hex(key).context("launcher.interaction_public_key")?,
        )),
        None => None,
    };
    info!(
        default_world = ?config.launcher.default_world,
        interactions = verifier.is_some(),
        "launcher initialized"
    );
    let launcher_state = LauncherState {
        launcher: Arc::new(launcher),
        verifier,
    };

    // ── Autoscaler ───────────────────────────────────────────────
    let interval = parse_or(config.control.autoscale_interval.as_deref(), DEFAULT_AUTOSCALE_INTERVAL)
        .context("invalid control.autoscale_interval")?;
    let autoscale_scheduler = GuardedScheduler::new(
        LocalProvider::new(store.clone(), Principal::autoscaler()),
        policy.clone(),
        Principal::autoscaler(),
    );
    let mut autoscaler = Autoscaler::new(Arc::new(autoscale_scheduler));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(interval, shutdown_rx).await;
    });

    // ── HTTP server ──────────────────────────────────────────────
    let router = dormant_api::build_router(api_state).merge(dormant_launcher::build_router(launcher_state));
    let port = port.or(config.control.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "control server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;
    let _ = autoscale_handle.await;

    info!("control plane stopped");
    Ok(())
}
