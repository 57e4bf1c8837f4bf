//! Speedboard -- speed test dashboard with live charts and saved history.
//!
//! A run steps through ping, download and upload phases while a separate
//! sampler feeds a rolling chart buffer. Completed runs are saved for the
//! signed-in user.

pub mod api;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod display;
pub mod netinfo;
pub mod notify;
pub mod sampler;
pub mod sequencer;
pub mod session;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Config, LoggingConfig};
use crate::dashboard::{Dashboard, DashboardDeps};
use crate::notify::{BroadcastNotifier, SharedNotifier};
use crate::session::LocalSessions;
use crate::storage::SqliteResultStore;

/// Number of notifications kept for `/notifications/recent`.
const RECENT_NOTIFICATIONS: usize = 20;

/// Install the global tracing subscriber on stderr. `RUST_LOG` wins over the
/// config.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Wire storage, sessions and metadata lookup for a dashboard.
///
/// Callers may swap the clock or metric source before building.
pub fn dashboard_deps(config: &Config, notifier: SharedNotifier) -> Result<DashboardDeps> {
    config.validate()?;
    let pool = storage::open_pool(&config.server.db_path)
        .with_context(|| format!("failed to open database {}", config.server.db_path.display()))?;

    let mut deps = DashboardDeps::new(
        config.clone(),
        Arc::new(LocalSessions::new(pool.clone())),
        Arc::new(SqliteResultStore::new(pool)),
        notifier,
    );
    deps.capability = netinfo::detect_connection();
    if config.metadata.enabled {
        match netinfo::IpApiProvider::from_config(&config.metadata) {
            Ok(provider) => deps.metadata = Some(Arc::new(provider)),
            Err(e) => tracing::warn!(error = %e, "metadata lookup unavailable"),
        }
    }
    Ok(deps)
}

pub fn build_dashboard(config: &Config, notifier: SharedNotifier) -> Result<Dashboard> {
    Ok(Dashboard::new(dashboard_deps(config, notifier)?))
}

/// Start the dashboard API server.
pub async fn serve(config: Config) -> Result<()> {
    tracing::info!(db_path = %config.server.db_path.display(), "Initializing database");
    let notifications = BroadcastNotifier::new(RECENT_NOTIFICATIONS);
    let dashboard = build_dashboard(&config, Arc::new(notifications.clone()))?;
    dashboard.spawn_network_refresh();

    let state = api::state::AppState {
        dashboard,
        notifications,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, "Speedboard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
