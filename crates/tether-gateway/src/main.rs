//! Tether Gateway - HTTP API for presence and companion calls
//!
//! This is the main entry point for the gateway service. The control plane
//! runs in-process on an embedded RocksDB store.
//!
//! # Dev Mode
//!
//! Build with `--features dev-mode` to use a mock JWT validator that needs
//! no signing secret. Use tokens in format: `test-token:<user-uuid>[:<email>]`
//!
//! # Maintenance
//!
//! Ringing calls are expired and old signals collected every
//! `SWEEP_INTERVAL_SECONDS` (0 disables the in-process sweep; an external
//! scheduler can then call `POST /internal/v1/sweep`).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "dev-mode")]
use tether_auth::MockJwtValidator;
#[cfg(not(feature = "dev-mode"))]
use tether_auth::{AuthConfig, HmacValidator, DEFAULT_AUDIENCE};
use tether_control::{CompanionPlane, CompanionService, ControlConfig};
use tether_gateway::{create_router, GatewayConfig, GatewayState};
use tether_store::RocksStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T, BoxError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}={raw:?}: {e}").into()),
        Err(_) => Ok(default),
    }
}

fn control_config() -> Result<ControlConfig, BoxError> {
    let defaults = ControlConfig::default();
    Ok(ControlConfig {
        staleness_threshold_seconds: env_or(
            "STALENESS_SECONDS",
            defaults.staleness_threshold_seconds,
        )?,
        ring_timeout_seconds: env_or("RING_TIMEOUT_SECONDS", defaults.ring_timeout_seconds)?,
        signal_grace_seconds: env_or("SIGNAL_GRACE_SECONDS", defaults.signal_grace_seconds)?,
        max_connections_per_owner: env_or(
            "MAX_CONNECTIONS_PER_OWNER",
            defaults.max_connections_per_owner,
        )?,
        ..defaults
    })
}

fn gateway_config() -> Result<GatewayConfig, BoxError> {
    let defaults = GatewayConfig::default();
    let cors_origins = std::env::var("CORS_ORIGINS").map_or(defaults.cors_origins.clone(), |v| {
        v.split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    });

    Ok(GatewayConfig {
        listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr.clone()),
        cors_origins,
        internal_token: std::env::var("INTERNAL_TOKEN").ok().filter(|t| !t.is_empty()),
        sweep_interval_seconds: env_or("SWEEP_INTERVAL_SECONDS", defaults.sweep_interval_seconds)?,
        ..defaults
    })
}

/// Run the maintenance sweep on a fixed interval until the process exits.
fn spawn_sweeper<C: CompanionPlane + 'static>(control: Arc<C>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match control.sweep().await {
                Ok(report) if report.expired_calls > 0 || report.signals_removed > 0 => {
                    tracing::info!(
                        expired_calls = report.expired_calls,
                        signals_removed = report.signals_removed,
                        "Sweep completed"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tether=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tether Gateway");

    // Load configuration from environment
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tether".into());
    let control_config = control_config()?;
    let gateway_config = gateway_config()?;

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %data_dir,
        staleness_seconds = control_config.staleness_threshold_seconds,
        ring_timeout_seconds = control_config.ring_timeout_seconds,
        sweep_interval_seconds = gateway_config.sweep_interval_seconds,
        internal_token = gateway_config.internal_token.is_some(),
        "Gateway configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&data_dir)?);

    let control = Arc::new(CompanionService::new(store, control_config));
    tracing::info!("Control plane initialized");

    // Initialize JWT validator
    #[cfg(feature = "dev-mode")]
    let jwt_validator = {
        tracing::warn!("DEV MODE ENABLED - using mock JWT validator");
        tracing::warn!("Use tokens in format: test-token:<user-uuid>[:<email>]");
        Arc::new(MockJwtValidator)
    };

    #[cfg(not(feature = "dev-mode"))]
    let jwt_validator = {
        let auth_config = AuthConfig {
            jwt_secret: std::env::var("AUTH_JWT_SECRET")
                .map_err(|_| "AUTH_JWT_SECRET must be set")?,
            audience: std::env::var("AUTH_AUDIENCE").unwrap_or_else(|_| DEFAULT_AUDIENCE.into()),
            issuer: std::env::var("AUTH_ISSUER").ok(),
        };
        Arc::new(HmacValidator::new(&auth_config)?)
    };
    tracing::info!("JWT validator initialized");

    if let Some(every) = gateway_config.sweep_interval() {
        spawn_sweeper(Arc::clone(&control), every);
        tracing::info!(interval = ?every, "Maintenance sweep scheduled");
    } else {
        tracing::warn!("In-process sweep disabled - expect POST /internal/v1/sweep");
    }

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(control, jwt_validator, gateway_config);
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
