//! WhoAmI client daemon
//!
//! Runs the client core headless: restores or opens a session, keeps it fresh
//! and logs auth state changes until shut down.

use std::env;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whoami_client::{spawn_session_refresh_task, AppContext, AuthState, Config};

/// Main entry point for the WhoAmI client.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the backend client, shared cache and services
/// 4. Restore the stored session, or sign in with `WHOAMI_EMAIL`/`WHOAMI_PASSWORD`
/// 5. Start the background session refresh task
/// 6. Log auth state changes until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whoami_client=info,whoami=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting WhoAmI client");

    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={}, cache_ttl={}s, refresh_interval={}s",
        config.backend_url,
        config.cache_default_ttl.as_secs(),
        config.session_refresh_interval.as_secs()
    );

    let app = AppContext::from_config(&config).context("Failed to create backend client")?;

    if let Some(preferences) = &app.preferences {
        match preferences.record_launch() {
            Ok(launches) => info!(launches, "Launch recorded"),
            Err(e) => warn!(error = %e, "Could not update preferences"),
        }
    }

    if !app.session.restore().await {
        sign_in_from_env(&app).await;
    }

    let refresh_handle = spawn_session_refresh_task(app.session.clone(), config.session_refresh_interval);
    info!("Background session refresh task started");

    let auth = app.session.subscribe();
    tokio::select! {
        result = shutdown_signal() => result?,
        _ = log_auth_changes(auth) => {}
    }

    refresh_handle.abort();
    warn!("Session refresh task aborted");
    info!("Shutdown complete");
    Ok(())
}

async fn sign_in_from_env(app: &AppContext) {
    let (Ok(email), Ok(password)) = (env::var("WHOAMI_EMAIL"), env::var("WHOAMI_PASSWORD")) else {
        info!("No stored session; running signed out");
        return;
    };
    match app.session.sign_in(&email, &password).await {
        Ok(user) => info!(user_id = %user.id, "Signed in"),
        Err(e) => error!(error = %e, "Sign-in failed"),
    }
}

async fn log_auth_changes(mut auth: watch::Receiver<AuthState>) {
    while auth.changed().await.is_ok() {
        let state = auth.borrow_and_update().clone();
        match state.error {
            Some(e) => warn!(status = state.status.name(), error = %e, "Auth state changed"),
            None => info!(status = state.status.name(), "Auth state changed"),
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
    Ok(())
}
