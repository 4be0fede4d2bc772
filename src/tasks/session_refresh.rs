//! Session refresh task
//!
//! Background task that periodically renews the session so an expired or
//! revoked one is noticed without waiting for a failing request.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::SessionManager;

/// Interval used when a zero interval is requested
const FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns a background task that refreshes the session every `interval`.
///
/// Ticks while signed out do nothing. A rejected refresh signs the user out
/// (handled by [`SessionManager::refresh`]); a network failure is retried on
/// the next tick. A zero `interval` is replaced with one second.
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_session_refresh_task(session.clone(), Duration::from_secs(300));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_session_refresh_task(session: Arc<SessionManager>, interval: Duration) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        warn!("Zero session refresh interval, using {}s", FALLBACK_INTERVAL.as_secs());
        FALLBACK_INTERVAL
    } else {
        interval
    };

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting session refresh task");

        loop {
            tokio::time::sleep(interval).await;

            if !session.is_authenticated() {
                debug!("Session refresh: signed out, skipping");
                continue;
            }

            match session.refresh().await {
                Ok(()) => debug!("Session refresh: renewed"),
                Err(e) => info!(error = %e, "Session refresh failed"),
            }
        }
    })
}
