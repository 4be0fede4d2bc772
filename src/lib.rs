//! WhoAmI client core
//!
//! Session handling, a shared TTL cache and the feature services of the
//! WhoAmI app, over a pluggable backend boundary.

pub mod app;
pub mod backend;
pub mod cache;
pub mod config;
pub mod deeplink;
pub mod error;
pub mod preferences;
pub mod services;
pub mod session;
pub mod tasks;

pub use app::AppContext;
pub use config::Config;
pub use error::{AuthError, BackendError, ServiceError};
pub use session::{AuthState, AuthStatus, SessionManager};
pub use tasks::spawn_session_refresh_task;
