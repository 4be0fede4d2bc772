//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the client is up.
//!
//! # Tasks
//! - Session refresh: renews the session at a fixed interval

mod session_refresh;

pub use session_refresh::spawn_session_refresh_task;
