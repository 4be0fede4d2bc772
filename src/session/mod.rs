//! Session plumbing
//!
//! Auth status machine and the manager that drives it.

mod manager;
mod state;

pub use manager::{SessionManager, PASSWORD_RESET_REDIRECT};
pub use state::{AuthState, AuthStatus};
