//! Network-facing layer: accept loops and per-connection handlers.

mod handler;
mod server;
mod signal;
pub mod state;

pub use handler::session::{SessionEnd, SessionState};
pub use server::{Server, ServerHandle};
pub use signal::shutdown_signal;
