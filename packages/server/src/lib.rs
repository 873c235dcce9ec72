//! Parlor chat server library.
//!
//! A single chat room over line-oriented TCP or TLS, with a pool of
//! one-shot side-channel listeners for file and audio transfers.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
pub mod error;
pub mod heartbeat;

pub use config::{CliOverrides, ServerConfig};
pub use error::ServerError;
pub use ui::{Server, ServerHandle};
