//! Parlor chat client library.
//!
//! The protocol engine, login/registration probes, the heartbeat sender and
//! side-channel transfers, shared by the `parlor-client` binary and tests.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod runner;
pub mod transfer;
pub mod transport;
pub mod ui;

pub use auth::AuthClient;
pub use config::ClientConfig;
pub use engine::{ChatClient, ClientEvent};
pub use error::ClientError;
pub use transfer::{SideChannel, TransferSlots};
pub use transport::Transport;
