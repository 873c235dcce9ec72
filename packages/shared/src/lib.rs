//! Wire protocol and shared utilities for the Parlor chat service.
//!
//! Both the server and the client speak the same control-channel grammar
//! and the same binary framing; this crate is the single definition of both.

pub mod error;
pub mod frame;
pub mod logger;
pub mod protocol;
pub mod size;
pub mod time;

pub use error::ProtocolError;
