//! Per-connection handlers.

pub mod pusher;
pub mod session;
pub mod side_channel;

pub use session::handle_control_connection;
pub use side_channel::handle_side_connection;
