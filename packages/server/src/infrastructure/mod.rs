//! Infrastructure layer: concrete implementations of the domain interfaces
//! plus the network transport.

pub mod account;
pub mod registry;
pub mod storage;
pub mod transport;

pub use account::InMemoryAccountStore;
pub use registry::{Connection, ConnectionRegistry, Outbound, PusherChannel};
pub use storage::FileStorage;
