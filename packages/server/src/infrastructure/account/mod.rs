//! Account store implementations
//!
//! - `inmemory`: プロセス内の HashMap を使った実装
//! - 将来的に: `postgres` など

pub mod inmemory;

pub use inmemory::InMemoryAccountStore;
