//! # auth-adapters
//!
//! Outbound adapters for the `AuthProvider` port.

pub mod memory;

pub use memory::{AuthPolicy, MemoryAuthProvider};
