//! skillboard/crates/domains/src/lib.rs
//!
//! Domain models, the error taxonomy and the port traits for SkillBoard.
//! This crate performs no I/O of its own.

pub mod error;
pub mod models;
pub mod ports;
pub mod replica;
pub mod subscription;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use ports::*;
pub use replica::*;
pub use subscription::*;
