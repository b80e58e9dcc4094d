//! # storage-adapters
//!
//! Outbound adapters for the SkillBoard storage ports: an in-process
//! document store and, behind `media-local`, a filesystem blob store.

pub mod document_store;
#[cfg(feature = "media-local")]
pub mod blob_store;

pub use document_store::{MemoryDocumentStore, MemoryTransaction};
#[cfg(feature = "media-local")]
pub use blob_store::LocalBlobStore;
