//! # services
//!
//! Application logic of SkillBoard, written against the ports in `domains`.
//! Adapters are injected as `Arc<dyn Port>`; nothing here knows which
//! backend is behind them.

pub mod discussions;
pub mod identity;
pub mod profiles;
mod records;
pub mod reputation;
pub mod retry;

use std::sync::Arc;

use domains::ports::{AuthProvider, BlobStore, DocumentStore};

pub use discussions::DiscussionService;
pub use identity::IdentityGateway;
pub use profiles::ProfileService;
pub use reputation::ReputationService;
pub use retry::RetryPolicy;

/// All four services wired to one set of adapters.
pub struct SkillBoard {
    pub identity: IdentityGateway,
    pub profiles: ProfileService,
    pub discussions: DiscussionService,
    pub reputation: ReputationService,
}

impl SkillBoard {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            identity: IdentityGateway::new(auth, store.clone(), retry),
            profiles: ProfileService::new(store.clone(), blobs, retry),
            discussions: DiscussionService::new(store.clone()),
            reputation: ReputationService::new(store, retry),
        }
    }
}
