#![allow(dead_code)]

use std::sync::Arc;

use auth_adapters::MemoryAuthProvider;
use domains::models::{Principal, ThreadId};
use services::{RetryPolicy, SkillBoard};
use storage_adapters::{LocalBlobStore, MemoryDocumentStore};
use tempfile::TempDir;

pub const PASSWORD: &str = "correct-horse";

/// One in-process SkillBoard over memory adapters.
pub struct Harness {
    pub board: SkillBoard,
    pub store: MemoryDocumentStore,
    pub auth: Arc<MemoryAuthProvider>,
    _blobs: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        let store = MemoryDocumentStore::new();
        let auth = Arc::new(MemoryAuthProvider::default());
        let blobs_dir = tempfile::tempdir().expect("tempdir");
        let blobs = LocalBlobStore::new(blobs_dir.path(), "/static/blobs");

        let board = SkillBoard::new(
            auth.clone(),
            Arc::new(store.clone()),
            Arc::new(blobs),
            retry,
        );
        Self {
            board,
            store,
            auth,
            _blobs: blobs_dir,
        }
    }

    /// Registers `username` and makes sure its profile exists.
    pub async fn user(&self, username: &str) -> Principal {
        let principal = self
            .board
            .identity
            .register_account(username, &format!("{username}@example.com"), PASSWORD)
            .await
            .expect("register");
        self.board
            .profiles
            .ensure_profile(&principal)
            .await
            .expect("ensure profile");
        principal
    }

    pub async fn thread(&self, author: &Principal) -> ThreadId {
        self.board
            .discussions
            .create_thread(Some(&author.id), "Hello", "World")
            .await
            .expect("create thread")
    }

    pub async fn skill_points(&self, principal: &Principal) -> u64 {
        self.board
            .profiles
            .get_profile(&principal.id)
            .await
            .expect("get profile")
            .expect("profile exists")
            .skill_points
    }
}
