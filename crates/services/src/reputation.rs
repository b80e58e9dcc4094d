//! # Reputation Transaction Core
//!
//! The two multi-document writes of the forum:
//!
//! * `add_comment` creates the comment and bumps its thread's
//!   `commentCount` in one transaction. The thread is read with a pinned
//!   revision, so concurrent comments conflict and the loser retries with a
//!   fresh count.
//! * `award_skill_point` increments `skillPoints` on the comment and on its
//!   author's profile. Both documents are only checked for existence, so
//!   concurrent awards merge instead of conflicting.

use std::sync::Arc;

use chrono::Utc;
use domains::error::{AppError, Entity, Result};
use domains::models::{Comment, CommentId, ThreadId, UserId};
use domains::ports::{DocumentStore, Fields};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::records::{comment_doc, comment_fields, comment_from, thread_doc, thread_from, user_doc};
use crate::retry::RetryPolicy;

const SKILL_POINTS: &str = "skillPoints";

pub struct ReputationService {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl ReputationService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Adds a comment and increments the thread's comment count atomically.
    ///
    /// The comment id is chosen up front so every retry writes the same
    /// document.
    #[instrument(skip(self, author, text), fields(author = ?author))]
    pub async fn add_comment(
        &self,
        thread: &ThreadId,
        author: Option<&UserId>,
        text: &str,
    ) -> Result<CommentId> {
        let author = author.ok_or(AppError::NotAuthenticated)?.clone();
        if text.trim().is_empty() {
            return Err(AppError::ValidationError("comment text is required".into()));
        }
        let comment_id = CommentId::new(Uuid::new_v4().simple().to_string());
        let thread_path = thread_doc(thread);
        let comment_path = comment_doc(thread, &comment_id);

        self.retry
            .run(self.store.as_ref(), "add_comment", |mut tx| {
                let (thread_path, comment_path) = (thread_path.clone(), comment_path.clone());
                let comment = Comment {
                    id: comment_id.clone(),
                    thread_id: thread.clone(),
                    text: text.to_owned(),
                    author_id: author.clone(),
                    created_at: Utc::now(),
                    skill_points: 0,
                };
                async move {
                    let doc = tx
                        .get(&thread_path)
                        .await?
                        .ok_or_else(|| AppError::NotFound(Entity::Thread, comment.thread_id.to_string()))?;
                    let count = thread_from(&doc)?.comment_count;

                    let mut counter = Fields::new();
                    counter.insert("commentCount".into(), Value::from(count + 1));
                    tx.set(&comment_path, comment_fields(&comment)?);
                    tx.update(&thread_path, counter);
                    tx.commit().await?;
                    Ok(())
                }
            })
            .await?;

        info!(comment = %comment_id, "comment added");
        Ok(comment_id)
    }

    /// Gives one skill point to a comment and one to its author.
    #[instrument(skip(self))]
    pub async fn award_skill_point(&self, comment: &CommentId, thread: &ThreadId) -> Result<()> {
        let comment_path = comment_doc(thread, comment);

        let author = self
            .retry
            .run(self.store.as_ref(), "award_skill_point", |mut tx| {
                let comment_path = comment_path.clone();
                let (comment, thread) = (comment.clone(), thread.clone());
                async move {
                    let doc = tx
                        .peek(&comment_path)
                        .await?
                        .ok_or_else(|| AppError::NotFound(Entity::Comment, comment.to_string()))?;
                    let author = comment_from(&doc, &thread)?.author_id;
                    let author_path = user_doc(&author);
                    if tx.peek(&author_path).await?.is_none() {
                        return Err(AppError::NotFound(Entity::Profile, author.to_string()));
                    }

                    tx.increment(&comment_path, SKILL_POINTS, 1);
                    tx.increment(&author_path, SKILL_POINTS, 1);
                    tx.commit().await?;
                    Ok(author)
                }
            })
            .await?;

        info!(author = %author, "skill point awarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{profile_fields, thread_fields};
    use domains::models::{Profile, Thread};
    use domains::ports::{MockDocumentStore, MockTransaction, StoreError, Transaction};
    use storage_adapters::MemoryDocumentStore;

    async fn seed(store: &MemoryDocumentStore) -> (ThreadId, UserId) {
        let author = UserId::from("u1");
        let profile = Profile {
            id: author.clone(),
            username: "alice".into(),
            bio: String::new(),
            email: "alice@example.com".into(),
            profile_image_url: None,
            skill_points: 0,
        };
        store
            .set(&user_doc(&author), profile_fields(&profile).unwrap())
            .await
            .unwrap();

        let thread = Thread {
            id: ThreadId::from("t1"),
            title: "Title".into(),
            body: "Body".into(),
            author_id: author.clone(),
            created_at: Utc::now(),
            comment_count: 0,
        };
        store
            .set(&thread_doc(&thread.id), thread_fields(&thread).unwrap())
            .await
            .unwrap();
        (thread.id, author)
    }

    async fn thread_count(store: &MemoryDocumentStore, thread: &ThreadId) -> u64 {
        let doc = store.get(&thread_doc(thread)).await.unwrap().unwrap();
        thread_from(&doc).unwrap().comment_count
    }

    #[tokio::test]
    async fn comment_bumps_thread_count() {
        let store = MemoryDocumentStore::new();
        let (thread, author) = seed(&store).await;
        let service = ReputationService::new(Arc::new(store.clone()), RetryPolicy::immediate(3));

        let id = service.add_comment(&thread, Some(&author), "hello").await.unwrap();

        assert_eq!(thread_count(&store, &thread).await, 1);
        let doc = store.get(&comment_doc(&thread, &id)).await.unwrap().unwrap();
        let comment = comment_from(&doc, &thread).unwrap();
        assert_eq!(comment.text, "hello");
        assert_eq!(comment.skill_points, 0);
    }

    #[tokio::test]
    async fn comment_on_missing_thread_writes_nothing() {
        let store = MemoryDocumentStore::new();
        let service = ReputationService::new(Arc::new(store.clone()), RetryPolicy::immediate(3));
        let missing = ThreadId::from("nope");

        let err = service
            .add_comment(&missing, Some(&UserId::from("u1")), "hi")
            .await
            .unwrap_err();
        assert_eq!(err, AppError::NotFound(Entity::Thread, "nope".into()));
        assert_eq!(store.revision().await, 0);
    }

    #[tokio::test]
    async fn comment_requires_author_and_text() {
        let mut store = MockDocumentStore::new();
        store.expect_begin().times(0);
        let service = ReputationService::new(Arc::new(store), RetryPolicy::immediate(3));
        let thread = ThreadId::from("t1");

        let err = service.add_comment(&thread, None, "hi").await.unwrap_err();
        assert_eq!(err, AppError::NotAuthenticated);
        let err = service
            .add_comment(&thread, Some(&UserId::from("u1")), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn persistent_conflict_exhausts_retries() {
        let mut store = MockDocumentStore::new();
        store.expect_begin().times(4).returning(|| {
            let mut tx = MockTransaction::new();
            tx.expect_get().returning(|path| {
                let mut fields = Fields::new();
                fields.insert("commentCount".into(), Value::from(3));
                Ok(Some(domains::ports::Document {
                    path: path.clone(),
                    fields,
                }))
            });
            tx.expect_set().return_const(());
            tx.expect_update().return_const(());
            tx.expect_commit()
                .returning(|| Err(StoreError::Conflict("discussions/t1".into())));
            Ok(Box::new(tx) as Box<dyn Transaction>)
        });
        let service = ReputationService::new(Arc::new(store), RetryPolicy::immediate(4));

        let err = service
            .add_comment(&ThreadId::from("t1"), Some(&UserId::from("u1")), "hi")
            .await
            .unwrap_err();
        assert_eq!(err, AppError::WriteConflict { attempts: 4 });
    }

    #[tokio::test]
    async fn award_increments_comment_and_author() {
        let store = MemoryDocumentStore::new();
        let (thread, author) = seed(&store).await;
        let service = ReputationService::new(Arc::new(store.clone()), RetryPolicy::immediate(3));
        let comment = service.add_comment(&thread, Some(&author), "useful").await.unwrap();

        service.award_skill_point(&comment, &thread).await.unwrap();
        service.award_skill_point(&comment, &thread).await.unwrap();

        let doc = store.get(&comment_doc(&thread, &comment)).await.unwrap().unwrap();
        assert_eq!(doc.fields[SKILL_POINTS], 2);
        let profile = store.get(&user_doc(&author)).await.unwrap().unwrap();
        assert_eq!(profile.fields[SKILL_POINTS], 2);
    }

    #[tokio::test]
    async fn award_on_missing_comment_is_not_found() {
        let store = MemoryDocumentStore::new();
        let (thread, _) = seed(&store).await;
        let service = ReputationService::new(Arc::new(store), RetryPolicy::immediate(3));

        let err = service
            .award_skill_point(&CommentId::from("ghost"), &thread)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::NotFound(Entity::Comment, "ghost".into()));
    }

    #[tokio::test]
    async fn award_without_author_profile_changes_nothing() {
        let store = MemoryDocumentStore::new();
        let (thread, _) = seed(&store).await;
        let service = ReputationService::new(Arc::new(store.clone()), RetryPolicy::immediate(3));
        let orphan = service
            .add_comment(&thread, Some(&UserId::from("deleted")), "orphan")
            .await
            .unwrap();

        let err = service.award_skill_point(&orphan, &thread).await.unwrap_err();
        assert_eq!(err, AppError::NotFound(Entity::Profile, "deleted".into()));

        let doc = store.get(&comment_doc(&thread, &orphan)).await.unwrap().unwrap();
        assert_eq!(doc.fields[SKILL_POINTS], 0);
    }
}
