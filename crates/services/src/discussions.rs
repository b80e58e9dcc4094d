//! # Discussion Store Adapter
//!
//! Threads live in `discussions`, their comments in
//! `discussions/{id}/comments`. Subscriptions join each record with its
//! author's profile before handing it out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use domains::error::{AppError, Result};
use domains::models::{Comment, CommentView, Profile, Thread, ThreadId, ThreadView, UserId};
use domains::ports::{Direction, Document, DocumentStore, Query};
use domains::subscription::Subscription;
use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::records::{
    comment_from, comments_of, discussions, profile_from, thread_doc, thread_fields, thread_from,
    user_doc,
};

const CREATED_AT: &str = "createdAt";

pub struct DiscussionService {
    store: Arc<dyn DocumentStore>,
}

impl DiscussionService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Publishes a new thread with a zero comment count and returns its id.
    #[instrument(skip(self, author, body), fields(author = ?author))]
    pub async fn create_thread(
        &self,
        author: Option<&UserId>,
        title: &str,
        body: &str,
    ) -> Result<ThreadId> {
        let author = author.ok_or(AppError::NotAuthenticated)?;
        if title.trim().is_empty() || body.trim().is_empty() {
            return Err(AppError::ValidationError("title and body are required".into()));
        }

        let thread = Thread {
            id: ThreadId::new(""),
            title: title.to_owned(),
            body: body.to_owned(),
            author_id: author.clone(),
            created_at: Utc::now(),
            comment_count: 0,
        };
        let path = self.store.add(&discussions(), thread_fields(&thread)?).await?;
        let id = ThreadId::new(path.id());
        info!(thread = %id, "thread created");
        Ok(id)
    }

    pub async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        match self.store.get(&thread_doc(id)).await? {
            Some(doc) => Ok(Some(thread_from(&doc)?)),
            None => Ok(None),
        }
    }

    /// Comments of a thread, oldest first.
    pub async fn list_comments(&self, thread: &ThreadId) -> Result<Vec<Comment>> {
        let query = Query::collection(comments_of(thread)).order_by(CREATED_AT, Direction::Ascending);
        let docs = self.store.query(&query).await?;
        Ok(decode_all(&docs, |doc| comment_from(doc, thread)))
    }

    /// All threads, newest first, each with its author resolved.
    pub async fn subscribe_threads(&self) -> Result<Subscription<Vec<ThreadView>>> {
        let query = Query::collection(discussions()).order_by(CREATED_AT, Direction::Descending);
        self.subscribe_thread_query(query).await
    }

    /// Threads written by one user, newest first.
    pub async fn subscribe_threads_by_author(
        &self,
        author: &UserId,
    ) -> Result<Subscription<Vec<ThreadView>>> {
        let query = Query::collection(discussions())
            .where_eq("authorId", author.as_str())
            .order_by(CREATED_AT, Direction::Descending);
        self.subscribe_thread_query(query).await
    }

    async fn subscribe_thread_query(&self, query: Query) -> Result<Subscription<Vec<ThreadView>>> {
        let snapshots = self.store.subscribe_query(query).await?;
        let store = self.store.clone();

        Ok(snapshots.pipe(move |docs, out| {
            let store = store.clone();
            async move {
                let threads = decode_all(&docs, thread_from);
                let authors = resolve_authors(store.as_ref(), threads.iter().map(|t| &t.author_id)).await;
                let views = threads
                    .into_iter()
                    .map(|thread| {
                        let author = authors.get(&thread.author_id).cloned();
                        ThreadView { thread, author }
                    })
                    .collect();
                let _ = out.send(views);
            }
        }))
    }

    /// Comments of a thread, oldest first.
    ///
    /// Each snapshot is emitted at once with whatever authors are already
    /// cached for this subscription. Unknown authors are then looked up in
    /// the background and, if no newer snapshot has arrived meanwhile, the
    /// same comments are emitted again with those authors filled in.
    pub async fn subscribe_comments(
        &self,
        thread: &ThreadId,
    ) -> Result<Subscription<Vec<CommentView>>> {
        let query = Query::collection(comments_of(thread)).order_by(CREATED_AT, Direction::Ascending);
        let snapshots = self.store.subscribe_query(query).await?;
        let store = self.store.clone();
        let thread = thread.clone();
        let feed = Arc::new(Mutex::new(CommentFeed::default()));

        Ok(snapshots.pipe(move |docs, out| {
            let (store, thread, feed) = (store.clone(), thread.clone(), feed.clone());
            async move {
                let comments = decode_all(&docs, |doc| comment_from(doc, &thread));
                let (generation, missing) = {
                    let mut current = lock(&feed);
                    current.generation += 1;
                    if !current.emit(&comments, &out) {
                        return;
                    }
                    (current.generation, current.missing_authors(&comments))
                };
                if missing.is_empty() {
                    return;
                }

                tokio::spawn(async move {
                    let resolved = resolve_authors(store.as_ref(), missing.iter()).await;
                    if resolved.is_empty() {
                        return;
                    }
                    let mut current = lock(&feed);
                    current.authors.extend(resolved);
                    if current.generation == generation {
                        debug!(thread = %thread, "patching comment authors");
                        current.emit(&comments, &out);
                    }
                });
            }
        }))
    }
}

/// Per-subscription author cache plus a counter of snapshots seen, used to
/// drop author patches for comments that have since been superseded.
#[derive(Default)]
struct CommentFeed {
    generation: u64,
    authors: HashMap<UserId, Profile>,
}

impl CommentFeed {
    /// Sends while the feed is locked so a patch can never overtake a
    /// newer snapshot. Returns `false` once the subscriber is gone.
    fn emit(&self, comments: &[Comment], out: &UnboundedSender<Vec<CommentView>>) -> bool {
        let views = comments
            .iter()
            .map(|comment| CommentView {
                comment: comment.clone(),
                author: self.authors.get(&comment.author_id).cloned(),
            })
            .collect();
        out.send(views).is_ok()
    }

    fn missing_authors(&self, comments: &[Comment]) -> Vec<UserId> {
        let mut seen = HashSet::new();
        comments
            .iter()
            .map(|comment| &comment.author_id)
            .filter(|id| !id.as_str().is_empty() && !self.authors.contains_key(*id))
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }
}

fn lock(feed: &Mutex<CommentFeed>) -> MutexGuard<'_, CommentFeed> {
    feed.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode_all<T>(docs: &[Document], decode: impl Fn(&Document) -> Result<T>) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%err, "skipping undecodable document");
                None
            }
        })
        .collect()
}

/// Looks up each distinct author once. Authors whose profile is missing or
/// unreadable are left out of the map and render as anonymous.
async fn resolve_authors<'a>(
    store: &dyn DocumentStore,
    ids: impl IntoIterator<Item = &'a UserId>,
) -> HashMap<UserId, Profile> {
    let distinct: HashSet<&UserId> = ids.into_iter().filter(|id| !id.as_str().is_empty()).collect();
    let lookups = distinct.into_iter().map(|id| async move {
        match store.get(&user_doc(id)).await {
            Ok(Some(doc)) => match profile_from(&doc) {
                Ok(profile) => Some((id.clone(), profile)),
                Err(err) => {
                    warn!(uid = %id, %err, "author profile is malformed");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(uid = %id, %err, "author lookup failed");
                None
            }
        }
    });
    join_all(lookups).await.into_iter().flatten().collect()
}
