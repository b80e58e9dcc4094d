mod common;

use std::sync::Arc;

use common::Harness;
use domains::error::{AppError, Entity};
use domains::models::ThreadId;
use services::RetryPolicy;

const WRITERS: u32 = 16;

#[tokio::test]
async fn new_thread_then_one_comment() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let thread = h.thread(&alice).await;

    let created = h.board.discussions.get_thread(&thread).await.unwrap().unwrap();
    assert_eq!(created.title, "Hello");
    assert_eq!(created.body, "World");
    assert_eq!(created.comment_count, 0);

    let comment = h
        .board
        .reputation
        .add_comment(&thread, Some(&alice.id), "first!")
        .await
        .unwrap();

    let updated = h.board.discussions.get_thread(&thread).await.unwrap().unwrap();
    assert_eq!(updated.comment_count, 1);
    let comments = h.board.discussions.list_comments(&thread).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id, comment);
    assert_eq!(comments[0].skill_points, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_comments_are_all_counted() {
    // Every retry is caused by some other writer's commit, so one attempt
    // per writer is always enough.
    let h = Arc::new(Harness::with_retry(RetryPolicy {
        max_attempts: WRITERS,
        ..RetryPolicy::default()
    }));
    let alice = h.user("alice").await;
    let thread = h.thread(&alice).await;

    let tasks: Vec<_> = (0..WRITERS)
        .map(|i| {
            let (h, thread, author) = (h.clone(), thread.clone(), alice.id.clone());
            tokio::spawn(async move {
                h.board
                    .reputation
                    .add_comment(&thread, Some(&author), &format!("comment {i}"))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let thread_doc = h.board.discussions.get_thread(&thread).await.unwrap().unwrap();
    assert_eq!(thread_doc.comment_count, u64::from(WRITERS));
    let comments = h.board.discussions.list_comments(&thread).await.unwrap();
    assert_eq!(comments.len(), WRITERS as usize);
}

#[tokio::test]
async fn comment_on_unknown_thread_changes_nothing() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let before = h.store.revision().await;

    let err = h
        .board
        .reputation
        .add_comment(&ThreadId::from("missing"), Some(&alice.id), "hello?")
        .await
        .unwrap_err();

    assert_eq!(err, AppError::NotFound(Entity::Thread, "missing".into()));
    assert_eq!(h.store.revision().await, before);
}

#[tokio::test]
async fn signed_out_users_cannot_post() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let thread = h.thread(&alice).await;

    let err = h
        .board
        .discussions
        .create_thread(None, "Hello", "World")
        .await
        .unwrap_err();
    assert_eq!(err, AppError::NotAuthenticated);

    let err = h
        .board
        .reputation
        .add_comment(&thread, None, "hi")
        .await
        .unwrap_err();
    assert_eq!(err, AppError::NotAuthenticated);
}
