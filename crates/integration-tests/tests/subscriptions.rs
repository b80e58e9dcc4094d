mod common;

use std::time::Duration;

use common::Harness;
use domains::models::{CommentView, ThreadView};
use domains::replica::Replica;
use futures_util::StreamExt;

/// Gives spawned pipe tasks a chance to observe a cancellation.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn cancelled_feeds_leave_no_listeners() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let thread = h.thread(&alice).await;
    let baseline = h.store.active_listeners();

    let threads = h.board.discussions.subscribe_threads().await.unwrap();
    let mine = h.board.discussions.subscribe_threads_by_author(&alice.id).await.unwrap();
    let comments = h.board.discussions.subscribe_comments(&thread).await.unwrap();
    let profile = h.board.profiles.subscribe_profile(&alice.id).await.unwrap();
    assert_eq!(h.store.active_listeners(), baseline + 4);

    threads.cancel();
    mine.cancel();
    comments.cancel();
    profile.cancel();
    settle().await;

    assert_eq!(h.store.active_listeners(), baseline);
}

#[tokio::test]
async fn dropped_feed_is_pruned_after_the_next_write() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let thread = h.thread(&alice).await;
    let baseline = h.store.active_listeners();

    drop(h.board.discussions.subscribe_comments(&thread).await.unwrap());
    settle().await;
    h.board
        .reputation
        .add_comment(&thread, Some(&alice.id), "anyone?")
        .await
        .unwrap();

    assert_eq!(h.store.active_listeners(), baseline);
}

#[tokio::test]
async fn thread_feed_tracks_comment_counts() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let thread = h.thread(&alice).await;

    let mut feed = h.board.discussions.subscribe_threads().await.unwrap();
    let mut replica: Replica<ThreadView> = Replica::new();
    replica.apply_snapshot(feed.next().await.unwrap());
    assert_eq!(replica.get(&thread).unwrap().thread.comment_count, 0);
    assert_eq!(replica.get(&thread).unwrap().author_name(), "alice");

    h.board
        .reputation
        .add_comment(&thread, Some(&alice.id), "reply")
        .await
        .unwrap();
    replica.apply_snapshot(feed.next().await.unwrap());
    assert_eq!(replica.get(&thread).unwrap().thread.comment_count, 1);
    feed.cancel();
}

#[tokio::test]
async fn comment_feed_upserts_author_patches() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    let thread = h.thread(&alice).await;
    let comment = h
        .board
        .reputation
        .add_comment(&thread, Some(&bob.id), "hi")
        .await
        .unwrap();

    let mut feed = h.board.discussions.subscribe_comments(&thread).await.unwrap();
    let mut replica: Replica<CommentView> = Replica::new();

    let snapshot = feed.next().await.unwrap();
    assert!(snapshot[0].author.is_none());
    replica.apply_snapshot(snapshot);

    for view in feed.next().await.unwrap() {
        replica.upsert(view);
    }
    assert_eq!(replica.len(), 1);
    assert_eq!(replica.get(&comment).unwrap().author_name(), "bob");
    feed.cancel();
}
