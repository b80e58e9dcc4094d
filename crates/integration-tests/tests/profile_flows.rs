mod common;

use bytes::Bytes;
use common::{Harness, PASSWORD};
use domains::error::AppError;
use domains::models::ProfileUpdate;

#[tokio::test]
async fn bio_edit_is_seen_by_a_fresh_subscription() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let before = h.board.profiles.get_profile(&alice.id).await.unwrap().unwrap();

    h.board
        .profiles
        .update_profile(&alice.id, ProfileUpdate::default().bio("X"))
        .await
        .unwrap();

    let mut live = h.board.profiles.subscribe_profile(&alice.id).await.unwrap();
    let after = live.recv().await.flatten().unwrap();
    live.cancel();

    assert_eq!(after.bio, "X");
    assert_eq!(after.username, before.username);
    assert_eq!(after.email, before.email);
    assert_eq!(after.skill_points, before.skill_points);
    assert_eq!(after.profile_image_url, before.profile_image_url);
}

#[tokio::test]
async fn renamed_user_logs_in_with_the_new_name_only() {
    let h = Harness::new();
    let alice = h.user("alice").await;

    h.board
        .profiles
        .update_profile(&alice.id, ProfileUpdate::default().username("Alicia"))
        .await
        .unwrap();

    let principal = h
        .board
        .identity
        .resolve_login_identifier("alicia", PASSWORD)
        .await
        .unwrap();
    assert_eq!(principal.id, alice.id);
    assert!(h
        .board
        .identity
        .resolve_login_identifier("alice", PASSWORD)
        .await
        .is_err());

    // The released name can be registered again.
    h.user("alice").await;
}

#[tokio::test]
async fn username_taken_by_another_user_is_refused() {
    let h = Harness::new();
    h.user("alice").await;
    let bob = h.user("bob").await;

    let err = h
        .board
        .profiles
        .update_profile(&bob.id, ProfileUpdate::default().username("ALICE"))
        .await
        .unwrap_err();
    assert_eq!(err, AppError::UsernameInUse("alice".into()));
}

#[tokio::test]
async fn uploaded_avatar_url_is_stored_on_the_profile() {
    let h = Harness::new();
    let alice = h.user("alice").await;

    let url = h
        .board
        .profiles
        .upload_avatar(&alice.id, Bytes::from_static(b"\x89PNG fake"), "image/png")
        .await
        .unwrap();
    assert!(url.starts_with("/static/blobs/profile_images/"));
    assert!(url.ends_with(".png"));

    h.board
        .profiles
        .update_profile(&alice.id, ProfileUpdate::default().avatar_url(url.clone()))
        .await
        .unwrap();

    let profile = h.board.profiles.get_profile(&alice.id).await.unwrap().unwrap();
    assert_eq!(profile.profile_image_url, Some(url));
}

#[tokio::test]
async fn identical_avatars_share_one_blob() {
    let h = Harness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    let data = Bytes::from_static(b"same pixels");

    let first = h
        .board
        .profiles
        .upload_avatar(&alice.id, data.clone(), "image/jpeg")
        .await
        .unwrap();
    let second = h
        .board
        .profiles
        .upload_avatar(&bob.id, data, "image/jpeg")
        .await
        .unwrap();
    assert_eq!(first, second);
}
