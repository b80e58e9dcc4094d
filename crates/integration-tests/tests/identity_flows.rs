mod common;

use std::sync::Arc;

use common::{Harness, PASSWORD};
use domains::error::{AppError, Entity};
use domains::models::{Principal, UserId};
use domains::ports::{DocumentStore, MockAuthProvider, Query};
use services::{IdentityGateway, RetryPolicy};
use storage_adapters::MemoryDocumentStore;

#[tokio::test]
async fn username_login_ignores_case_and_is_repeatable() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    h.board.identity.sign_out().await.unwrap();

    for identifier in ["alice", "ALICE", "  Alice  ", "alice@example.com"] {
        let principal = h
            .board
            .identity
            .resolve_login_identifier(identifier, PASSWORD)
            .await
            .unwrap();
        assert_eq!(principal.id, alice.id, "{identifier}");
    }
    assert_eq!(
        h.board.identity.current_principal().await.map(|p| p.id),
        Some(alice.id)
    );
}

#[tokio::test]
async fn unknown_username_makes_no_auth_call() {
    let mut auth = MockAuthProvider::new();
    auth.expect_sign_in().times(0);
    let gateway = IdentityGateway::new(
        Arc::new(auth),
        Arc::new(MemoryDocumentStore::new()),
        RetryPolicy::default(),
    );

    let err = gateway.resolve_login_identifier("nobody", "pw").await.unwrap_err();
    assert_eq!(err, AppError::NotFound(Entity::Username, "nobody".into()));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let h = Harness::new();
    h.user("alice").await;

    let err = h
        .board
        .identity
        .resolve_login_identifier("alice", "not-the-password")
        .await
        .unwrap_err();
    assert_eq!(err, AppError::InvalidCredential);
}

#[tokio::test]
async fn duplicate_username_leaves_no_second_profile() {
    let h = Harness::new();
    h.user("alice").await;

    let err = h
        .board
        .identity
        .register_account("ALICE", "other@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::UsernameInUse("alice".into()));

    let profiles = h
        .store
        .query(&Query::collection(domains::ports::CollectionPath::root("users")))
        .await
        .unwrap();
    assert_eq!(profiles.len(), 1);
    let err = h
        .board
        .identity
        .authenticate_with_email("other@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(Entity::Account, _)));
}

#[tokio::test]
async fn duplicate_email_is_reported() {
    let h = Harness::new();
    h.user("alice").await;

    let err = h
        .board
        .identity
        .register_account("alice2", "alice@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmailInUse(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ensure_creates_one_profile() {
    let h = Arc::new(Harness::new());
    let principal = Principal {
        id: UserId::from("late-user"),
        email: "late@example.com".into(),
        display_name: Some("late".into()),
    };

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let (h, principal) = (h.clone(), principal.clone());
            tokio::spawn(async move { h.board.profiles.ensure_profile(&principal).await })
        })
        .collect();
    let mut created = Vec::new();
    for task in tasks {
        created.push(task.await.unwrap().unwrap());
    }

    assert!(created.windows(2).all(|pair| pair[0] == pair[1]));
    let users = h
        .store
        .query(&Query::collection(domains::ports::CollectionPath::root("users")))
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id(), "late-user");
}

#[tokio::test]
async fn password_reset_reaches_the_provider() {
    let h = Harness::new();
    h.user("alice").await;

    h.board
        .identity
        .send_password_reset("Alice@Example.com")
        .await
        .unwrap();
    assert_eq!(h.auth.password_reset_count("alice@example.com"), 1);
}

#[tokio::test]
async fn auth_state_follows_sign_out() {
    let h = Harness::new();
    let alice = h.user("alice").await;

    let mut state = h.board.identity.subscribe_auth_state().await;
    assert_eq!(state.recv().await.flatten().map(|p| p.id), Some(alice.id));

    h.board.identity.sign_out().await.unwrap();
    assert_eq!(state.recv().await, Some(None));
    state.cancel();
}

#[tokio::test]
async fn late_profile_with_a_taken_name_cannot_shadow_the_owner() {
    let h = Harness::new();
    let sam = h.user("sam").await;
    let late = Principal {
        id: UserId::from("u2"),
        email: "other@example.com".into(),
        display_name: Some("sam".into()),
    };

    let profile = h.board.profiles.ensure_profile(&late).await.unwrap();
    assert_eq!(profile.username, domains::models::DEFAULT_USERNAME);

    let signed_in = h
        .board
        .identity
        .resolve_login_identifier("sam", PASSWORD)
        .await
        .unwrap();
    assert_eq!(signed_in.id, sam.id);
}
