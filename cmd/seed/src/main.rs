//! # seed
//!
//! Builds a SkillBoard over the in-process adapters, fills it with a few
//! users, a thread, comments and awards, then logs the resulting
//! reputation table. Settings come from `configs`.

use std::sync::Arc;

use anyhow::Context;
use auth_adapters::{AuthPolicy, MemoryAuthProvider};
use bytes::Bytes;
use configs::{LogFormat, LogSettings, Settings};
use domains::models::{Principal, ProfileUpdate};
use services::{RetryPolicy, SkillBoard};
use storage_adapters::{LocalBlobStore, MemoryDocumentStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_PASSWORD: &str = "skillboard-demo";
// 1x1 transparent PNG.
const DEMO_AVATAR: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn build(settings: &Settings) -> SkillBoard {
    let auth = MemoryAuthProvider::new(
        AuthPolicy {
            min_password_length: settings.auth.min_password_length,
            max_failed_attempts: settings.auth.max_failed_attempts,
            lockout: settings.auth.lockout(),
        },
        settings.auth.password_pepper.clone(),
    );
    let blobs = LocalBlobStore::new(settings.media.root.clone(), settings.media.url_prefix.clone());
    let retry = RetryPolicy {
        max_attempts: settings.transactions.max_attempts,
        base_delay: settings.transactions.base_delay(),
        max_delay: settings.transactions.max_delay(),
    };

    SkillBoard::new(
        Arc::new(auth),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(blobs),
        retry,
    )
}

async fn register(board: &SkillBoard, username: &str) -> anyhow::Result<Principal> {
    let principal = board
        .identity
        .register_account(username, &format!("{username}@skillboard.dev"), DEMO_PASSWORD)
        .await
        .with_context(|| format!("registering {username}"))?;
    board.profiles.ensure_profile(&principal).await?;
    Ok(principal)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log);
    if let Some(path) = &settings.env_file {
        info!(path = %path.display(), "loaded .env");
    }

    let board = Arc::new(build(&settings));

    let mentor = register(&board, "mentor").await?;
    let helpers = [
        register(&board, "ada").await?,
        register(&board, "linus").await?,
        register(&board, "grace").await?,
    ];

    // Username login goes through the profile lookup.
    board
        .identity
        .resolve_login_identifier("Mentor", DEMO_PASSWORD)
        .await
        .context("username sign-in")?;

    match board
        .profiles
        .upload_avatar(&mentor.id, Bytes::from_static(DEMO_AVATAR), "image/png")
        .await
    {
        Ok(url) => {
            board
                .profiles
                .update_profile(
                    &mentor.id,
                    ProfileUpdate::default()
                        .avatar_url(url)
                        .bio("Ask me about lifetimes."),
                )
                .await?;
        }
        Err(err) => warn!(%err, "avatar upload skipped"),
    }

    let thread = board
        .discussions
        .create_thread(
            Some(&mentor.id),
            "How do I share state between tasks?",
            "Arc<Mutex<T>> feels heavy. What else is there?",
        )
        .await?;

    let replies = helpers.iter().enumerate().map(|(i, helper)| {
        let (board, thread, author) = (board.clone(), thread.clone(), helper.id.clone());
        tokio::spawn(async move {
            board
                .reputation
                .add_comment(&thread, Some(&author), &format!("Reply #{}", i + 1))
                .await
        })
    });
    let mut comments = Vec::new();
    for reply in replies.collect::<Vec<_>>() {
        comments.push(reply.await??);
    }

    for (awards, comment) in comments.iter().enumerate() {
        for _ in 0..=awards {
            board.reputation.award_skill_point(comment, &thread).await?;
        }
    }

    let summary = board
        .discussions
        .get_thread(&thread)
        .await?
        .context("seeded thread vanished")?;
    info!(thread = %summary.id, comments = summary.comment_count, "thread seeded");

    for principal in std::iter::once(&mentor).chain(helpers.iter()) {
        if let Some(profile) = board.profiles.get_profile(&principal.id).await? {
            info!(
                username = %profile.username,
                skill_points = profile.skill_points,
                avatar = profile.profile_image_url.as_deref().unwrap_or("-"),
                "profile"
            );
        }
    }

    board.identity.sign_out().await?;
    Ok(())
}
