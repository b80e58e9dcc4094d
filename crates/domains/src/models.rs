//! # Domain Models
//!
//! These structs represent the core entities of SkillBoard.
//! Identifiers are opaque strings issued by the auth provider (users) or the
//! document store (threads, comments).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Username given to a lazily created profile when the principal has no display name.
pub const DEFAULT_USERNAME: &str = "New User";
/// Bio given to a lazily created profile.
pub const DEFAULT_BIO: &str = "Tap Edit to add a bio!";
/// Name shown for an author whose profile could not be resolved.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Principal id, shared by the auth identity and its profile record.
    UserId
);
define_id!(
    /// Discussion thread id.
    ThreadId
);
define_id!(
    /// Comment id, unique within its thread.
    CommentId
);

/// An authenticated identity issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub email: String,
    /// Set through the provider's profile-change request after sign-up.
    pub display_name: Option<String>,
}

/// The application-level user record, keyed by principal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    /// Lowercase when claimed; see [`normalize_username`].
    pub username: String,
    pub bio: String,
    /// Stored redundantly so a username can be resolved to a login email.
    pub email: String,
    pub profile_image_url: Option<String>,
    pub skill_points: u64,
}

impl Profile {
    /// The profile created on first sign-in when none exists yet.
    pub fn default_for(principal: &Principal) -> Self {
        let username = principal
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_USERNAME)
            .to_owned();

        Self {
            id: principal.id.clone(),
            username,
            bio: DEFAULT_BIO.to_owned(),
            email: principal.email.clone(),
            profile_image_url: None,
            skill_points: 0,
        }
    }
}

/// A discussion post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub body: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    /// Denormalized count of child comments, maintained by add-comment.
    pub comment_count: u64,
}

/// A reply attached to exactly one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub thread_id: ThreadId,
    pub text: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub skill_points: u64,
}

/// A thread together with its resolved author, as emitted by thread subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadView {
    pub thread: Thread,
    pub author: Option<Profile>,
}

impl ThreadView {
    pub fn author_name(&self) -> &str {
        author_name(self.author.as_ref())
    }
}

/// A comment together with its author, which may still be unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Option<Profile>,
}

impl CommentView {
    pub fn author_name(&self) -> &str {
        author_name(self.author.as_ref())
    }
}

fn author_name(author: Option<&Profile>) -> &str {
    author.map_or(ANONYMOUS_AUTHOR, |profile| profile.username.as_str())
}

/// Partial profile edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.bio.is_none() && self.avatar_url.is_none()
    }
}

/// Lookup form of a username: trimmed and lowercased.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}
