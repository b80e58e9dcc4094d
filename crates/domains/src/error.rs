//! # AppError
//!
//! Centralized error handling for the SkillBoard core.
//! Adapter failures (`StoreError`, `AuthError`) are folded into the domain
//! taxonomy here so the presentation layer only ever sees [`AppError`].

use std::fmt;

use thiserror::Error;

use crate::ports::{AuthError, StoreError};

/// The kind of entity a [`AppError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Thread,
    Comment,
    Profile,
    Username,
    Account,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Thread => "thread",
            Self::Comment => "comment",
            Self::Profile => "profile",
            Self::Username => "username",
            Self::Account => "account",
        };
        f.write_str(name)
    }
}

/// The primary error type for all SkillBoard operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The operation needs a signed-in principal and none is present.
    #[error("you must be logged in to do that")]
    NotAuthenticated,

    /// Target entity absent at operation time (thread, comment, profile, username)
    #[error("{0} not found with ID {1}")]
    NotFound(Entity, String),

    /// Rejected before any network call (empty title, empty credentials, ...)
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid email or password")]
    InvalidCredential,

    #[error("too many requests: {0}")]
    RateLimited(String),

    #[error("weak password: {0}")]
    WeakPassword(String),

    #[error("email already in use: {0}")]
    EmailInUse(String),

    #[error("username already in use: {0}")]
    UsernameInUse(String),

    /// Optimistic-concurrency collisions outlasted the retry budget.
    #[error("write conflict persisted after {attempts} attempts")]
    WriteConflict { attempts: u32 },

    /// Network, auth-provider or store failure, carrying the provider's message.
    #[error("external service error: {0}")]
    External(String),
}

/// A specialized Result type for SkillBoard logic.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::WriteConflict { attempts: 1 },
            other => Self::External(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredential => Self::InvalidCredential,
            AuthError::UserNotFound(email) => Self::NotFound(Entity::Account, email),
            AuthError::RateLimited(msg) => Self::RateLimited(msg),
            AuthError::WeakPassword(msg) => Self::WeakPassword(msg),
            AuthError::EmailInUse(email) => Self::EmailInUse(email),
            AuthError::InvalidEmail(email) => {
                Self::ValidationError(format!("'{email}' is not a valid email address"))
            }
            AuthError::Unavailable(msg) => Self::External(msg),
        }
    }
}
