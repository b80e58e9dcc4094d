//! # Persisted layout
//!
//! Collection paths and the camelCase field records stored for each entity.
//! Missing fields decode to their defaults so older documents stay readable.

use chrono::{DateTime, Utc};
use domains::error::{AppError, Result};
use domains::models::{Comment, CommentId, Profile, Thread, ThreadId, UserId};
use domains::ports::{CollectionPath, Document, DocumentPath, Fields};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const USERS: &str = "users";
const DISCUSSIONS: &str = "discussions";
const COMMENTS: &str = "comments";
const USERNAMES: &str = "usernames";

const UNKNOWN_USERNAME: &str = "Unknown";
const MAX_USERNAME_LEN: usize = 30;

pub(crate) fn users() -> CollectionPath {
    CollectionPath::root(USERS)
}

pub(crate) fn user_doc(id: &UserId) -> DocumentPath {
    users().doc(id.as_str())
}

pub(crate) fn discussions() -> CollectionPath {
    CollectionPath::root(DISCUSSIONS)
}

pub(crate) fn thread_doc(id: &ThreadId) -> DocumentPath {
    discussions().doc(id.as_str())
}

pub(crate) fn comments_of(thread: &ThreadId) -> CollectionPath {
    thread_doc(thread).child(COMMENTS)
}

pub(crate) fn comment_doc(thread: &ThreadId, comment: &CommentId) -> DocumentPath {
    comments_of(thread).doc(comment.as_str())
}

/// Claim document reserving a lowercase username for one user.
pub(crate) fn username_claim(normalized: &str) -> DocumentPath {
    CollectionPath::root(USERNAMES).doc(normalized)
}

/// Trims and lowercases a user-chosen username, rejecting forms that could
/// be confused with an email or that would not survive a login round trip.
pub(crate) fn validated_username(raw: &str) -> Result<String> {
    let username = domains::models::normalize_username(raw);
    if username.is_empty() {
        return Err(AppError::ValidationError("username is required".into()));
    }
    if username.contains('@') || username.chars().any(char::is_whitespace) {
        return Err(AppError::ValidationError(
            "username may not contain '@' or whitespace".into(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::ValidationError(format!(
            "username may be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    Ok(username)
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRecord {
    #[serde(default = "unknown_username")]
    username: String,
    #[serde(default)]
    bio: String,
    #[serde(default)]
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile_image_url: Option<String>,
    #[serde(default)]
    skill_points: u64,
    #[serde(default)]
    uid: String,
}

fn unknown_username() -> String {
    UNKNOWN_USERNAME.to_owned()
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadRecord {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    author_id: String,
    #[serde(with = "chrono::serde::ts_microseconds", default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    comment_count: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentRecord {
    #[serde(default)]
    text: String,
    #[serde(default)]
    author_id: String,
    #[serde(with = "chrono::serde::ts_microseconds", default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    skill_points: u64,
}

#[derive(Serialize, Deserialize)]
struct ClaimRecord {
    uid: String,
}

fn decode<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc.fields.clone()))
        .map_err(|err| AppError::External(format!("malformed document {}: {err}", doc.path)))
}

fn encode<T: Serialize>(record: &T) -> Result<Fields> {
    match serde_json::to_value(record) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(AppError::External(format!(
            "record encoded to a non-object value: {other}"
        ))),
        Err(err) => Err(AppError::External(format!("record encoding failed: {err}"))),
    }
}

pub(crate) fn profile_from(doc: &Document) -> Result<Profile> {
    let record: ProfileRecord = decode(doc)?;
    Ok(Profile {
        id: UserId::new(doc.id()),
        username: record.username,
        bio: record.bio,
        email: record.email,
        profile_image_url: record.profile_image_url,
        skill_points: record.skill_points,
    })
}

pub(crate) fn profile_fields(profile: &Profile) -> Result<Fields> {
    encode(&ProfileRecord {
        username: profile.username.clone(),
        bio: profile.bio.clone(),
        email: profile.email.clone(),
        profile_image_url: profile.profile_image_url.clone(),
        skill_points: profile.skill_points,
        uid: profile.id.to_string(),
    })
}

pub(crate) fn thread_from(doc: &Document) -> Result<Thread> {
    let record: ThreadRecord = decode(doc)?;
    Ok(Thread {
        id: ThreadId::new(doc.id()),
        title: record.title,
        body: record.body,
        author_id: UserId::new(record.author_id),
        created_at: record.created_at,
        comment_count: record.comment_count,
    })
}

pub(crate) fn thread_fields(thread: &Thread) -> Result<Fields> {
    encode(&ThreadRecord {
        title: thread.title.clone(),
        body: thread.body.clone(),
        author_id: thread.author_id.to_string(),
        created_at: thread.created_at,
        comment_count: thread.comment_count,
    })
}

pub(crate) fn comment_from(doc: &Document, thread: &ThreadId) -> Result<Comment> {
    let record: CommentRecord = decode(doc)?;
    Ok(Comment {
        id: CommentId::new(doc.id()),
        thread_id: thread.clone(),
        text: record.text,
        author_id: UserId::new(record.author_id),
        created_at: record.created_at,
        skill_points: record.skill_points,
    })
}

pub(crate) fn comment_fields(comment: &Comment) -> Result<Fields> {
    encode(&CommentRecord {
        text: comment.text.clone(),
        author_id: comment.author_id.to_string(),
        created_at: comment.created_at,
        skill_points: comment.skill_points,
    })
}

pub(crate) fn claim_fields(owner: &UserId) -> Result<Fields> {
    encode(&ClaimRecord {
        uid: owner.to_string(),
    })
}

pub(crate) fn claim_owner(doc: &Document) -> Option<UserId> {
    decode::<ClaimRecord>(doc)
        .ok()
        .map(|claim| UserId::new(claim.uid))
}
