//! # Profile Store Adapter
//!
//! Reads and writes `users/{uid}`. Username changes move the matching
//! `usernames/{name}` claim in the same transaction so no two profiles ever
//! resolve to the same login name.

use std::sync::Arc;

use bytes::Bytes;
use domains::error::{AppError, Entity, Result};
use domains::models::{
    normalize_username, Principal, Profile, ProfileUpdate, UserId, DEFAULT_USERNAME,
};
use domains::ports::{BlobStore, DocumentStore, Fields};
use domains::subscription::Subscription;
use mime::Mime;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::records::{
    claim_fields, claim_owner, profile_fields, profile_from, user_doc, username_claim,
    validated_username,
};
use crate::retry::RetryPolicy;

const AVATAR_PREFIX: &str = "profile_images";

pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl ProfileService {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>, retry: RetryPolicy) -> Self {
        Self { store, blobs, retry }
    }

    /// Returns the principal's profile, creating the default one if it is
    /// missing. The default username is claimed only when it is a valid,
    /// unclaimed login name. A valid name held by someone else falls back to
    /// [`DEFAULT_USERNAME`], which can never resolve as a login.
    #[instrument(skip(self, principal), fields(uid = %principal.id))]
    pub async fn ensure_profile(&self, principal: &Principal) -> Result<Profile> {
        let user_path = user_doc(&principal.id);
        let default = Profile::default_for(principal);
        let claimable = validated_username(&default.username).ok();

        self.retry
            .run(self.store.as_ref(), "ensure_profile", |mut tx| {
                let user_path = user_path.clone();
                let mut profile = default.clone();
                let claimable = claimable.clone();
                async move {
                    if let Some(doc) = tx.get(&user_path).await? {
                        return profile_from(&doc);
                    }

                    let mut claim = None;
                    if let Some(username) = claimable {
                        let claim_path = username_claim(&username);
                        let owner = tx.get(&claim_path).await?.and_then(|doc| claim_owner(&doc));
                        if owner.is_none() || owner.as_ref() == Some(&profile.id) {
                            profile.username = username;
                            claim = Some(claim_path);
                        } else {
                            debug!(%username, "default username already claimed");
                            profile.username = DEFAULT_USERNAME.to_owned();
                        }
                    }

                    tx.set(&user_path, profile_fields(&profile)?);
                    if let Some(claim_path) = claim {
                        tx.set(&claim_path, claim_fields(&profile.id)?);
                    }
                    tx.commit().await?;
                    info!(username = %profile.username, "created default profile");
                    Ok(profile)
                }
            })
            .await
    }

    pub async fn get_profile(&self, uid: &UserId) -> Result<Option<Profile>> {
        match self.store.get(&user_doc(uid)).await? {
            Some(doc) => Ok(Some(profile_from(&doc)?)),
            None => Ok(None),
        }
    }

    /// Live view of one profile; `None` while it does not exist.
    /// Snapshots that fail to decode are logged and skipped.
    pub async fn subscribe_profile(&self, uid: &UserId) -> Result<Subscription<Option<Profile>>> {
        let snapshots = self.store.subscribe_document(user_doc(uid)).await?;
        Ok(snapshots.pipe(|doc, out| async move {
            match doc.as_ref().map(profile_from).transpose() {
                Ok(profile) => {
                    let _ = out.send(profile);
                }
                Err(err) => warn!(%err, "skipping undecodable profile snapshot"),
            }
        }))
    }

    /// Applies a partial edit. A username is validated, lowercased and
    /// claimed, even when it equals the stored one but no claim backs it;
    /// the previous claim is released when this user held it.
    #[instrument(skip(self, uid, update), fields(uid = %uid))]
    pub async fn update_profile(&self, uid: &UserId, update: ProfileUpdate) -> Result<()> {
        if update.is_empty() {
            debug!("empty profile update");
            return Ok(());
        }
        let username = update.username.as_deref().map(validated_username).transpose()?;
        let user_path = user_doc(uid);

        self.retry
            .run(self.store.as_ref(), "update_profile", |mut tx| {
                let user_path = user_path.clone();
                let uid = uid.clone();
                let username = username.clone();
                let update = update.clone();
                async move {
                    let current = tx
                        .get(&user_path)
                        .await?
                        .ok_or_else(|| AppError::NotFound(Entity::Profile, uid.to_string()))?;
                    let current = profile_from(&current)?;

                    let mut fields = Fields::new();
                    if let Some(username) = username {
                        let claim_path = username_claim(&username);
                        let owner = tx.get(&claim_path).await?.and_then(|doc| claim_owner(&doc));
                        match owner {
                            Some(owner) if owner != uid => {
                                return Err(AppError::UsernameInUse(username));
                            }
                            Some(_) => {}
                            None => {
                                let previous = username_claim(&normalize_username(&current.username));
                                if previous != claim_path {
                                    let held = tx.get(&previous).await?.and_then(|doc| claim_owner(&doc));
                                    if held.as_ref() == Some(&uid) {
                                        tx.delete(&previous);
                                    }
                                }
                                tx.set(&claim_path, claim_fields(&uid)?);
                            }
                        }
                        fields.insert("username".into(), Value::from(username));
                    }
                    if let Some(bio) = update.bio {
                        fields.insert("bio".into(), Value::from(bio));
                    }
                    if let Some(url) = update.avatar_url {
                        fields.insert("profileImageUrl".into(), Value::from(url));
                    }

                    tx.update(&user_path, fields);
                    tx.commit().await?;
                    info!("profile updated");
                    Ok(())
                }
            })
            .await
    }

    /// Stores avatar bytes and returns their public URL. Callers persist the
    /// URL with [`ProfileService::update_profile`].
    ///
    /// Blobs are named by content hash, sharded by its first two byte pairs.
    #[instrument(skip(self, uid, data), fields(uid = %uid, size = data.len()))]
    pub async fn upload_avatar(&self, uid: &UserId, data: Bytes, content_type: &str) -> Result<String> {
        let parsed: Mime = content_type
            .parse()
            .map_err(|_| AppError::ValidationError(format!("invalid content type: {content_type}")))?;
        if parsed.type_() != mime::IMAGE {
            return Err(AppError::ValidationError(format!(
                "avatar must be an image, got {parsed}"
            )));
        }
        if data.is_empty() {
            return Err(AppError::ValidationError("avatar is empty".into()));
        }

        let path = avatar_path(&data, &parsed);
        let handle = self.blobs.put(&path, data, &parsed).await?;
        let url = self.blobs.download_url(&handle).await?;
        info!(%url, "avatar uploaded");
        Ok(url)
    }
}

fn avatar_path(data: &[u8], content_type: &Mime) -> String {
    let hash = hex::encode(Sha256::digest(data));
    let ext = match content_type.subtype().as_str() {
        "jpeg" => "jpg",
        other => other,
    };
    format!("{AVATAR_PREFIX}/{}/{}/{hash}.{ext}", &hash[0..2], &hash[2..4])
}
