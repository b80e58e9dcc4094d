//! # Identity Gateway
//!
//! Sign-in by email or username, account registration and the session
//! surface of the auth provider. Username logins are resolved through the
//! profile collection, which stores each user's email alongside the name.

use std::sync::Arc;

use domains::error::{AppError, Entity, Result};
use domains::models::{Principal, Profile, DEFAULT_BIO};
use domains::ports::{AuthProvider, DocumentStore, Query};
use domains::subscription::Subscription;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::records::{
    claim_fields, claim_owner, profile_fields, user_doc, username_claim, users,
    validated_username,
};
use crate::retry::RetryPolicy;

pub struct IdentityGateway {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

fn require_credentials(identifier: &str, password: &str) -> Result<()> {
    if identifier.is_empty() || password.is_empty() {
        return Err(AppError::ValidationError(
            "email/username and password are required".into(),
        ));
    }
    Ok(())
}

impl IdentityGateway {
    pub fn new(auth: Arc<dyn AuthProvider>, store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { auth, store, retry }
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate_with_email(&self, email: &str, password: &str) -> Result<Principal> {
        let email = email.trim();
        require_credentials(email, password)?;
        let principal = self.auth.sign_in(email, password).await?;
        info!(uid = %principal.id, "signed in");
        Ok(principal)
    }

    /// Signs in with either an email or a username.
    ///
    /// Anything containing `@` is treated as an email. Otherwise the
    /// lowercased identifier must match exactly one profile, whose stored
    /// email is then used for the credential check. Several matches are
    /// narrowed to the holder of the username claim.
    #[instrument(skip(self, password))]
    pub async fn resolve_login_identifier(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Principal> {
        let identifier = identifier.trim();
        require_credentials(identifier, password)?;
        if identifier.contains('@') {
            return self.authenticate_with_email(identifier, password).await;
        }

        let username = domains::models::normalize_username(identifier);
        let query = Query::collection(users()).where_eq("username", username.clone());
        let mut matches = self.store.query(&query).await?;
        if matches.len() > 1 {
            let owner = self
                .store
                .get(&username_claim(&username))
                .await?
                .and_then(|doc| claim_owner(&doc));
            matches.retain(|doc| owner.as_ref().is_some_and(|owner| doc.path == user_doc(owner)));
        }

        let [profile] = matches.as_slice() else {
            debug!(count = matches.len(), "username did not resolve to a single profile");
            return Err(AppError::NotFound(Entity::Username, username));
        };
        let email = profile
            .fields
            .get("email")
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| AppError::NotFound(Entity::Username, username.clone()))?
            .to_owned();

        self.authenticate_with_email(&email, password).await
    }

    /// Creates the account, sets its display name and writes the initial
    /// profile together with its username claim.
    ///
    /// A failed profile write does not undo the account: the principal is
    /// still returned and the profile is recreated on next sign-in. Losing
    /// the username to a concurrent registration is reported, though, and
    /// the new session is closed; the account keeps a default profile once
    /// it signs in again.
    #[instrument(skip(self, password))]
    pub async fn register_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal> {
        let username = validated_username(username)?;
        let email = email.trim();
        require_credentials(email, password)?;

        // Checked before sign-up so a taken name does not leave an account behind.
        if let Some(doc) = self.store.get(&username_claim(&username)).await? {
            debug!(owner = ?claim_owner(&doc), "username already claimed");
            return Err(AppError::UsernameInUse(username));
        }

        let mut principal = self.auth.sign_up(email, password).await?;
        match self.auth.set_display_name(&principal.id, &username).await {
            Ok(()) => principal.display_name = Some(username.clone()),
            Err(err) => warn!(uid = %principal.id, %err, "failed to set display name"),
        }

        let profile = Profile {
            id: principal.id.clone(),
            username: username.clone(),
            bio: DEFAULT_BIO.to_owned(),
            email: email.to_owned(),
            profile_image_url: None,
            skill_points: 0,
        };
        match self.create_profile(&profile).await {
            Ok(()) => info!(uid = %principal.id, %username, "account registered"),
            Err(AppError::UsernameInUse(name)) => {
                warn!(uid = %principal.id, %name, "username claimed concurrently during registration");
                if let Err(err) = self.auth.sign_out().await {
                    warn!(uid = %principal.id, %err, "failed to close session of unregistered name");
                }
                return Err(AppError::UsernameInUse(name));
            }
            Err(err) => {
                warn!(uid = %principal.id, %err, "profile write failed after sign-up, it will be recreated on sign-in");
            }
        }
        Ok(principal)
    }

    async fn create_profile(&self, profile: &Profile) -> Result<()> {
        let user_path = user_doc(&profile.id);
        let claim_path = username_claim(&profile.username);
        let fields = profile_fields(profile)?;
        let claim = claim_fields(&profile.id)?;

        self.retry
            .run(self.store.as_ref(), "register_account", |mut tx| {
                let (user_path, claim_path) = (user_path.clone(), claim_path.clone());
                let (fields, claim) = (fields.clone(), claim.clone());
                let (uid, username) = (profile.id.clone(), profile.username.clone());
                async move {
                    if let Some(doc) = tx.get(&claim_path).await? {
                        if claim_owner(&doc).as_ref() != Some(&uid) {
                            return Err(AppError::UsernameInUse(username));
                        }
                    }
                    tx.set(&user_path, fields);
                    tx.set(&claim_path, claim);
                    tx.commit().await?;
                    Ok(())
                }
            })
            .await
    }

    pub async fn current_principal(&self) -> Option<Principal> {
        self.auth.current_principal().await
    }

    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await?;
        info!("signed out");
        Ok(())
    }

    /// Asks the provider to email a reset link. Unknown addresses surface
    /// as `NotFound(Account, ..)`.
    #[instrument(skip(self))]
    pub async fn send_password_reset(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::ValidationError("email is required".into()));
        }
        self.auth.send_password_reset(email).await?;
        Ok(())
    }

    /// Emits the current principal immediately, then on every sign-in or sign-out.
    pub async fn subscribe_auth_state(&self) -> Subscription<Option<Principal>> {
        self.auth.subscribe_auth_state().await
    }
}
