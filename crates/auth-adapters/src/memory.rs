//! # In-process auth provider
//!
//! Argon2-based implementation of `AuthProvider`. Accounts live in memory,
//! keyed by lowercase email. Repeated failed sign-ins for one email lock it
//! out for a while, which surfaces as `AuthError::RateLimited`.

use std::time::{Duration, Instant};

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::models::{Principal, UserId};
use domains::ports::{AuthError, AuthProvider};
use domains::subscription::Subscription;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Password and throttling rules.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub min_password_length: usize,
    /// Consecutive failures that trigger a lockout.
    pub max_failed_attempts: u32,
    pub lockout: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            min_password_length: 6,
            max_failed_attempts: 5,
            lockout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct Account {
    uid: UserId,
    email: String,
    password_hash: String,
    display_name: Option<String>,
}

impl Account {
    fn principal(&self) -> Principal {
        Principal {
            id: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Failures {
    count: u32,
    locked_until: Option<Instant>,
}

pub struct MemoryAuthProvider {
    accounts: DashMap<String, Account>,
    failures: DashMap<String, Failures>,
    reset_requests: DashMap<String, u32>,
    session: watch::Sender<Option<Principal>>,
    policy: AuthPolicy,
    /// Optional server-side secret mixed into every hash.
    pepper: Option<SecretString>,
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new(AuthPolicy::default(), None)
    }
}

impl MemoryAuthProvider {
    pub fn new(policy: AuthPolicy, pepper: Option<SecretString>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            accounts: DashMap::new(),
            failures: DashMap::new(),
            reset_requests: DashMap::new(),
            session,
            policy,
            pepper,
        }
    }

    /// How many password-reset emails were requested for `email`.
    pub fn password_reset_count(&self, email: &str) -> u32 {
        self.reset_requests
            .get(&email_key(email))
            .map_or(0, |count| *count)
    }

    fn hasher(&self) -> Result<Argon2<'_>, AuthError> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper.expose_secret().as_bytes(),
                Algorithm::default(),
                Version::default(),
                Params::default(),
            )
            .map_err(|err| AuthError::Unavailable(err.to_string())),
            None => Ok(Argon2::default()),
        }
    }

    fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AuthError::Unavailable(err.to_string()))
    }

    /// Verifies a password against a stored Argon2 hash.
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(false),
        };
        Ok(self
            .hasher()?
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    fn check_lockout(&self, key: &str) -> Result<(), AuthError> {
        let Some(mut failures) = self.failures.get_mut(key) else {
            return Ok(());
        };
        match failures.locked_until {
            Some(until) if until > Instant::now() => Err(AuthError::RateLimited(
                "too many failed sign-in attempts, try again later".into(),
            )),
            Some(_) => {
                failures.locked_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_failure(&self, key: &str) {
        let mut failures = self.failures.entry(key.to_owned()).or_default();
        failures.count += 1;
        if failures.count >= self.policy.max_failed_attempts {
            warn!(email = key, "locking account after repeated sign-in failures");
            failures.count = 0;
            failures.locked_until = Some(Instant::now() + self.policy.lockout);
        }
    }

    fn start_session(&self, principal: &Principal) {
        self.session.send_replace(Some(principal.clone()));
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_well_formed(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let key = email_key(email);
        self.check_lockout(&key)?;

        let account = self
            .accounts
            .get(&key)
            .map(|account| account.clone())
            .ok_or_else(|| AuthError::UserNotFound(email.trim().to_owned()))?;

        if !self.verify_password(password, &account.password_hash)? {
            self.record_failure(&key);
            return Err(AuthError::InvalidCredential);
        }

        self.failures.remove(&key);
        let principal = account.principal();
        self.start_session(&principal);
        info!(uid = %principal.id, "signed in");
        Ok(principal)
    }

    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let email = email.trim();
        if !is_well_formed(email) {
            return Err(AuthError::InvalidEmail(email.to_owned()));
        }
        if password.chars().count() < self.policy.min_password_length {
            return Err(AuthError::WeakPassword(format!(
                "password should be at least {} characters",
                self.policy.min_password_length
            )));
        }

        let password_hash = self.hash_password(password)?;
        let account = Account {
            uid: UserId::new(Uuid::new_v4().simple().to_string()),
            email: email.to_owned(),
            password_hash,
            display_name: None,
        };

        match self.accounts.entry(email_key(email)) {
            Entry::Occupied(_) => return Err(AuthError::EmailInUse(email.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
            }
        }

        let principal = account.principal();
        self.start_session(&principal);
        info!(uid = %principal.id, "account created");
        Ok(principal)
    }

    async fn set_display_name(&self, uid: &UserId, display_name: &str) -> Result<(), AuthError> {
        let mut account = self
            .accounts
            .iter_mut()
            .find(|account| &account.uid == uid)
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))?;
        account.display_name = Some(display_name.to_owned());
        let principal = account.principal();
        drop(account);

        self.session.send_if_modified(|current| match current {
            Some(signed_in) if &signed_in.id == uid => {
                *signed_in = principal;
                true
            }
            _ => false,
        });
        debug!(%uid, "display name updated");
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(principal) = self.session.send_replace(None) {
            info!(uid = %principal.id, "signed out");
        }
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let key = email_key(email);
        if !self.accounts.contains_key(&key) {
            return Err(AuthError::UserNotFound(email.trim().to_owned()));
        }
        *self.reset_requests.entry(key).or_insert(0) += 1;
        info!(email = email.trim(), "password reset requested");
        Ok(())
    }

    async fn current_principal(&self) -> Option<Principal> {
        self.session.borrow().clone()
    }

    async fn subscribe_auth_state(&self) -> Subscription<Option<Principal>> {
        let mut changes = self.session.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (sender, subscription) = Subscription::channel(move || {
            let _ = stop_tx.send(());
        });

        let _ = sender.send(changes.borrow_and_update().clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = changes.borrow_and_update().clone();
                        if sender.send(current).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        subscription
    }
}
