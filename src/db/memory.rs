use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{SecretToken, SecretTokenKind, User};
use crate::db::IdentityStore;
use crate::error::{AppError, DuplicateError};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    // Keyed by token value; values are unique across kinds.
    tokens: HashMap<String, SecretToken>,
}

/// In-memory store used by the test suites and for running the server
/// without a database. A single write lock per operation gives every trait
/// method the same atomicity the Postgres implementation gets from
/// transactions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn token_count(&self) -> usize {
        self.inner.read().await.tokens.len()
    }

    /// Fetches the newest stored token for a user and kind. The lifecycle
    /// only ever hands token values out through the notification sink, so
    /// tests reach for this instead.
    pub async fn token_for_user(
        &self,
        user_id: Uuid,
        kind: SecretTokenKind,
    ) -> Option<SecretToken> {
        let inner = self.inner.read().await;
        inner
            .tokens
            .values()
            .filter(|t| t.user_id == user_id && t.kind == kind)
            .max_by_key(|t| t.created_at)
            .cloned()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_user(
        &self,
        user: &User,
        verification: &SecretToken,
    ) -> Result<User, AppError> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(DuplicateError::UsernameTaken.into());
        }
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(DuplicateError::EmailTaken.into());
        }
        inner.users.insert(user.id, user.clone());
        inner
            .tokens
            .insert(verification.value.clone(), verification.clone());
        Ok(user.clone())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn enable_user(&self, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            user.enabled = true;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            let now = Utc::now();
            user.last_login = Some(now);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn token_by_value(
        &self,
        value: &str,
        kind: SecretTokenKind,
    ) -> Result<Option<SecretToken>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.tokens.get(value).filter(|t| t.kind == kind).cloned())
    }

    async fn remove_token(
        &self,
        value: &str,
        kind: SecretTokenKind,
    ) -> Result<Option<SecretToken>, AppError> {
        let mut inner = self.inner.write().await;
        let kind_matches = inner.tokens.get(value).map_or(false, |t| t.kind == kind);
        if kind_matches {
            Ok(inner.tokens.remove(value))
        } else {
            Ok(None)
        }
    }

    async fn replace_reset_token(&self, token: &SecretToken) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.tokens.retain(|_, t| {
            !(t.user_id == token.user_id && t.kind == SecretTokenKind::PasswordReset && !t.used)
        });
        inner.tokens.insert(token.value.clone(), token.clone());
        Ok(())
    }

    async fn mark_token_used(&self, value: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        match inner.tokens.get_mut(value) {
            Some(token) if !token.used => {
                token.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired_tokens(&self) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let before = inner.tokens.len();
        let now = Utc::now();
        inner.tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - inner.tokens.len()) as u64)
    }
}
