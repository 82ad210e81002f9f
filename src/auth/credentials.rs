use std::sync::Arc;

use crate::auth::password;
use crate::db::models::User;
use crate::db::IdentityStore;
use crate::error::{AppError, AuthError};

/// Validates username/password pairs against stored digests.
///
/// Unknown usernames and wrong passwords produce the same error, and the
/// unknown-username path still runs a full digest verification against a
/// fallback hash so response latency does not reveal whether the account
/// exists.
pub struct CredentialVerifier {
    store: Arc<dyn IdentityStore>,
    fallback_hash: String,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn IdentityStore>) -> Result<Self, AppError> {
        let fallback_hash = password::hash("fallback-credential-placeholder")?;
        Ok(Self {
            store,
            fallback_hash,
        })
    }

    pub async fn authenticate(&self, username: &str, plaintext: &str) -> Result<User, AppError> {
        match self.store.user_by_username(username).await? {
            Some(user) => {
                if !password::verify(plaintext, &user.password_hash) {
                    return Err(AuthError::InvalidCredentials.into());
                }
                // Enabled gating is checked here, unconditionally, for every
                // login path.
                if !user.enabled {
                    return Err(AuthError::AccountDisabled.into());
                }
                Ok(user)
            }
            None => {
                let _ = password::verify(plaintext, &self.fallback_hash);
                Err(AuthError::InvalidCredentials.into())
            }
        }
    }
}
