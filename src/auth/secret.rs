use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Duration;
use rand::RngCore;
use uuid::Uuid;

use crate::db::models::{SecretToken, SecretTokenKind, User};
use crate::db::IdentityStore;
use crate::error::{AppError, TokenError};

/// Number of random bytes behind each token value; 32 bytes of CSPRNG output
/// makes values unguessable and non-enumerable.
const TOKEN_BYTES: usize = 32;

/// Issues and redeems the single-use side-channel tokens (email
/// verification, password reset).
///
/// Verification tokens are consume-on-read: redemption removes the record,
/// and the store's atomic remove decides concurrent redeemers. Reset tokens
/// are redeemed non-destructively because the password change can still fail
/// after lookup; the caller consumes them afterwards via [`consume_reset`],
/// a compare-and-swap on the used flag.
///
/// [`consume_reset`]: SecretTokenStore::consume_reset
pub struct SecretTokenStore {
    store: Arc<dyn IdentityStore>,
    ttl: Duration,
}

impl SecretTokenStore {
    pub fn new(store: Arc<dyn IdentityStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Builds a fresh token record without persisting it. Registration
    /// persists the record together with the new user in one transaction.
    pub fn mint(&self, user_id: Uuid, kind: SecretTokenKind) -> SecretToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);
        SecretToken::new(user_id, kind, value, self.ttl)
    }

    /// Issues a new reset token, replacing any unconsumed one the user still
    /// has. At most one reset token per user is live at any time.
    pub async fn issue_reset(&self, user_id: Uuid) -> Result<SecretToken, AppError> {
        let token = self.mint(user_id, SecretTokenKind::PasswordReset);
        self.store.replace_reset_token(&token).await?;
        Ok(token)
    }

    /// Redeems an email-verification token, consuming it. A second
    /// redemption of the same value fails `NotFound`.
    pub async fn redeem_verification(&self, value: &str) -> Result<User, AppError> {
        let token = self
            .store
            .token_by_value(value, SecretTokenKind::EmailVerification)
            .await?
            .ok_or(TokenError::NotFound)?;

        if token.is_expired() {
            return Err(TokenError::Expired.into());
        }

        // Consume. A concurrent redeemer may have won between the lookup and
        // here; the remove decides.
        let token = self
            .store
            .remove_token(value, SecretTokenKind::EmailVerification)
            .await?
            .ok_or(TokenError::NotFound)?;

        self.store
            .user_by_id(token.user_id)
            .await?
            .ok_or_else(|| TokenError::NotFound.into())
    }

    /// Validates a reset token and resolves its owner without consuming it.
    pub async fn redeem_reset(&self, value: &str) -> Result<User, AppError> {
        let token = self
            .store
            .token_by_value(value, SecretTokenKind::PasswordReset)
            .await?
            .ok_or(TokenError::NotFound)?;

        if token.is_expired() {
            return Err(TokenError::Expired.into());
        }
        if token.used {
            return Err(TokenError::AlreadyUsed.into());
        }

        self.store
            .user_by_id(token.user_id)
            .await?
            .ok_or_else(|| TokenError::NotFound.into())
    }

    /// Marks a reset token used. Exactly one of any set of racing callers
    /// succeeds; the rest observe `AlreadyUsed`.
    pub async fn consume_reset(&self, value: &str) -> Result<(), AppError> {
        if self.store.mark_token_used(value).await? {
            Ok(())
        } else {
            Err(TokenError::AlreadyUsed.into())
        }
    }
}
