use std::sync::Arc;

use chrono::Duration;
use tracing::warn;

use crate::auth::credentials::CredentialVerifier;
use crate::auth::password;
use crate::auth::secret::SecretTokenStore;
use crate::auth::token::TokenCodec;
use crate::db::models::{SecretTokenKind, User};
use crate::db::IdentityStore;
use crate::error::{AppError, AuthError, DuplicateError};
use crate::notify::Notifier;

/// Account lifecycle orchestration: registration, email verification, login
/// and the forgot/reset-password flows.
///
/// Collaborators are injected at construction and assembled once at process
/// startup. Notification dispatch runs on a spawned task so a slow or
/// unavailable mail sink never stalls the triggering operation.
pub struct AuthService {
    store: Arc<dyn IdentityStore>,
    secret_tokens: SecretTokenStore,
    credentials: CredentialVerifier,
    codec: Arc<TokenCodec>,
    notifier: Arc<dyn Notifier>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        notifier: Arc<dyn Notifier>,
        codec: Arc<TokenCodec>,
        secret_token_ttl: Duration,
    ) -> Result<Self, AppError> {
        let secret_tokens = SecretTokenStore::new(store.clone(), secret_token_ttl);
        let credentials = CredentialVerifier::new(store.clone())?;
        Ok(Self {
            store,
            secret_tokens,
            credentials,
            codec,
            notifier,
        })
    }

    /// Creates a disabled account and its email-verification token in one
    /// transaction, then dispatches the verification mail.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        plaintext: &str,
    ) -> Result<User, AppError> {
        if self.store.user_by_username(username).await?.is_some() {
            return Err(DuplicateError::UsernameTaken.into());
        }
        if self.store.user_by_email(email).await?.is_some() {
            return Err(DuplicateError::EmailTaken.into());
        }

        let password_hash = password::hash(plaintext)?;
        let user = User::new(username.to_string(), email.to_string(), password_hash);
        let verification = self
            .secret_tokens
            .mint(user.id, SecretTokenKind::EmailVerification);

        // A concurrent registration that slipped past the existence checks
        // loses on the unique index and reports the same duplicate error.
        let user = self.store.create_user(&user, &verification).await?;

        self.dispatch_verification(user.email.clone(), verification.value);

        Ok(user)
    }

    /// Redeems a verification token and enables the account. Redemption
    /// consumes the token, so a second attempt fails `NotFound`.
    pub async fn verify_email(&self, token: &str) -> Result<User, AppError> {
        let mut user = self.secret_tokens.redeem_verification(token).await?;
        self.store.enable_user(user.id).await?;
        user.enabled = true;
        Ok(user)
    }

    /// Authenticates and issues a session token.
    pub async fn login(&self, username: &str, plaintext: &str) -> Result<(String, User), AppError> {
        let user = self.credentials.authenticate(username, plaintext).await?;
        self.store.touch_last_login(user.id).await?;
        let token = self.codec.issue(&user.username)?;
        Ok((token, user))
    }

    /// Issues a session token for an account whose email address an external
    /// identity provider has already verified.
    pub async fn login_external(&self, email: &str) -> Result<(String, User), AppError> {
        let user = self
            .store
            .user_by_email(email)
            .await?
            .ok_or(AppError::UserNotFound)?;
        if !user.enabled {
            return Err(AuthError::AccountDisabled.into());
        }
        self.store.touch_last_login(user.id).await?;
        let token = self.codec.issue(&user.username)?;
        Ok((token, user))
    }

    /// Issues a reset token for the account behind `email`, replacing any
    /// outstanding one, and dispatches the reset mail. Unlike login, this
    /// flow reports an unknown address: it exists to find an account.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        let user = self
            .store
            .user_by_email(email)
            .await?
            .ok_or(AppError::UserNotFound)?;

        let token = self.secret_tokens.issue_reset(user.id).await?;
        self.dispatch_reset(user.email, token.value);

        Ok(())
    }

    /// Redeems a reset token and rotates the password. The token is marked
    /// used afterwards; of concurrent redeemers exactly one gets a success
    /// response.
    pub async fn reset_password(&self, token: &str, new_plaintext: &str) -> Result<(), AppError> {
        let user = self.secret_tokens.redeem_reset(token).await?;
        let password_hash = password::hash(new_plaintext)?;
        self.store.update_password(user.id, &password_hash).await?;
        self.secret_tokens.consume_reset(token).await?;
        Ok(())
    }

    /// Maintenance sweep for the background purge job.
    pub async fn purge_expired_tokens(&self) -> Result<u64, AppError> {
        self.store.purge_expired_tokens().await
    }

    fn dispatch_verification(&self, email: String, token: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(err) = notifier.send_email_verification(&email, &token).await {
                warn!(%email, error = %err, "failed to deliver verification email");
            }
        });
    }

    fn dispatch_reset(&self, email: String, token: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(err) = notifier.send_password_reset(&email, &token).await {
                warn!(%email, error = %err, "failed to deliver password reset email");
            }
        });
    }
}
