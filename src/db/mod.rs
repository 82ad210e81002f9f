//! Persistence layer: the `IdentityStore` contract plus its Postgres and
//! in-memory implementations.

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use models::{Role, SecretToken, SecretTokenKind, User};
pub use postgres::PgStore;

use crate::error::AppError;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage contract shared by the user and secret-token records.
///
/// Every method is an atomic unit: concurrent callers racing on the same row
/// resolve to exactly one winner (unique constraints, delete-returning, or a
/// compare-and-swap on the used flag).
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Persists a new disabled user together with its email-verification
    /// token; both rows commit or neither does.
    async fn create_user(&self, user: &User, verification: &SecretToken)
        -> Result<User, AppError>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn enable_user(&self, id: Uuid) -> Result<(), AppError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AppError>;

    async fn touch_last_login(&self, id: Uuid) -> Result<(), AppError>;

    async fn token_by_value(
        &self,
        value: &str,
        kind: SecretTokenKind,
    ) -> Result<Option<SecretToken>, AppError>;

    /// Removes a token by value; returns the removed record. Of two racing
    /// callers exactly one observes `Some`.
    async fn remove_token(
        &self,
        value: &str,
        kind: SecretTokenKind,
    ) -> Result<Option<SecretToken>, AppError>;

    /// Deletes the user's unconsumed reset tokens and inserts the
    /// replacement in one atomic step.
    async fn replace_reset_token(&self, token: &SecretToken) -> Result<(), AppError>;

    /// Flips `used` from false to true; returns whether this caller won the
    /// flip.
    async fn mark_token_used(&self, value: &str) -> Result<bool, AppError>;

    /// Maintenance sweep; returns the number of tokens removed.
    async fn purge_expired_tokens(&self) -> Result<u64, AppError>;
}
