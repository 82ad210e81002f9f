pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use actix_web::HttpResponse;
use chrono::Duration;

pub use config::Settings;
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

pub use auth::{AuthService, AuthenticatedUser, AuthenticationGate, TokenCodec};
pub use db::{IdentityStore, MemoryStore, PgStore};
pub use notify::{LogNotifier, Notifier, SmtpNotifier};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn IdentityStore>,
    pub auth: Arc<AuthService>,
    pub codec: Arc<TokenCodec>,
}

impl AppState {
    /// Connects to Postgres, runs migrations and assembles the dependency
    /// graph for production use.
    pub async fn new(config: Settings) -> Result<Self> {
        let store = PgStore::connect(
            &config.database.url,
            config.database.max_connections,
            StdDuration::from_secs(5),
        )
        .await?;
        store.migrate().await?;

        let notifier: Arc<dyn Notifier> = if config.notification.smtp_host.is_empty() {
            Arc::new(LogNotifier::new(config.notification.base_url.clone()))
        } else {
            Arc::new(SmtpNotifier::new(&config.notification))
        };

        Self::with_store(config, Arc::new(store), notifier)
    }

    /// Assembles the dependency graph over any store and notification sink.
    /// The test suites run against the in-memory store through this.
    pub fn with_store(
        config: Settings,
        store: Arc<dyn IdentityStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let codec = Arc::new(TokenCodec::new(
            &config.auth.jwt_secret,
            Duration::hours(config.auth.token_expiry_hours),
        ));
        let auth = Arc::new(AuthService::new(
            store.clone(),
            notifier,
            codec.clone(),
            Duration::hours(config.auth.secret_token_expiry_hours),
        )?);

        Ok(Self {
            config: Arc::new(config),
            store,
            auth,
            codec,
        })
    }
}
