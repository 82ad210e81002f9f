#![allow(dead_code)]

use std::sync::Arc;

use aegis_server::config::{
    AuthConfig, DatabaseConfig, NotificationConfig, ServerConfig, Settings,
};
use aegis_server::error::AppError;
use aegis_server::notify::Notifier;
use aegis_server::{AppState, MemoryStore};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailKind {
    Verification,
    Reset,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub token: String,
    pub kind: MailKind,
}

/// Notification sink that records what would have been delivered.
#[derive(Default)]
pub struct CaptureNotifier {
    pub sent: Mutex<Vec<SentMail>>,
}

impl CaptureNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl Notifier for CaptureNotifier {
    async fn send_email_verification(&self, to: &str, token: &str) -> Result<(), AppError> {
        self.sent.lock().await.push(SentMail {
            to: to.to_string(),
            token: token.to_string(),
            kind: MailKind::Verification,
        });
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), AppError> {
        self.sent.lock().await.push(SentMail {
            to: to.to_string(),
            token: token.to_string(),
            kind: MailKind::Reset,
        });
        Ok(())
    }
}

pub fn test_settings() -> Settings {
    Settings {
        environment: "test".to_string(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: 1,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
        },
        auth: AuthConfig {
            jwt_secret: "test_secret".to_string(),
            token_expiry_hours: 1,
            secret_token_expiry_hours: 24,
            strict_gate: false,
        },
        notification: NotificationConfig {
            base_url: "http://localhost:3000".to_string(),
            from_address: "no-reply@test".to_string(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
        },
    }
}

/// Builds an application state over a fresh in-memory store, returning the
/// concrete store and sink so tests can inspect them.
pub fn build_state() -> (AppState, Arc<MemoryStore>, Arc<CaptureNotifier>) {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(CaptureNotifier::new());
    let state = AppState::with_store(test_settings(), store.clone(), notifier.clone())
        .expect("failed to assemble test state");
    (state, store, notifier)
}
