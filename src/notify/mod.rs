//! Outbound notification sink. Delivery is best-effort: the lifecycle
//! dispatches from a spawned task and only logs failures.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::NotificationConfig;
use crate::error::AppError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email_verification(&self, to: &str, token: &str) -> Result<(), AppError>;

    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), AppError>;
}

fn verification_link(base_url: &str, token: &str) -> String {
    format!("{}/verify-email?token={}", base_url, token)
}

fn reset_link(base_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", base_url, token)
}

/// SMTP sink built on lettre. The blocking transport runs on the runtime's
/// blocking pool.
pub struct SmtpNotifier {
    host: String,
    port: u16,
    username: String,
    password: String,
    from_address: String,
    base_url: String,
}

impl SmtpNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            username: config.smtp_username.clone(),
            password: config.smtp_password.clone(),
            from_address: config.from_address.clone(),
            base_url: config.base_url.clone(),
        }
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), AppError> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = Credentials::new(self.username.clone(), self.password.clone());
        let from = self.from_address.clone();
        let to = to.to_string();
        let subject = subject.to_string();

        tokio::task::spawn_blocking(move || {
            let email = Message::builder()
                .from(
                    from.parse()
                        .map_err(|e| AppError::Internal(format!("invalid from address: {}", e)))?,
                )
                .to(to
                    .parse()
                    .map_err(|e| AppError::Internal(format!("invalid to address: {}", e)))?)
                .subject(subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body)
                .map_err(|e| AppError::Internal(format!("failed to build email: {}", e)))?;

            let mailer = SmtpTransport::relay(&host)
                .map_err(|e| AppError::Internal(format!("failed to create SMTP transport: {}", e)))?
                .credentials(credentials)
                .port(port)
                .timeout(Some(std::time::Duration::from_secs(10)))
                .build();

            mailer
                .send(&email)
                .map(|_| ())
                .map_err(|e| AppError::Internal(format!("failed to send email: {}", e)))
        })
        .await
        .map_err(|e| AppError::Internal(format!("mail task failed: {}", e)))?
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_email_verification(&self, to: &str, token: &str) -> Result<(), AppError> {
        let link = verification_link(&self.base_url, token);
        self.send(
            to,
            "Email Verification",
            format!(
                "Please click the following link to verify your email: {}",
                link
            ),
        )
        .await
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), AppError> {
        let link = reset_link(&self.base_url, token);
        self.send(
            to,
            "Password Reset",
            format!(
                "Please click the following link to reset your password: {}",
                link
            ),
        )
        .await
    }
}

/// Development sink: logs the links instead of delivering them.
pub struct LogNotifier {
    base_url: String,
}

impl LogNotifier {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email_verification(&self, to: &str, token: &str) -> Result<(), AppError> {
        info!(
            %to,
            link = %verification_link(&self.base_url, token),
            "verification email (log sink)"
        );
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), AppError> {
        info!(
            %to,
            link = %reset_link(&self.base_url, token),
            "password reset email (log sink)"
        );
        Ok(())
    }
}
