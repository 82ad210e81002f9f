use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::auth::middleware::AuthenticatedUser;
use crate::db::models::Role;
use crate::db::IdentityStore;
use crate::error::AppError;
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub last_login: Option<chrono::DateTime<chrono::Utc>>,
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for username: {}", req.username);

    if req.username.trim().is_empty() {
        return Err(AppError::Validation("username must not be empty".into()));
    }
    if !req.email.contains('@') {
        return Err(AppError::Validation("email address is not valid".into()));
    }
    validate_password(&req.password)?;

    match state
        .auth
        .register(&req.username, &req.email, &req.password)
        .await
    {
        Ok(_) => {
            info!("Registration successful for username: {}", req.username);
            Ok(HttpResponse::Created().json(ApiResponse {
                success: true,
                message:
                    "User registered successfully. Please check your email to verify your account."
                        .to_string(),
            }))
        }
        Err(e) => {
            error!("Registration failed for username: {}: {}", req.username, e);
            Err(e)
        }
    }
}

pub async fn verify_email(
    query: web::Query<VerifyEmailQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    match state.auth.verify_email(&query.token).await {
        Ok(user) => {
            info!("Email verified for username: {}", user.username);
            Ok(HttpResponse::Ok().json(ApiResponse {
                success: true,
                message: "Email verified successfully!".to_string(),
            }))
        }
        Err(e) => {
            error!("Email verification failed: {}", e);
            Err(e)
        }
    }
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for username: {}", req.username);
    match state.auth.login(&req.username, &req.password).await {
        Ok((token, user)) => {
            info!("Login successful for username: {}", req.username);
            Ok(HttpResponse::Ok().json(AuthResponse {
                token,
                username: user.username,
                email: user.email,
                role: user.role,
            }))
        }
        Err(e) => {
            error!("Login failed for username: {}: {}", req.username, e);
            Err(e)
        }
    }
}

pub async fn forgot_password(
    req: web::Json<ForgotPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received forgot-password request for email: {}", req.email);
    match state.auth.forgot_password(&req.email).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse {
            success: true,
            message: "Password reset email sent successfully!".to_string(),
        })),
        Err(e) => {
            error!("Forgot-password failed for email: {}: {}", req.email, e);
            Err(e)
        }
    }
}

pub async fn reset_password(
    req: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    validate_password(&req.password)?;

    match state.auth.reset_password(&req.token, &req.password).await {
        Ok(()) => {
            info!("Password reset completed");
            Ok(HttpResponse::Ok().json(ApiResponse {
                success: true,
                message: "Password reset successfully!".to_string(),
            }))
        }
        Err(e) => {
            error!("Password reset failed: {}", e);
            Err(e)
        }
    }
}

pub async fn profile(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let record = state
        .store
        .user_by_username(&user.username)
        .await?
        .ok_or(AppError::UserNotFound)?;

    Ok(HttpResponse::Ok().json(ProfileResponse {
        username: record.username,
        email: record.email,
        role: record.role,
        last_login: record.last_login,
    }))
}
