//! Lifecycle tests driving registration, verification, login and the
//! password reset flows end to end against the in-memory store.

mod common;

use aegis_server::db::models::SecretTokenKind;
use aegis_server::error::{AppError, AuthError, DuplicateError, TokenError};

use common::{build_state, MailKind};

#[tokio::test]
async fn test_register_verify_login_scenario() {
    let (state, store, _notifier) = build_state();

    // Registration creates a disabled user and one verification token.
    let user = state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();
    assert!(!user.enabled);
    assert_eq!(store.user_count().await, 1);
    assert_eq!(store.token_count().await, 1);

    let verification = store
        .token_for_user(user.id, SecretTokenKind::EmailVerification)
        .await
        .expect("verification token should exist");

    // Login before verification is rejected.
    let err = state
        .auth
        .login("alice", "secret-pass-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Auth(AuthError::AccountDisabled)));

    // Redeeming the token enables the account and deletes the token.
    let verified = state.auth.verify_email(&verification.value).await.unwrap();
    assert!(verified.enabled);
    assert_eq!(store.token_count().await, 0);

    // Login now succeeds and the session token carries the subject.
    let (token, user) = state.auth.login("alice", "secret-pass-1").await.unwrap();
    assert_eq!(user.username, "alice");
    assert!(user.last_login.is_some());
    assert_eq!(state.codec.verify(&token).unwrap(), "alice");
}

#[tokio::test]
async fn test_verification_token_single_use() {
    let (state, store, _notifier) = build_state();

    let user = state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();
    let verification = store
        .token_for_user(user.id, SecretTokenKind::EmailVerification)
        .await
        .unwrap();

    state.auth.verify_email(&verification.value).await.unwrap();

    let err = state
        .auth
        .verify_email(&verification.value)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Token(TokenError::NotFound)));
}

#[tokio::test]
async fn test_login_failures_are_uniform() {
    let (state, store, _notifier) = build_state();

    let user = state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();
    let verification = store
        .token_for_user(user.id, SecretTokenKind::EmailVerification)
        .await
        .unwrap();
    state.auth.verify_email(&verification.value).await.unwrap();

    let wrong_password = state.auth.login("alice", "wrong-pass").await.unwrap_err();
    let unknown_user = state.auth.login("mallory", "wrong-pass").await.unwrap_err();

    assert!(matches!(
        wrong_password,
        AppError::Auth(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        unknown_user,
        AppError::Auth(AuthError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_duplicate_registration_leaves_no_orphans() {
    let (state, store, _notifier) = build_state();

    state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();

    let err = state
        .auth
        .register("alice", "other@x.com", "secret-pass-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Duplicate(DuplicateError::UsernameTaken)
    ));

    let err = state
        .auth
        .register("bob", "alice@x.com", "secret-pass-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Duplicate(DuplicateError::EmailTaken)
    ));

    // No user or token state from the failed attempts.
    assert_eq!(store.user_count().await, 1);
    assert_eq!(store.token_count().await, 1);
}

#[tokio::test]
async fn test_forgot_password_replaces_outstanding_token() {
    let (state, store, _notifier) = build_state();

    let user = state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();

    state.auth.forgot_password("alice@x.com").await.unwrap();
    let first = store
        .token_for_user(user.id, SecretTokenKind::PasswordReset)
        .await
        .unwrap();

    state.auth.forgot_password("alice@x.com").await.unwrap();
    let second = store
        .token_for_user(user.id, SecretTokenKind::PasswordReset)
        .await
        .unwrap();
    assert_ne!(first.value, second.value);

    // The replaced token no longer redeems.
    let err = state
        .auth
        .reset_password(&first.value, "new-secret-pass")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Token(TokenError::NotFound)));

    // The replacement does.
    state
        .auth
        .reset_password(&second.value, "new-secret-pass")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_forgot_password_unknown_email() {
    let (state, _store, _notifier) = build_state();
    let err = state
        .auth
        .forgot_password("nobody@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound));
}

#[tokio::test]
async fn test_reset_password_rotates_credentials_once() {
    let (state, store, _notifier) = build_state();

    let user = state
        .auth
        .register("alice", "alice@x.com", "old-secret-pass")
        .await
        .unwrap();
    let verification = store
        .token_for_user(user.id, SecretTokenKind::EmailVerification)
        .await
        .unwrap();
    state.auth.verify_email(&verification.value).await.unwrap();

    state.auth.forgot_password("alice@x.com").await.unwrap();
    let reset = store
        .token_for_user(user.id, SecretTokenKind::PasswordReset)
        .await
        .unwrap();

    state
        .auth
        .reset_password(&reset.value, "new-secret-pass")
        .await
        .unwrap();

    // Old password no longer authenticates; the new one does.
    let err = state.auth.login("alice", "old-secret-pass").await.unwrap_err();
    assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials)));
    state.auth.login("alice", "new-secret-pass").await.unwrap();

    // The token is spent.
    let err = state
        .auth
        .reset_password(&reset.value, "another-secret")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Token(TokenError::AlreadyUsed)));

    // Spent reset tokens are kept as history rather than deleted.
    let spent = store
        .token_for_user(user.id, SecretTokenKind::PasswordReset)
        .await
        .unwrap();
    assert!(spent.used);
}

#[tokio::test]
async fn test_notifications_dispatched() {
    let (state, _store, notifier) = build_state();

    state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();
    state.auth.forgot_password("alice@x.com").await.unwrap();

    // Dispatch is decoupled from the triggering call; wait for the spawned
    // tasks to land.
    let mut mails = Vec::new();
    for _ in 0..100 {
        mails = notifier.sent.lock().await.clone();
        if mails.len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(mails.len(), 2);
    assert!(mails
        .iter()
        .any(|m| m.kind == MailKind::Verification && m.to == "alice@x.com"));
    assert!(mails
        .iter()
        .any(|m| m.kind == MailKind::Reset && m.to == "alice@x.com"));
}

#[tokio::test]
async fn test_external_login_requires_enabled_account() {
    let (state, store, _notifier) = build_state();

    let user = state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();

    // Unknown address.
    let err = state.auth.login_external("nobody@x.com").await.unwrap_err();
    assert!(matches!(err, AppError::UserNotFound));

    // Known but not yet verified.
    let err = state.auth.login_external("alice@x.com").await.unwrap_err();
    assert!(matches!(err, AppError::Auth(AuthError::AccountDisabled)));

    let verification = store
        .token_for_user(user.id, SecretTokenKind::EmailVerification)
        .await
        .unwrap();
    state.auth.verify_email(&verification.value).await.unwrap();

    let (token, user) = state.auth.login_external("alice@x.com").await.unwrap();
    assert_eq!(user.username, "alice");
    assert_eq!(state.codec.verify(&token).unwrap(), "alice");
}

#[tokio::test]
async fn test_concurrent_verification_redemption_single_winner() {
    let (state, store, _notifier) = build_state();

    let user = state
        .auth
        .register("alice", "alice@x.com", "secret-pass-1")
        .await
        .unwrap();
    let verification = store
        .token_for_user(user.id, SecretTokenKind::EmailVerification)
        .await
        .unwrap();

    let state_a = state.clone();
    let state_b = state.clone();
    let value_a = verification.value.clone();
    let value_b = verification.value.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { state_a.auth.verify_email(&value_a).await }),
        tokio::spawn(async move { state_b.auth.verify_email(&value_b).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::Token(TokenError::NotFound))))
        .count();
    assert_eq!(losers, 1);
}
