use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use aegis_server::auth::handlers::{
    forgot_password, login, profile, register, reset_password, verify_email,
};
use aegis_server::{health_check, AppError, AppState, AuthenticationGate, Settings};
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> aegis_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    info!(
        "Starting server at {}:{}",
        config.server.host, config.server.port
    );

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    let state = web::Data::new(state);

    // Periodically sweep expired secret tokens out of storage
    let purge_state = state.clone();
    tokio::spawn(async move {
        loop {
            match purge_state.auth.purge_expired_tokens().await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {} expired secret tokens", purged),
                Err(e) => warn!("Secret token purge failed: {}", e),
            }

            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    });

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;

    // Start HTTP server
    HttpServer::new(move || {
        let gate = AuthenticationGate::new(state.codec.clone(), state.config.auth.strict_gate);

        App::new()
            .wrap(Cors::permissive())
            .wrap(gate)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/verify-email", web::get().to(verify_email))
                    .route("/forgot-password", web::post().to(forgot_password))
                    .route("/reset-password", web::post().to(reset_password)),
            )
            .service(web::scope("/api/user").route("/profile", web::get().to(profile)))
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(())
}
