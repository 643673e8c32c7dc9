// Main entry point for Authgate

use authgate::api::{create_router, AppState};
use authgate::audit::logger::{AuditLogger, AuditSink};
use authgate::audit::masker::AuditMasker;
use authgate::auth::commands::{
    ForgetPassword, LoginUser, LogoutUser, RegisterUser, ResetPassword, UpdatePassword, VerifyEmail,
};
use authgate::auth::handlers::{
    ForgetPasswordHandler, LoginHandler, LogoutHandler, RegisterHandler, ResetPasswordHandler,
    UpdatePasswordHandler, VerifyEmailHandler,
};
use authgate::auth::password::{Argon2PasswordHasher, PasswordHasher};
use authgate::auth::permissions::{PermissionSource, StaticPermissionSource};
use authgate::auth::reset::{LogResetNotifier, MemoryResetBroker, ResetBroker, ResetNotifier};
use authgate::auth::user_store::{DbUserStore, MemoryUserStore, UserStore};
use authgate::bus::middleware::LoggingMiddleware;
use authgate::bus::CommandBus;
use authgate::config::Config;
use authgate::token::rotation::TokenRotationGuard;
use authgate::token::store::{DbTokenStore, MemoryTokenStore, TokenStore};

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load and validate configuration first (before any logging)
    let config = Config::from_env().map_err(|e| -> Box<dyn std::error::Error> {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    })?;

    // 2. Initialize tracing subscriber with config values
    // Must be done only once - tracing panics if init() is called multiple times
    init_tracing(&config)?;

    info!("Starting Authgate");

    info!(
        bind_address = %config.bind_address,
        port = config.port,
        "Configuration loaded"
    );

    // 3. Initialize database pool (if configured)
    let db_pool: Option<Arc<sqlx::PgPool>> = if let Some(ref database_url) = config.database_url {
        Some(Arc::new(
            sqlx::PgPool::connect(database_url)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to database");
                    e
                })?,
        ))
    } else {
        None
    };

    if db_pool.is_some() {
        info!("Database pool initialized");
    }

    // 4. Initialize user store (DB, seeded memory, or empty memory)
    let users: Arc<dyn UserStore> = if let Some(ref pool) = db_pool {
        Arc::new(DbUserStore::new((**pool).clone()))
    } else if let Some(ref seed_path) = config.users_seed_path {
        Arc::new(
            MemoryUserStore::from_seed_file(seed_path).map_err(|e| {
                error!(error = %e, path = ?seed_path, "Failed to load seed users");
                e
            })?,
        )
    } else {
        Arc::new(MemoryUserStore::new())
    };

    info!("User store initialized");

    // 5. Initialize token store (DB or memory)
    let tokens: Arc<dyn TokenStore> = if let Some(ref pool) = db_pool {
        Arc::new(DbTokenStore::new((**pool).clone()))
    } else {
        Arc::new(MemoryTokenStore::new())
    };

    info!("Token store initialized");

    // 6. Initialize password hasher and permission source
    let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2PasswordHasher::default());
    let permissions: Arc<dyn PermissionSource> = Arc::new(StaticPermissionSource);

    // 7. Initialize reset broker and notifier
    let broker: Arc<dyn ResetBroker> = Arc::new(MemoryResetBroker::new(
        chrono::Duration::seconds(config.reset_token_ttl_secs as i64),
        chrono::Duration::seconds(config.reset_throttle_secs as i64),
    ));
    let notifier: Arc<dyn ResetNotifier> = Arc::new(LogResetNotifier);

    info!("Reset broker initialized");

    // 8. Initialize audit sink and masker
    let sink: Arc<dyn AuditSink> = Arc::new(AuditLogger::new(db_pool.clone()));
    let masker = AuditMasker::new();

    info!("Audit logger initialized");

    // 9. Build the command bus
    let token_ttl = chrono::Duration::seconds(config.token_ttl_secs as i64);
    let bus = Arc::new(
        CommandBus::builder()
            .middleware(Arc::new(LoggingMiddleware::new(masker, sink.clone())))
            .register::<RegisterUser, _>(Arc::new(RegisterHandler::new(
                users.clone(),
                tokens.clone(),
                hasher.clone(),
            )))
            .register::<LoginUser, _>(Arc::new(LoginHandler::new(
                users.clone(),
                tokens.clone(),
                hasher.clone(),
                permissions.clone(),
                token_ttl,
            )))
            .register::<LogoutUser, _>(Arc::new(LogoutHandler::new(tokens.clone())))
            .register::<VerifyEmail, _>(Arc::new(VerifyEmailHandler::new(users.clone())))
            .register::<ForgetPassword, _>(Arc::new(ForgetPasswordHandler::new(
                users.clone(),
                broker.clone(),
                notifier,
            )))
            .register::<ResetPassword, _>(Arc::new(ResetPasswordHandler::new(
                users.clone(),
                broker,
                hasher.clone(),
            )))
            .register::<UpdatePassword, _>(Arc::new(UpdatePasswordHandler::new(
                users.clone(),
                hasher,
            )))
            .build(),
    );

    info!("Command bus initialized");

    // 10. Initialize the rotation guard
    let guard = Arc::new(TokenRotationGuard::new(
        tokens,
        users.clone(),
        permissions,
        sink,
        token_ttl,
    ));

    info!("Rotation guard initialized");

    // 11. Create AppState
    let app_state = AppState {
        bus,
        users,
        guard,
        db_pool,
        config: Arc::new(config.clone()),
    };

    // 12. Create router
    let router = create_router(&app_state).with_state(app_state);

    info!("Router created");

    // 13. Start HTTP server
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %addr, "Failed to bind to address");
            e
        })?;

    info!(addr = %addr, "Server listening on {}", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let level = parse_log_level(&config.log_level)?;

    // RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<tracing::Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(format!("Invalid log level: {}", level)),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
