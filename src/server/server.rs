use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::HeaderValue, routing::get};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::auth;
use super::db::{CadDb, DbHandle};
use crate::config::Settings;
use crate::interpreter::Interpreter;

const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Build the full application router: service routes at the root, the API
/// under `settings.api_prefix`.
pub fn build_router(state: SharedState) -> Result<Router> {
    let cors = cors_layer(&state.settings.cors_origins)?;
    let prefix = normalize_prefix(&state.settings.api_prefix);

    let router = Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health_check));
    let router = match prefix {
        Some(prefix) => router.nest(&prefix, api::api_router()),
        None => router.merge(api::api_router()),
    };

    Ok(router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// `None` when the API is mounted at the root.
fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{}", trimmed))
    }
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin: {}", o))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

/// Open the database, run migrations, drop expired tokens and seed the
/// default data when configured to.
pub async fn open_database(settings: &Settings) -> Result<DbHandle> {
    if let Some(parent) = settings.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db = CadDb::new(&settings.db_path).context("Failed to initialize database")?;
    let db = DbHandle::new(db);

    let purged = db.call(|db| db.delete_expired_tokens()).await?;
    if purged > 0 {
        tracing::debug!(purged, "Removed expired access tokens");
    }
    if settings.seed_defaults {
        seed_defaults(&db).await?;
    }
    Ok(db)
}

/// Create the admin user, a default project and its layer on an empty database.
pub async fn seed_defaults(db: &DbHandle) -> Result<bool> {
    if db.call(|db| db.count_users()).await? > 0 {
        return Ok(false);
    }
    let hash = auth::hash_password_blocking(DEFAULT_ADMIN_PASSWORD.to_string()).await?;
    let seeded = db.call(move |db| db.seed_defaults(&hash)).await?;
    if seeded {
        tracing::warn!(
            username = "admin",
            "Created default superuser with password 'admin'; change it before exposing the server"
        );
    }
    Ok(seeded)
}

/// Start the API server and run until Ctrl+C.
pub async fn start_server(settings: Settings) -> Result<()> {
    let db = open_database(&settings).await?;
    let addr = settings.bind_addr();
    let state = Arc::new(AppState {
        db,
        interpreter: Interpreter::default(),
        settings,
    });
    tracing::debug!(templates = ?state.interpreter.template_names(), "Command templates loaded");

    let app = build_router(state.clone())?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        api_prefix = %state.settings.api_prefix,
        "CAD-NLP API running at http://{}",
        local_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
