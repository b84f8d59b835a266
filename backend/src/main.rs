//! Opportunity Hub Backend
//!
//! REST backend for an opportunity-listing site with SQLite persistence,
//! Tantivy full-text search, a WebSocket change feed, scheduled expiry and
//! bulk email functions.

mod api;
mod auth;
mod config;
mod db;
mod email;
mod errors;
mod expiry;
mod models;
mod realtime;
mod search;
mod shutdown;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, LogFormat};
use db::Repository;
use email::Mailers;
use realtime::ChangeFeed;
use search::SearchIndex;
use shutdown::ShutdownCoordinator;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
    pub feed: ChangeFeed,
    pub mailers: Mailers,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting Opportunity Hub Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.service_key.is_none() {
        tracing::warn!("No service key configured (HUB_SERVICE_KEY). Function endpoints are open!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let interrupted = repo.fail_interrupted_campaigns().await?;
    if interrupted > 0 {
        tracing::warn!("Marked {} interrupted email campaigns as failed", interrupted);
    }

    // Initialize search index from the database
    let search = Arc::new(SearchIndex::open(&config.index_path)?);
    tracing::info!("Building search index...");
    let opportunities = repo.list_all_opportunities().await?;
    search.rebuild(&opportunities).await?;

    let state = AppState {
        repo,
        search,
        feed: ChangeFeed::new(config.realtime_capacity),
        mailers: Mailers::from_config(&config.email)?,
        config: Arc::new(config.clone()),
    };

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let sweeper = config
        .expire_sweep_interval
        .map(|period| expiry::spawn_scheduler(state.clone(), period, shutdown.subscribe()));

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_signal().await })
        .await?;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            tracing::warn!("Expiry scheduler ended abnormally: {}", e);
        }
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone the service key for the function layer
    let service_key = state.config.service_key.clone();

    // API routes; per-route auth comes from the extractors
    let api_routes = Router::new()
        // Accounts
        .route("/auth/signup", post(api::sign_up))
        .route("/auth/signin", post(api::sign_in))
        .route("/auth/signout", post(api::sign_out))
        .route("/auth/session", get(api::get_session))
        .route("/profile", get(api::get_profile).put(api::update_profile))
        // Opportunities
        .route(
            "/opportunities",
            get(api::list_opportunities).post(api::create_opportunity),
        )
        .route(
            "/opportunities/{id}",
            get(api::get_opportunity)
                .put(api::update_opportunity)
                .delete(api::delete_opportunity),
        )
        .route("/opportunities/{id}/view", post(api::record_view))
        .route("/opportunities/{id}/apply", post(api::record_application))
        .route("/me/opportunities", get(api::list_my_opportunities))
        // Bookmarks
        .route("/bookmarks", get(api::list_bookmarks))
        .route(
            "/bookmarks/{opportunity_id}",
            put(api::add_bookmark).delete(api::remove_bookmark),
        )
        .route("/bookmarks/{opportunity_id}/toggle", post(api::toggle_bookmark))
        // Notifications
        .route("/notifications", get(api::list_notifications))
        .route("/notifications/unread-count", get(api::unread_count))
        .route("/notifications/read-all", post(api::mark_all_notifications_read))
        .route("/notifications/{id}", delete(api::delete_notification))
        .route("/notifications/{id}/read", post(api::mark_notification_read))
        // Moderation
        .route("/moderation/opportunities", get(api::list_moderation_queue))
        .route(
            "/moderation/opportunities/{id}/approve",
            post(api::approve_opportunity),
        )
        .route(
            "/moderation/opportunities/{id}/reject",
            post(api::reject_opportunity),
        )
        .route(
            "/moderation/opportunities/{id}/feature",
            put(api::feature_opportunity),
        )
        // Ads
        .route("/ads", get(api::list_my_ads).post(api::create_ad))
        .route("/ads/active", get(api::list_active_ads))
        .route("/ads/{id}", put(api::update_ad).delete(api::delete_ad))
        .route("/ads/{id}/metrics", get(api::ad_metrics))
        .route("/ads/{id}/pause", post(api::pause_ad))
        .route("/ads/{id}/resume", post(api::resume_ad))
        .route("/ads/{id}/impression", post(api::record_impression))
        .route("/ads/{id}/click", post(api::record_click))
        // Admin
        .route("/admin/users", get(api::list_users))
        .route("/admin/users/{id}", delete(api::delete_user))
        .route("/admin/users/{id}/roles", put(api::update_user_roles))
        .route("/admin/stats", get(api::admin_stats))
        .route("/admin/ads", get(api::list_all_ads))
        .route("/admin/ads/{id}/approve", post(api::approve_ad))
        .route("/admin/ads/{id}/reject", post(api::reject_ad))
        .route(
            "/admin/notifications/broadcast",
            post(api::broadcast_notification),
        )
        .route("/admin/campaigns", get(api::list_campaigns))
        .route("/admin/campaigns/{id}", get(api::get_campaign));

    // Function endpoints behind the service key
    let function_routes = Router::new()
        .route("/expire-opportunities", post(api::expire_opportunities))
        .route("/send-bulk-email", post(api::send_bulk_email))
        .route("/send-smtp-email", post(api::send_smtp_email))
        .layer(middleware::from_fn(move |req, next| {
            auth::service_key_layer(service_key.clone(), req, next)
        }));

    // Realtime and health check (no service key)
    let open_routes = Router::new()
        .route("/realtime", get(realtime::realtime_handler))
        .route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .nest("/functions", function_routes)
        .merge(open_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
