use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vedfolnir_common::Config;
use vedfolnir_scheduler::{decode_encryption_key, Scheduler};
use vedfolnir_store::{CredentialCipher, Store};

mod auth;
mod error;
mod progress;
mod rest;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vedfolnir=info".parse()?))
        .init();

    let config = Config::api_from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(config.session.max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Store::new(pool);
    store.migrate().await?;

    let key = decode_encryption_key(&config.credential_encryption_key)?;
    let cipher = CredentialCipher::new(&key)?;

    let scheduler = Scheduler::new(config.clone(), store.clone()).await?;

    let jwt_secret = std::env::var("JWT_SECRET").expect("missing required environment variable: JWT_SECRET");

    let state = Arc::new(AppState {
        store,
        scheduler,
        cipher,
        config: config.clone(),
        jwt_secret,
        connection_attempts: Mutex::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/api/tasks", post(rest::tasks::enqueue))
        .route("/api/tasks/{id}", get(rest::tasks::status))
        .route("/api/tasks/{id}/cancel", post(rest::tasks::cancel))
        .route("/api/tasks/{id}/results", get(rest::tasks::results))
        .route("/api/tasks/{id}/progress/ws", get(progress::subscribe_ws))
        .route("/api/tasks/{id}/progress/sse", get(progress::subscribe_sse))
        .route("/api/tasks/{id}/review", post(rest::review::decide_bulk))
        .route("/api/images/{id}/review", post(rest::review::decide))
        .route("/api/connections", get(rest::connections::list).post(rest::connections::create))
        .route("/api/connections/{id}", get(rest::connections::get).delete(rest::connections::delete))
        .route(
            "/api/settings/{platform_connection_id}",
            get(rest::settings::get).put(rest::settings::put),
        )
        .route("/api/admin/tasks/active", get(rest::admin::list_active))
        .route("/api/admin/tasks/user/{user_id}", get(rest::admin::user_history))
        .route("/api/admin/tasks/cleanup", delete(rest::admin::cleanup))
        .route("/api/admin/metrics", get(rest::admin::metrics))
        .route("/api/admin/notifications", get(rest::admin::notifications))
        .with_state(state)
        .layer(if cfg!(debug_assertions) {
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        } else {
            let origins: Vec<HeaderValue> = std::env::var("CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        })
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        );

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("vedfolnir-api starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}
