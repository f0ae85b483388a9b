//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, auth, and
//! rate limiting. Streaming routes are exempt from the rate limiter; the
//! compression layer skips `text/event-stream` bodies, so SSE flushes
//! immediately.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS middleware: allow localhost origins for the web client.
    let port = state.config.general.port;
    let dev_port = port.saturating_add(1);
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([
            format!("http://127.0.0.1:{}", port)
                .parse::<HeaderValue>()
                .unwrap(),
            format!("http://localhost:{}", port)
                .parse::<HeaderValue>()
                .unwrap(),
            format!("http://127.0.0.1:{}", dev_port)
                .parse::<HeaderValue>()
                .unwrap(),
            format!("http://localhost:{}", dev_port)
                .parse::<HeaderValue>()
                .unwrap(),
        ]))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    // Rate limiter shared by all non-streaming routes.
    let limiter = RateLimiter::new(100);

    // Anonymous routes: no auth, rate-limited except the stream.
    let anonymous_routes = Router::new()
        .route("/anonymous/chats", post(handlers::create_anonymous_chat))
        .route(
            "/anonymous/chats/{id}/messages",
            post(handlers::send_anonymous_message),
        )
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter.clone()));

    let anonymous_stream_routes = Router::new().route(
        "/anonymous/chats/{id}/messages/stream",
        post(handlers::stream_anonymous_message),
    );

    // Authenticated routes, rate-limited.
    let rate_limited_routes = Router::new()
        .route(
            "/chats",
            get(handlers::list_chats).post(handlers::create_chat),
        )
        .route(
            "/chats/{id}",
            get(handlers::get_chat)
                .put(handlers::rename_chat)
                .delete(handlers::delete_chat),
        )
        .route("/chats/{id}/messages", post(handlers::send_message))
        .route("/chats/migrate", post(handlers::migrate_chats))
        .route(
            "/models",
            get(handlers::models).put(handlers::switch_model),
        )
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter));

    // SSE send exempt from rate limiting.
    let stream_routes = Router::new().route(
        "/chats/{id}/messages/stream",
        post(handlers::stream_message),
    );

    // Combine all protected routes behind auth.
    let protected_routes =
        rate_limited_routes
            .merge(stream_routes)
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                crate::auth::require_auth,
            ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .merge(anonymous_routes)
        .merge(anonymous_stream_routes);

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB global limit
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
///
/// Binds to 127.0.0.1 (localhost only) on the port from config.
pub async fn start_server(
    state: AppState,
) -> Result<(), colloquy_core::error::ColloquyError> {
    let port = state.config.general.port;
    let addr = format!("127.0.0.1:{}", port);

    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        colloquy_core::error::ColloquyError::Api(format!("Failed to bind: {}", e))
    })?;

    axum::serve(listener, router)
        .await
        .map_err(|e| colloquy_core::error::ColloquyError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
