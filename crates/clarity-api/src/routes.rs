//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use clarity_core::error::ClarityError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Local dashboards on the API port and the port after it.
    let origins: Vec<HeaderValue> = [state.port, state.port.saturating_add(1)]
        .iter()
        .flat_map(|port| {
            [
                format!("http://127.0.0.1:{port}"),
                format!("http://localhost:{port}"),
            ]
        })
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route("/recording/start", post(handlers::start_recording))
        .route("/recording/stop", post(handlers::stop_recording))
        .route("/status", get(handlers::status))
        .route("/traces", get(handlers::traces))
        .route("/summaries", get(handlers::summaries))
        .route("/statistics/today", get(handlers::today_statistics))
        .route("/statistics/history", get(handlers::historical_stats))
        .route("/statistics/api", get(handlers::api_statistics))
        .route(
            "/daily-summary/generate",
            post(handlers::generate_daily_summary),
        )
        .route("/daily-summary", get(handlers::get_daily_summary))
        .route("/diagnostics", get(handlers::diagnostics))
        .route("/diagnostics/capture", post(handlers::capture_check))
        .route(
            "/settings/api-key",
            get(handlers::get_api_key).put(handlers::set_api_key),
        )
        .route(
            "/settings/model",
            get(handlers::get_model).put(handlers::set_model),
        )
        .route(
            "/settings/summary-interval",
            get(handlers::get_summary_interval).put(handlers::set_summary_interval),
        )
        .route(
            "/settings/prompt",
            get(handlers::get_prompt)
                .put(handlers::set_prompt)
                .delete(handlers::reset_prompt),
        )
        .route(
            "/settings/language",
            get(handlers::get_language).put(handlers::set_language),
        )
        .route(
            "/settings/video-resolution",
            get(handlers::get_video_resolution).put(handlers::set_video_resolution),
        )
        .route("/stream", get(handlers::stream))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
pub async fn serve(
    bind_address: &str,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ClarityError> {
    let addr = format!("{}:{}", bind_address, state.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ClarityError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
