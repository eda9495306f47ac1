use anyhow::Context;
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{api, AppState};
use crate::config::ServerSettings;

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        // Forecasting
        .route("/predict/:ticker", get(api::predict))
        .route("/train/:ticker", post(api::train))
        // Service endpoints
        .route("/api/health", get(api::health_check))
        .route("/api/models", get(api::list_models))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

pub async fn start_server(state: AppState, settings: &ServerSettings) -> anyhow::Result<()> {
    let app = router(state, &settings.allowed_origins);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Forecast server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
