use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use super::AppState;
use crate::error::ForecastError;

const DEFAULT_RUN_LIMIT: u32 = 50;

impl IntoResponse for ForecastError {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            info!("Rejected request: {}", self);
            return bad_request(self.to_string());
        }
        error!("Request failed: {:#}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "Internal server error"})),
        )
            .into_response()
    }
}

fn bad_request(detail: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"detail": detail.into()}))).into_response()
}

fn missing(param: &str) -> Response {
    bad_request(format!("Missing required query parameter '{}'", param))
}

// === Forecasting ===

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    pub interval: Option<String>,
    pub timeframe: Option<String>,
}

pub async fn predict(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<PredictParams>,
) -> Response {
    let Some(interval) = params.interval else {
        return missing("interval");
    };
    let Some(timeframe) = params.timeframe else {
        return missing("timeframe");
    };

    match state.forecasts.predict(&ticker, &timeframe, &interval).await {
        Ok(forecast) => Json(forecast).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TrainParams {
    pub interval: Option<String>,
}

pub async fn train(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<TrainParams>,
) -> Response {
    let Some(interval) = params.interval else {
        return missing("interval");
    };

    info!("Training requested for {} @ {}", ticker, interval);
    match state.trainer.run(&ticker, &interval).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

// === Service ===

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct ModelsParams {
    pub ticker: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<ModelsParams>,
) -> Response {
    let Some(db) = &state.database else {
        return Json(Vec::<serde_json::Value>::new()).into_response();
    };

    let limit = params.limit.unwrap_or(DEFAULT_RUN_LIMIT);
    match db.list_training_runs(params.ticker.as_deref(), limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => ForecastError::Internal(e).into_response(),
    }
}
