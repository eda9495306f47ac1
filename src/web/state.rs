use std::sync::Arc;

use crate::database::Database;
use crate::engine::{ForecastService, TrainingJob};

/// Shared handles for the HTTP handlers; cloned per request
#[derive(Clone)]
pub struct AppState {
    pub forecasts: Arc<ForecastService>,
    pub trainer: Arc<TrainingJob>,
    pub database: Option<Arc<Database>>,
}
