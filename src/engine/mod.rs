pub mod period;
pub mod summary;
pub mod training;
pub mod prediction;

pub use training::TrainingJob;
pub use prediction::ForecastService;
