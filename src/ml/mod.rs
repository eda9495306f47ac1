pub mod scaler;
pub mod sequence;
pub mod lstm;
pub mod model;
pub mod optimizer;
pub mod forecaster;
pub mod metrics;
pub mod persistence;

pub use scaler::ScalerBank;
pub use sequence::{feature_matrix, inference_window, training_pairs};
pub use model::{FitOptions, StackedLstm};
pub use forecaster::forecast;
pub use metrics::RegressionMetrics;
pub use persistence::{Artifact, ArtifactKey, ArtifactMetadata, ArtifactStore, FileArtifactStore};
