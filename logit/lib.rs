#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod diagnostics;
pub mod estimate;
pub mod information;
pub mod irls;
pub mod model;
pub mod types;

pub use data::{Cell, DataError, Dataset, DatasetBuilder, load_dataset};
pub use diagnostics::{Diagnostics, RegressorRow, compute_diagnostics};
pub use estimate::{Analysis, EstimationError, LogitError, analyze, diagnose, fit};
pub use information::{CovarianceEstimate, estimate_covariance, invert_information};
pub use irls::{IrlsStatus, design_from_rows, fit_model, fit_null_model};
pub use model::{FitConfig, FittedModel, ModelError, Prediction, TrainedModel, predict};
