//! # Model Estimation and Orchestration
//!
//! Ties the numeric pieces together. A caller hands over a validated
//! `Dataset`; this module runs the full and the intercept-only fits, inverts
//! the Fisher information, predicts for the supplied regressor vector and
//! assembles the diagnostics report together with a persistable
//! `TrainedModel`.
//!
//! Nothing here is partially populated on failure: every result structure is
//! built once, after all computation has succeeded.

use crate::data::{DataError, Dataset};
use crate::diagnostics::{Diagnostics, compute_diagnostics};
use crate::information::estimate_covariance;
use crate::irls::{fit_model, fit_null_model};
use crate::model::{FitConfig, FittedModel, ModelError, Prediction, TrainedModel, predict};
use crate::types::LinearPredictor;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// A comprehensive error type for the fitting and estimation process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("The dataset contains no observations.")]
    EmptyDataset,

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("The design matrix holds a non-finite value at row {row}, column {column}.")]
    NonFiniteDesign { row: usize, column: usize },

    #[error("Invalid fitting configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "The Fisher information matrix is singular (eigenvalue ratio {ratio:.3e}); the coefficient covariance is undefined. Check for collinear or constant regressors."
    )]
    SingularInformationMatrix { ratio: f64 },

    #[error("Eigendecomposition failed: {0}")]
    EigendecompositionFailed(ndarray_linalg::error::LinalgError),

    #[error("Failed to construct a reference distribution: {0}")]
    DistributionError(String),
}

/// Any failure along the path from raw table to diagnostics.
#[derive(Error, Debug)]
pub enum LogitError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Everything one analysis produces.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// `prediction.probability >= 0.5` for the supplied regressor vector.
    pub decision: bool,
    pub prediction: Prediction,
    pub diagnostics: Diagnostics,
    pub trained: TrainedModel,
}

/// Fits the full model on a dataset.
pub fn fit(dataset: &Dataset, config: &FitConfig) -> Result<FittedModel, EstimationError> {
    fit_model(dataset.x(), dataset.labels(), config)
}

/// Computes the diagnostics of an already fitted model, predicting for `x`.
///
/// Fits the null model on the same labels to obtain the baseline
/// log-likelihood.
pub fn diagnose(
    model: &FittedModel,
    dataset: &Dataset,
    x: ArrayView1<f64>,
    config: &FitConfig,
) -> Result<Diagnostics, LogitError> {
    let null_model = fit_null_model(dataset.labels(), config)?;
    let analysis = assemble(model.clone(), &null_model, dataset, x, config)?;
    Ok(analysis.diagnostics)
}

/// Fits the full and null models, estimates the covariance and predicts for
/// `x`. The two fits share no state and run on the rayon pool.
pub fn analyze(
    dataset: &Dataset,
    x: ArrayView1<f64>,
    config: &FitConfig,
) -> Result<Analysis, LogitError> {
    log::info!(
        "Analyzing '{}' on {} observations and {} regressors",
        dataset.dependent_variable(),
        dataset.n_samples(),
        dataset.n_regressors()
    );

    let (full_result, null_result) = rayon::join(
        || fit(dataset, config),
        || fit_null_model(dataset.labels(), config),
    );
    let model = full_result?;
    let null_model = null_result?;

    assemble(model, &null_model, dataset, x, config)
}

fn assemble(
    model: FittedModel,
    null_model: &FittedModel,
    dataset: &Dataset,
    x: ArrayView1<f64>,
    config: &FitConfig,
) -> Result<Analysis, LogitError> {
    let covariance = estimate_covariance(&model, dataset.x(), dataset.labels())?;
    let prediction = predict(&model, &covariance, x)?;

    let null_eta = LinearPredictor::new(Array1::from_elem(
        dataset.n_samples(),
        null_model.intercept(),
    ));
    let null_log_likelihood = null_eta.log_likelihood(dataset.labels());

    let diagnostics =
        compute_diagnostics(&model, &covariance, dataset, null_log_likelihood, &prediction)?;

    let trained = TrainedModel {
        dependent_variable: dataset.dependent_variable().to_string(),
        regressor_names: dataset.regressor_names().to_vec(),
        config: *config,
        model,
        covariance,
    };

    Ok(Analysis {
        decision: prediction.decision,
        prediction,
        diagnostics,
        trained,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{LOG_LIKELIHOOD, MCFADDEN_R_SQUARED};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn dataset(x: ndarray::Array2<f64>, y: Array1<bool>) -> Dataset {
        let names = (1..=x.ncols()).map(|i| format!("x{i}")).collect();
        Dataset::new("y".to_string(), names, y, x).unwrap()
    }

    #[test]
    fn test_diagnose_agrees_with_analyze() {
        let data = dataset(
            array![[0.0], [1.0], [2.0], [3.0], [1.5], [0.5]],
            array![false, true, false, true, true, false],
        );
        let config = FitConfig::default();
        let analysis = analyze(&data, array![1.0].view(), &config).unwrap();

        let model = fit(&data, &config).unwrap();
        let diagnostics = diagnose(&model, &data, array![1.0].view(), &config).unwrap();

        assert_eq!(diagnostics, analysis.diagnostics);
        assert_eq!(analysis.decision, analysis.prediction.decision);
        assert_eq!(analysis.trained.regressor_names, vec!["x1".to_string()]);
    }

    #[test]
    fn test_uninformative_regressor_matches_null_model() {
        let data = dataset(
            array![[0.0], [0.0], [0.0], [0.0], [0.0], [0.0]],
            array![false, true, true, false, true, true],
        );
        // A constant-zero column contributes nothing; the information is
        // singular in that direction, so only the fits are compared here.
        let config = FitConfig::default();
        let model = fit(&data, &config).unwrap();
        let null_model = fit_null_model(data.labels(), &config).unwrap();
        assert_abs_diff_eq!(model.intercept(), null_model.intercept(), epsilon = 1e-8);
        assert_abs_diff_eq!(model.weights()[0], 0.0, epsilon = 1e-12);

        assert!(matches!(
            analyze(&data, array![0.0].view(), &config),
            Err(LogitError::Estimation(
                EstimationError::SingularInformationMatrix { .. }
            ))
        ));
    }

    #[test]
    fn test_weak_regressor_gives_small_pseudo_r_squared() {
        let data = dataset(
            array![[1.0], [2.0], [1.0], [2.0], [1.0], [2.0], [1.0], [2.0]],
            array![false, false, true, true, true, false, false, true],
        );
        // Both levels carry two successes out of four: the slope is zero.
        let analysis = analyze(&data, array![1.5].view(), &FitConfig::default()).unwrap();
        let statistics = &analysis.diagnostics.statistics;
        assert_abs_diff_eq!(statistics[MCFADDEN_R_SQUARED], 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(
            statistics[LOG_LIKELIHOOD],
            8.0 * 0.5_f64.ln(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_prediction_length_is_checked() {
        let data = dataset(
            array![[0.0], [1.0], [2.0], [3.0], [1.5]],
            array![false, true, false, true, true],
        );
        assert!(matches!(
            analyze(&data, array![1.0, 2.0].view(), &FitConfig::default()),
            Err(LogitError::Model(ModelError::DimensionMismatch {
                expected: 1,
                found: 2
            }))
        ));
    }
}
