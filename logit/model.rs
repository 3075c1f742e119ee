use crate::information::CovarianceEstimate;
use crate::irls::IrlsStatus;
use crate::types::{Coefficients, LinearPredictor, logistic};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a fitted model
// when serialized to a TOML file.

/// Default stopping tolerance on the IRLS coefficient change.
pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-4;
/// Default cap on IRLS iterations. The cap is the termination guarantee.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Stopping rules for the IRLS fitter.
///
/// Leaving both fields at their defaults reproduces the fixed behaviour of the
/// engine: tolerance `1e-4`, at most `100` iterations, no regularization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub convergence_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// The outcome of one IRLS fit. Immutable once returned by the fitter.
///
/// `coefficients` are on the original regressor scale. The fit itself runs
/// on regressors centred at `centers`, where the intercept is
/// `centered_intercept`; predictions are evaluated in that form.
///
/// `information` is the Fisher information matrix `X'WX` of the centred,
/// intercept-augmented design, evaluated at the final coefficients. Its
/// dimension is `num_regressors + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub coefficients: Coefficients,
    pub centers: Array1<f64>,
    pub centered_intercept: f64,
    pub status: IrlsStatus,
    pub iterations: usize,
    pub information: Array2<f64>,
}

impl FittedModel {
    pub fn intercept(&self) -> f64 {
        self.coefficients.intercept()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.coefficients.weights()
    }

    pub fn num_regressors(&self) -> usize {
        self.coefficients.num_regressors()
    }

    /// Non-convergence is reported here rather than raised as an error.
    pub fn converged(&self) -> bool {
        self.status == IrlsStatus::Converged
    }

    /// `eta = intercept + X w` for every row of `x`, evaluated as
    /// `centered_intercept + (X - centers) w`.
    pub fn linear_predictor(&self, x: ArrayView2<f64>) -> LinearPredictor {
        LinearPredictor::new((&x - &self.centers).dot(&self.weights()) + self.centered_intercept)
    }

    pub fn log_likelihood(&self, x: ArrayView2<f64>, y: ArrayView1<bool>) -> f64 {
        self.linear_predictor(x).log_likelihood(y)
    }
}

/// A single-point prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// `P(y = true | x)`.
    pub probability: f64,
    /// `probability >= 0.5`.
    pub decision: bool,
    /// Delta-method standard error: `sqrt([1, x] Cov [1, x]')`.
    ///
    /// This is coefficient uncertainty propagated to the linear predictor,
    /// not label noise.
    pub std_error: f64,
    pub linear_predictor: f64,
}

impl Prediction {
    /// Per-class probabilities in `[P(false), P(true)]` order.
    pub fn class_probabilities(&self) -> [f64; 2] {
        [1.0 - self.probability, self.probability]
    }
}

/// The top-level, self-contained fitted artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub dependent_variable: String,
    /// Canonical regressor order. Prediction inputs must follow it.
    pub regressor_names: Vec<String>,
    pub config: FitConfig,
    pub model: FittedModel,
    pub covariance: CovarianceEstimate,
}

/// Custom error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Prediction input has {found} values, but the model was fitted on {expected} regressors."
    )]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Prediction input value at position {index} is not finite ({value}).")]
    NonFiniteInput { index: usize, value: f64 },
    #[error("The model file is internally inconsistent: {0}")]
    InconsistentModel(String),
}

/// Applies a fitted model to one regressor vector.
///
/// The linear predictor is `intercept + w . x`, computed around the fitted
/// column centers. The probability is its logistic transform and the
/// decision is `probability >= 0.5`. The standard error uses the extended
/// vector `[1, x]` against the coefficient covariance.
pub fn predict(
    model: &FittedModel,
    covariance: &CovarianceEstimate,
    x: ArrayView1<f64>,
) -> Result<Prediction, ModelError> {
    let expected = model.num_regressors();
    if x.len() != expected {
        return Err(ModelError::DimensionMismatch {
            expected,
            found: x.len(),
        });
    }
    if let Some((index, &value)) = x.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput { index, value });
    }
    if covariance.dim() != expected + 1 {
        return Err(ModelError::InconsistentModel(format!(
            "covariance is {0}x{0} but the model has {1} coefficients",
            covariance.dim(),
            expected + 1
        )));
    }

    let linear_predictor = model.centered_intercept + model.weights().dot(&(&x - &model.centers));
    let probability = logistic(linear_predictor);

    let mut extended = Array1::ones(expected + 1);
    extended.slice_mut(s![1..]).assign(&x);
    // A positive definite covariance cannot give a negative form; the clamp
    // only absorbs rounding at machine precision.
    let std_error = covariance.quadratic_form(extended.view()).max(0.0).sqrt();

    Ok(Prediction {
        probability,
        decision: probability >= 0.5,
        std_error,
        linear_predictor,
    })
}

impl TrainedModel {
    /// Predicts for one new regressor vector, ordered as `regressor_names`.
    pub fn predict(&self, x: ArrayView1<f64>) -> Result<Prediction, ModelError> {
        predict(&self.model, &self.covariance, x)
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        log::info!("Model saved to '{path}'");
        Ok(())
    }

    /// Loads a model from a TOML file and checks that its parts agree.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.check_consistency()?;
        log::info!(
            "Loaded model for '{}' with {} regressors from '{path}'",
            model.dependent_variable,
            model.regressor_names.len()
        );
        Ok(model)
    }

    fn check_consistency(&self) -> Result<(), ModelError> {
        let num_coefficients = self.model.coefficients.len();
        if num_coefficients < 2 {
            return Err(ModelError::InconsistentModel(format!(
                "expected an intercept and at least one weight, found {num_coefficients} coefficients"
            )));
        }
        if self.regressor_names.len() + 1 != num_coefficients {
            return Err(ModelError::InconsistentModel(format!(
                "{} regressor names for {} weights",
                self.regressor_names.len(),
                num_coefficients - 1
            )));
        }
        if self.model.centers.len() != self.regressor_names.len() {
            return Err(ModelError::InconsistentModel(format!(
                "{} column centers for {} regressors",
                self.model.centers.len(),
                self.regressor_names.len()
            )));
        }
        if self.covariance.dim() != num_coefficients {
            return Err(ModelError::InconsistentModel(format!(
                "covariance dimension {} does not match {num_coefficients} coefficients",
                self.covariance.dim()
            )));
        }
        Ok(())
    }
}
