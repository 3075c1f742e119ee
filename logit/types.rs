use ndarray::{Array1, ArrayView1, Zip, s};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Coefficient vector in the canonical `[intercept, w_1, ..., w_p]` layout.
///
/// Index 0 is always the intercept; the remaining entries follow the regressor
/// column order of the dataset the model was fitted on.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    /// All-zero starting point for `num_regressors` regressors plus the intercept.
    pub fn zeros(num_regressors: usize) -> Self {
        Self(Array1::zeros(num_regressors + 1))
    }

    pub fn intercept(&self) -> f64 {
        self.0[0]
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.0.slice(s![1..])
    }

    pub fn num_regressors(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}

/// Linear predictor `eta = X beta` evaluated over a batch of observations.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct LinearPredictor(pub Array1<f64>);

impl LinearPredictor {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    /// Fitted probabilities `P(y = true)` for every observation.
    pub fn probabilities(&self) -> Array1<f64> {
        self.0.mapv(logistic)
    }

    /// Bernoulli log-likelihood of the observed labels.
    ///
    /// Evaluated on the eta scale through `softplus`, so saturated
    /// probabilities contribute exactly rather than through `ln(0)`.
    pub fn log_likelihood(&self, y: ArrayView1<bool>) -> f64 {
        -self.observation_losses(y).sum()
    }

    /// Per-observation negative log probability of the observed label.
    pub fn observation_losses(&self, y: ArrayView1<bool>) -> Array1<f64> {
        Zip::from(&self.0)
            .and(y)
            .map_collect(|&eta, &label| if label { softplus(-eta) } else { softplus(eta) })
    }
}

impl Deref for LinearPredictor {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Numerically stable logistic function.
pub fn logistic(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + exp(eta))` without overflow for large `|eta|`.
pub fn softplus(eta: f64) -> f64 {
    eta.max(0.0) + (-eta.abs()).exp().ln_1p()
}
