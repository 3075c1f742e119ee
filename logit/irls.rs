//! # Iteratively Reweighted Least Squares for the logit link
//!
//! Newton's method on the Bernoulli log-likelihood, written as a sequence of
//! weighted least-squares problems. Every iteration
//!
//! 1.  evaluates fitted probabilities `mu = logistic(X beta)` at the current
//!     coefficients,
//! 2.  forms the working weights `w = mu (1 - mu)` and the weighted normal
//!     equations `X'WX delta = X'(y - mu)`,
//! 3.  equilibrates the system to unit diagonal, solves it by Cholesky (or a
//!     spectral pseudo-inverse when it is rank deficient) and moves
//!     `beta <- beta + delta`.
//!
//! The regressors are centred before the loop. Together with the diagonal
//! scaling this keeps the rank decision independent of the units the
//! regressors are measured in.
//!
//! There is no penalty term. Separable classes or collinear regressors are
//! not errors: the solver keeps the step inside the identifiable subspace and
//! the caller sees the consequences through `IrlsStatus` and the coefficient
//! magnitudes.

use crate::estimate::EstimationError;
use crate::model::{FitConfig, FittedModel};
use crate::types::{Coefficients, LinearPredictor, logistic};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, s};
use ndarray_linalg::{Eigh, FactorizeC, SolveC, UPLO};
use serde::{Deserialize, Serialize};

/// Relative eigenvalue cutoff below which a direction of `X'WX` is treated
/// as numerically null.
pub(crate) const RANK_TOLERANCE: f64 = 1e3 * f64::EPSILON;

/// The status of the IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrlsStatus {
    /// Converged successfully within tolerance.
    Converged,
    /// Reached the iteration cap without meeting the tolerance.
    MaxIterationsReached,
    /// A proposed step produced non-finite coefficients; the last finite
    /// iterate is kept.
    Unstable,
}

/// Builds a dense design matrix from row vectors, checking every row has the
/// same number of regressors as the first.
pub fn design_from_rows(rows: &[Vec<f64>]) -> Result<Array2<f64>, EstimationError> {
    let Some(first) = rows.first() else {
        return Err(EstimationError::EmptyDataset);
    };
    let p = first.len();
    let mut flat = Vec::with_capacity(rows.len() * p);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != p {
            return Err(EstimationError::DimensionMismatch {
                context: format!("design row {i}"),
                expected: p,
                found: row.len(),
            });
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), p), flat).map_err(|e| {
        EstimationError::DimensionMismatch {
            context: format!("design matrix ({e})"),
            expected: rows.len() * p,
            found: rows.len() * p,
        }
    })
}

/// Fits `P(y = true | x) = logistic(intercept + w . x)` by IRLS.
///
/// `x` holds the regressors only. The fitter works on the column-centred
/// design `[1, x - mean(x)]` and reports the intercept back on the original
/// scale; the centred intercept and the column means are kept on the model
/// so predictions can be evaluated in the same parametrization.
///
/// Stops when the largest absolute coefficient change drops below
/// `config.convergence_tolerance`, or when the deviance itself does (the
/// fitted probabilities reproduce every label, i.e. complete separation),
/// or after `config.max_iterations` steps.
pub fn fit_model(
    x: ArrayView2<f64>,
    y: ArrayView1<bool>,
    config: &FitConfig,
) -> Result<FittedModel, EstimationError> {
    validate_inputs(x, y, config)?;

    let centers = x.mean_axis(Axis(0)).ok_or(EstimationError::EmptyDataset)?;
    let design = with_intercept((&x - &centers).view());
    let num_coefficients = design.ncols();

    log::info!(
        "Starting IRLS fit: {} observations, {} coefficients (intercept included)",
        design.nrows(),
        num_coefficients
    );

    let mut beta = Array1::from(Coefficients::zeros(x.ncols()));
    let mut eta = LinearPredictor::new(design.dot(&beta));
    let mut deviance = calculate_deviance(&eta, y);
    let mut status = IrlsStatus::MaxIterationsReached;
    let mut iterations = 0;

    for iter in 1..=config.max_iterations {
        iterations = iter;

        let (residuals, weights) = update_logit_vectors(&eta, y);
        let information = fisher_information(design.view(), weights.view());
        let score = score_vector(design.view(), residuals.view());
        if !information.iter().chain(score.iter()).all(|v| v.is_finite()) {
            log::warn!(
                "IRLS normal equations at iteration {iter} are not finite; keeping the previous iterate"
            );
            status = IrlsStatus::Unstable;
            break;
        }

        let step = solve_newton_step(&information, &score)?;
        let beta_trial = &beta + &step;
        if !beta_trial.iter().all(|b| b.is_finite()) {
            log::warn!(
                "IRLS step at iteration {iter} produced non-finite coefficients; keeping the previous iterate"
            );
            status = IrlsStatus::Unstable;
            break;
        }

        let max_coefficient_change = step.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));

        beta = beta_trial;
        eta = LinearPredictor::new(design.dot(&beta));
        let deviance_trial = calculate_deviance(&eta, y);

        log::debug!(
            "IRLS Iteration #{:<3} | Deviance: {:<13.7} | Change: {:>12.6e} | Max |delta beta|: {:.6e}",
            iter,
            deviance_trial,
            deviance - deviance_trial,
            max_coefficient_change
        );
        deviance = deviance_trial;

        if max_coefficient_change < config.convergence_tolerance {
            status = IrlsStatus::Converged;
            break;
        }

        if deviance < config.convergence_tolerance {
            let max_abs_eta = eta.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));
            log::warn!(
                "IRLS stopped at iteration {iter} with deviance {deviance:.3e} (max |eta| = {max_abs_eta:.2e}): the classes are perfectly separated and the coefficients are not identifiable"
            );
            status = IrlsStatus::Converged;
            break;
        }
    }

    if status == IrlsStatus::MaxIterationsReached {
        log::warn!(
            "IRLS did not converge within {} iterations (tolerance {:.1e})",
            config.max_iterations,
            config.convergence_tolerance
        );
    }

    log::info!(
        "IRLS finished after {iterations} iterations with status {status:?}; log-likelihood {:.6}",
        -0.5 * deviance
    );

    let (_, weights) = update_logit_vectors(&eta, y);
    let information = fisher_information(design.view(), weights.view());

    let centered_intercept = beta[0];
    let intercept = centered_intercept - beta.slice(s![1..]).dot(&centers);
    let mut coefficients = beta;
    coefficients[0] = intercept;

    Ok(FittedModel {
        coefficients: Coefficients::new(coefficients),
        centers,
        centered_intercept,
        status,
        iterations,
        information,
    })
}

/// Fits the intercept-only null model for the same labels.
///
/// Runs the same routine on a design with no regressors, so the null
/// log-likelihood comes from the exact fitter that produced the full model.
pub fn fit_null_model(
    y: ArrayView1<bool>,
    config: &FitConfig,
) -> Result<FittedModel, EstimationError> {
    let empty = Array2::<f64>::zeros((y.len(), 0));
    fit_model(empty.view(), y, config)
}

fn validate_inputs(
    x: ArrayView2<f64>,
    y: ArrayView1<bool>,
    config: &FitConfig,
) -> Result<(), EstimationError> {
    if x.nrows() == 0 {
        return Err(EstimationError::EmptyDataset);
    }
    if y.len() != x.nrows() {
        return Err(EstimationError::DimensionMismatch {
            context: "label vector".to_string(),
            expected: x.nrows(),
            found: y.len(),
        });
    }
    if !(config.convergence_tolerance.is_finite() && config.convergence_tolerance > 0.0) {
        return Err(EstimationError::InvalidConfig(format!(
            "convergence tolerance must be positive and finite, got {}",
            config.convergence_tolerance
        )));
    }
    for ((row, column), value) in x.indexed_iter() {
        if !value.is_finite() {
            return Err(EstimationError::NonFiniteDesign { row, column });
        }
    }
    Ok(())
}

/// Prepends the constant intercept column.
pub(crate) fn with_intercept(x: ArrayView2<f64>) -> Array2<f64> {
    let mut design = Array2::ones((x.nrows(), x.ncols() + 1));
    design.slice_mut(s![.., 1..]).assign(&x);
    design
}

/// Working residuals `y - mu` and IRLS weights `mu (1 - mu)` at `eta`.
///
/// The residual of a positive label is `logistic(-eta)` and that of a
/// negative label `-logistic(eta)`, so mirrored observations give residuals
/// that are exact negatives of each other. The weight is computed as
/// `logistic(eta) * logistic(-eta)` so it stays accurate when `mu` rounds
/// to 1.
pub fn update_logit_vectors(eta: &LinearPredictor, y: ArrayView1<bool>) -> (Array1<f64>, Array1<f64>) {
    let residuals = Zip::from(&eta.0)
        .and(y)
        .map_collect(|&e, &label| if label { logistic(-e) } else { -logistic(e) });
    let weights = eta.mapv(|e| logistic(e) * logistic(-e));
    (residuals, weights)
}

/// Binomial deviance, `-2 * log-likelihood` for 0/1 labels.
pub fn calculate_deviance(eta: &LinearPredictor, y: ArrayView1<bool>) -> f64 {
    -2.0 * eta.log_likelihood(y)
}

/// Sums positive and negative terms separately, each in ascending
/// magnitude. Terms that cancel in exact pairs sum to exactly zero,
/// whatever order they arrive in.
fn balanced_sum(terms: impl IntoIterator<Item = f64>) -> f64 {
    let (mut positive, mut negative): (Vec<f64>, Vec<f64>) =
        terms.into_iter().partition(|t| *t >= 0.0);
    positive.sort_by(f64::total_cmp);
    negative.sort_by(|a, b| b.total_cmp(a));
    positive.iter().sum::<f64>() + negative.iter().sum::<f64>()
}

/// Fisher information `X'WX` of an intercept-augmented design.
pub(crate) fn fisher_information(design: ArrayView2<f64>, weights: ArrayView1<f64>) -> Array2<f64> {
    let p = design.ncols();
    let mut information = Array2::zeros((p, p));
    for j in 0..p {
        for k in 0..=j {
            let terms = Zip::from(design.column(j))
                .and(design.column(k))
                .and(weights)
                .map_collect(|&a, &b, &w| w * a * b);
            let value = balanced_sum(terms);
            information[[j, k]] = value;
            information[[k, j]] = value;
        }
    }
    information
}

/// Score `X'(y - mu)` from the working residuals.
fn score_vector(design: ArrayView2<f64>, residuals: ArrayView1<f64>) -> Array1<f64> {
    design
        .columns()
        .into_iter()
        .map(|column| balanced_sum(Zip::from(column).and(residuals).map_collect(|&d, &r| d * r)))
        .collect()
}

/// Symmetric diagonal equilibration `S A S` with `S = diag(1 / sqrt(a_ii))`.
///
/// Returns the scaled matrix and the diagonal of `S`. Directions with a
/// zero or non-finite diagonal get a scale of 0, which leaves an exactly
/// null row and column behind.
pub(crate) fn equilibrate(matrix: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let scale = matrix.diag().mapv(|d| {
        if d.is_finite() && d > 0.0 {
            1.0 / d.sqrt()
        } else {
            0.0
        }
    });
    let mut scaled = matrix.clone();
    for ((i, j), value) in scaled.indexed_iter_mut() {
        *value *= scale[i] * scale[j];
    }
    (scaled, scale)
}

/// Eigendecomposition of a symmetric matrix, lower triangle referenced.
pub(crate) fn symmetric_eigen(
    matrix: &Array2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), EstimationError> {
    matrix
        .eigh(UPLO::Lower)
        .map_err(EstimationError::EigendecompositionFailed)
}

/// Smallest over largest eigenvalue, 0 when nothing is positive.
pub(crate) fn eigenvalue_ratio(eigvals: &Array1<f64>) -> f64 {
    let max_eig = eigvals.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let min_eig = eigvals.iter().fold(f64::INFINITY, |acc, &v| acc.min(v));
    if max_eig > 0.0 { min_eig / max_eig } else { 0.0 }
}

/// Solves `A delta = b` for the Newton step on the equilibrated system.
///
/// A well-conditioned system goes through a Cholesky solve. A rank-deficient
/// one falls back to the minimum-norm solution that drops directions whose
/// eigenvalue is below `RANK_TOLERANCE` relative to the largest.
fn solve_newton_step(
    matrix: &Array2<f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>, EstimationError> {
    let (scaled, scale) = equilibrate(matrix);
    let scaled_rhs = rhs * &scale;
    let (eigvals, eigvecs) = symmetric_eigen(&scaled)?;

    let cholesky = if eigenvalue_ratio(&eigvals) > RANK_TOLERANCE {
        scaled
            .factorizec(UPLO::Lower)
            .and_then(|factor| factor.solvec(&scaled_rhs))
            .ok()
    } else {
        None
    };
    let solution = match cholesky {
        Some(solution) => solution,
        None => apply_pseudo_inverse(&eigvals, &eigvecs, &scaled_rhs),
    };
    Ok(solution * &scale)
}

fn apply_pseudo_inverse(eigvals: &Array1<f64>, eigvecs: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
    let max_eig = eigvals.iter().fold(0.0_f64, |acc, &v| acc.max(v));
    let cutoff = max_eig * RANK_TOLERANCE;

    let projected = eigvecs.t().dot(rhs);
    let scaled = Zip::from(&projected)
        .and(eigvals)
        .map_collect(|&c, &lambda| if lambda > cutoff { c / lambda } else { 0.0 });
    eigvecs.dot(&scaled)
}
