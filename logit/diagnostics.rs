//! Wald tests, odds ratios and whole-model fit statistics for a fitted logit
//! model, plus the human-readable report built from them.

use crate::data::Dataset;
use crate::estimate::EstimationError;
use crate::information::CovarianceEstimate;
use crate::model::{FittedModel, Prediction};
use itertools::Itertools;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fmt;

pub const DEPENDENT_VARIABLE: &str = "Dependent Variable";
pub const METHOD: &str = "Method";
pub const SAMPLE_SIZE: &str = "Sample Size";
pub const CONVERGENCE: &str = "Convergence";
pub const ITERATIONS: &str = "Iterations";

pub const MCFADDEN_R_SQUARED: &str = "McFadden R-squared";
pub const AIC: &str = "AIC";
pub const BIC: &str = "BIC";
pub const HQC: &str = "HQC";
pub const LOG_LIKELIHOOD: &str = "Log likelihood";
pub const LR_STATISTIC: &str = "LR Statistic";
pub const LR_PROBABILITY: &str = "Prob(LR Statistic)";
pub const LOG_LIKELIHOOD_LOSS: &str = "Log likelihood Loss";

/// Label of the intercept row in the regressor table.
pub const INTERCEPT_LABEL: &str = "C";
pub const METHOD_NAME: &str = "Iterative Reweighted Least Squares";

/// Report order of the summary block.
pub const SUMMARY_KEYS: [&str; 5] = [DEPENDENT_VARIABLE, METHOD, SAMPLE_SIZE, CONVERGENCE, ITERATIONS];

/// Report order of the statistics block.
pub const STATISTIC_KEYS: [&str; 8] = [
    MCFADDEN_R_SQUARED,
    AIC,
    BIC,
    HQC,
    LOG_LIKELIHOOD,
    LR_STATISTIC,
    LR_PROBABILITY,
    LOG_LIKELIHOOD_LOSS,
];

/// One line of the coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressorRow {
    pub variable: String,
    pub coefficient: f64,
    pub standard_error: f64,
    pub z_statistic: f64,
    /// Two-sided Wald p-value against the standard normal.
    pub probability: f64,
    pub odds_ratio: f64,
}

/// The read-only output of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Class probabilities for the prediction input, `[P(false), P(true)]`.
    pub prediction: Vec<f64>,
    pub prediction_std_error: f64,
    /// Display strings; not meant for further computation.
    pub summary: BTreeMap<String, String>,
    /// Row 0 is the intercept, then one row per regressor in column order.
    pub regressors: Vec<RegressorRow>,
    pub statistics: BTreeMap<String, f64>,
}

/// Builds the diagnostics of `model` on the data it was fitted to.
///
/// With `k` coefficients (intercept included), `n` observations, full
/// log-likelihood `ll` and null log-likelihood `ll0`:
///
/// * McFadden R-squared `1 - ll / ll0` (0 when `ll0` is 0),
/// * AIC `2k - 2 ll`, BIC `ln(n) k - 2 ll`, HQC `-2 ll + 2k ln(ln(n))`,
/// * LR statistic `2 (ll - ll0)` against a chi-square with `k - 1` degrees
///   of freedom,
/// * log-likelihood loss, the mean negative log probability of each
///   observed label.
pub fn compute_diagnostics(
    model: &FittedModel,
    covariance: &CovarianceEstimate,
    dataset: &Dataset,
    null_log_likelihood: f64,
    prediction: &Prediction,
) -> Result<Diagnostics, EstimationError> {
    let num_coefficients = model.coefficients.len();
    if covariance.dim() != num_coefficients {
        return Err(EstimationError::DimensionMismatch {
            context: "covariance matrix".to_string(),
            expected: num_coefficients,
            found: covariance.dim(),
        });
    }
    if dataset.n_regressors() + 1 != num_coefficients {
        return Err(EstimationError::DimensionMismatch {
            context: "dataset regressors".to_string(),
            expected: num_coefficients - 1,
            found: dataset.n_regressors(),
        });
    }

    let standard_normal =
        Normal::new(0.0, 1.0).map_err(|e| EstimationError::DistributionError(e.to_string()))?;

    let variables = std::iter::once(INTERCEPT_LABEL)
        .chain(dataset.regressor_names().iter().map(String::as_str));
    let regressors = variables
        .zip(model.coefficients.iter())
        .zip(covariance.standard_errors())
        .map(|((variable, &coefficient), standard_error)| {
            let z_statistic = coefficient / standard_error;
            let probability = (2.0 * standard_normal.sf(z_statistic.abs())).min(1.0);
            RegressorRow {
                variable: variable.to_string(),
                coefficient,
                standard_error,
                z_statistic,
                probability,
                odds_ratio: coefficient.exp(),
            }
        })
        .collect::<Vec<_>>();

    let eta = model.linear_predictor(dataset.x());
    let losses = eta.observation_losses(dataset.labels());
    let log_likelihood = -losses.sum();
    let n = dataset.n_samples() as f64;
    let k = num_coefficients as f64;

    let mcfadden = if null_log_likelihood == 0.0 {
        0.0
    } else {
        1.0 - log_likelihood / null_log_likelihood
    };
    let lr_statistic = (2.0 * (log_likelihood - null_log_likelihood)).max(0.0);
    let lr_distribution = ChiSquared::new(k - 1.0)
        .map_err(|e| EstimationError::DistributionError(e.to_string()))?;
    let lr_probability = lr_distribution.sf(lr_statistic).clamp(0.0, 1.0);

    let statistics: BTreeMap<String, f64> = [
        (MCFADDEN_R_SQUARED, mcfadden),
        (AIC, 2.0 * k - 2.0 * log_likelihood),
        (BIC, n.ln() * k - 2.0 * log_likelihood),
        (HQC, -2.0 * log_likelihood + 2.0 * k * n.ln().ln()),
        (LOG_LIKELIHOOD, log_likelihood),
        (LR_STATISTIC, lr_statistic),
        (LR_PROBABILITY, lr_probability),
        (LOG_LIKELIHOOD_LOSS, losses.mean().unwrap_or(0.0)),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();

    let convergence = if model.converged() { "True" } else { "False" };
    let summary: BTreeMap<String, String> = [
        (DEPENDENT_VARIABLE, dataset.dependent_variable().to_string()),
        (METHOD, METHOD_NAME.to_string()),
        (SAMPLE_SIZE, dataset.n_samples().to_string()),
        (CONVERGENCE, convergence.to_string()),
        (ITERATIONS, model.iterations.to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();

    log::debug!(
        "Diagnostics: log-likelihood {log_likelihood:.6}, null {null_log_likelihood:.6}, LR {lr_statistic:.4} (p = {lr_probability:.4e})"
    );

    Ok(Diagnostics {
        prediction: prediction.class_probabilities().to_vec(),
        prediction_std_error: prediction.std_error,
        summary,
        regressors,
        statistics,
    })
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary")?;
        for key in SUMMARY_KEYS {
            if let Some(value) = self.summary.get(key) {
                writeln!(f, "  {key:<22}{value}")?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Regressors")?;
        writeln!(
            f,
            "  {:<16}{:>14}{:>16}{:>14}{:>14}{:>14}",
            "Variable", "Coefficient", "Standard Error", "z-Statistic", "Probability", "Odds Ratio"
        )?;
        for row in &self.regressors {
            writeln!(
                f,
                "  {:<16}{:>14.6}{:>16.6}{:>14.4}{:>14.4}{:>14.4}",
                row.variable,
                row.coefficient,
                row.standard_error,
                row.z_statistic,
                row.probability,
                row.odds_ratio
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Statistics")?;
        for key in STATISTIC_KEYS {
            if let Some(value) = self.statistics.get(key) {
                writeln!(f, "  {key:<22}{value:.6}")?;
            }
        }

        writeln!(f)?;
        write!(
            f,
            "Prediction [{}] (std. error {:.6})",
            self.prediction.iter().map(|p| format!("{p:.6}")).join(", "),
            self.prediction_std_error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::information::estimate_covariance;
    use crate::irls::{fit_model, fit_null_model};
    use crate::model::{FitConfig, predict};
    use crate::types::LinearPredictor;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn simulated_dataset(n: usize, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, 2), |_| rng.r#gen::<f64>() * 4.0 - 2.0);
        let y = Array1::from_shape_fn(n, |i| {
            let eta = 0.3 + 1.2 * x[[i, 0]] - 0.4 * x[[i, 1]];
            rng.r#gen::<f64>() < 1.0 / (1.0 + (-eta).exp())
        });
        Dataset::new(
            "outcome".to_string(),
            vec!["a".to_string(), "b".to_string()],
            y,
            x,
        )
        .unwrap()
    }

    fn diagnostics_for(dataset: &Dataset) -> (FittedModel, Diagnostics, f64) {
        let config = FitConfig::default();
        let model = fit_model(dataset.x(), dataset.labels(), &config).unwrap();
        let null_model = fit_null_model(dataset.labels(), &config).unwrap();
        let null_ll = LinearPredictor::new(Array1::from_elem(
            dataset.n_samples(),
            null_model.intercept(),
        ))
        .log_likelihood(dataset.labels());
        let covariance = estimate_covariance(&model, dataset.x(), dataset.labels()).unwrap();
        let prediction = predict(&model, &covariance, array![0.5, -0.5].view()).unwrap();
        let diagnostics =
            compute_diagnostics(&model, &covariance, dataset, null_ll, &prediction).unwrap();
        (model, diagnostics, null_ll)
    }

    #[test]
    fn test_information_criteria_follow_their_formulas() {
        let dataset = simulated_dataset(200, 11);
        let (model, diagnostics, null_ll) = diagnostics_for(&dataset);
        let s = &diagnostics.statistics;
        let ll = model.log_likelihood(dataset.x(), dataset.labels());
        let n = 200.0_f64;

        assert_abs_diff_eq!(s[LOG_LIKELIHOOD], ll, epsilon = 1e-10);
        assert_abs_diff_eq!(s[AIC], 6.0 - 2.0 * ll, epsilon = 1e-10);
        assert_abs_diff_eq!(s[BIC], n.ln() * 3.0 - 2.0 * ll, epsilon = 1e-10);
        assert_abs_diff_eq!(s[HQC], -2.0 * ll + 6.0 * n.ln().ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(s[MCFADDEN_R_SQUARED], 1.0 - ll / null_ll, epsilon = 1e-12);
        assert_abs_diff_eq!(s[LR_STATISTIC], 2.0 * (ll - null_ll), epsilon = 1e-10);
        assert_abs_diff_eq!(s[LOG_LIKELIHOOD_LOSS], -ll / n, epsilon = 1e-12);
    }

    #[test]
    fn test_probabilities_lie_in_unit_interval() {
        let dataset = simulated_dataset(150, 3);
        let (_, diagnostics, _) = diagnostics_for(&dataset);

        for row in &diagnostics.regressors {
            assert!((0.0..=1.0).contains(&row.probability), "{row:?}");
            assert!(row.standard_error > 0.0);
            assert_abs_diff_eq!(row.odds_ratio, row.coefficient.exp(), epsilon = 1e-12);
            assert_abs_diff_eq!(
                row.z_statistic,
                row.coefficient / row.standard_error,
                epsilon = 1e-12
            );
        }
        let lr_p = diagnostics.statistics[LR_PROBABILITY];
        assert!((0.0..=1.0).contains(&lr_p));
        assert!(diagnostics.statistics[MCFADDEN_R_SQUARED] <= 1.0);
        // A slope of 1.2 on 150 draws is far from the null.
        assert!(lr_p < 1e-3);
        assert_abs_diff_eq!(
            diagnostics.prediction.iter().sum::<f64>(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rows_and_summary_are_labelled() {
        let dataset = simulated_dataset(100, 5);
        let (model, diagnostics, _) = diagnostics_for(&dataset);

        let variables: Vec<&str> = diagnostics
            .regressors
            .iter()
            .map(|r| r.variable.as_str())
            .collect();
        assert_eq!(variables, vec!["C", "a", "b"]);
        assert_eq!(diagnostics.regressors[0].coefficient, model.intercept());

        assert_eq!(diagnostics.summary[DEPENDENT_VARIABLE], "outcome");
        assert_eq!(diagnostics.summary[METHOD], METHOD_NAME);
        assert_eq!(diagnostics.summary[SAMPLE_SIZE], "100");
        assert_eq!(diagnostics.summary[CONVERGENCE], "True");
        assert_eq!(diagnostics.summary[ITERATIONS], model.iterations.to_string());
        assert_eq!(diagnostics.summary.len(), SUMMARY_KEYS.len());
        assert_eq!(diagnostics.statistics.len(), STATISTIC_KEYS.len());
    }

    #[test]
    fn test_report_lists_every_section() {
        let dataset = simulated_dataset(80, 9);
        let (_, diagnostics, _) = diagnostics_for(&dataset);
        let report = diagnostics.to_string();

        for key in SUMMARY_KEYS.iter().chain(STATISTIC_KEYS.iter()) {
            assert!(report.contains(key), "report is missing '{key}'");
        }
        assert!(report.contains("Odds Ratio"));
        assert!(report.starts_with("Summary"));
        assert!(report.contains("Prediction ["));

        let serialized = toml::to_string(&diagnostics).unwrap();
        assert!(serialized.contains("Prob(LR Statistic)"));
    }

    #[test]
    fn test_zero_null_log_likelihood_gives_zero_r_squared() {
        let dataset = simulated_dataset(60, 21);
        let (model, _, _) = diagnostics_for(&dataset);
        let covariance = estimate_covariance(&model, dataset.x(), dataset.labels()).unwrap();
        let prediction = predict(&model, &covariance, array![0.0, 0.0].view()).unwrap();
        let diagnostics =
            compute_diagnostics(&model, &covariance, &dataset, 0.0, &prediction).unwrap();
        assert_eq!(diagnostics.statistics[MCFADDEN_R_SQUARED], 0.0);
    }

    #[test]
    fn test_mismatched_covariance_is_rejected() {
        let dataset = simulated_dataset(60, 2);
        let (model, _, null_ll) = diagnostics_for(&dataset);
        let covariance = CovarianceEstimate::from_matrix(Array2::eye(2));
        let prediction = Prediction {
            probability: 0.5,
            decision: true,
            std_error: 1.0,
            linear_predictor: 0.0,
        };
        assert!(matches!(
            compute_diagnostics(&model, &covariance, &dataset, null_ll, &prediction),
            Err(EstimationError::DimensionMismatch { .. })
        ));
    }
}
