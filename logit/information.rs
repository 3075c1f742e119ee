use crate::estimate::EstimationError;
use crate::irls::{RANK_TOLERANCE, eigenvalue_ratio, equilibrate, symmetric_eigen};
use crate::model::FittedModel;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

/// Coefficient covariance: the inverse of the Fisher information at the
/// converged estimate. Row and column 0 belong to the intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceEstimate {
    matrix: Array2<f64>,
}

impl CovarianceEstimate {
    /// Wraps an already inverted information matrix.
    pub fn from_matrix(matrix: Array2<f64>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Square roots of the diagonal, one per coefficient.
    pub fn standard_errors(&self) -> Array1<f64> {
        self.matrix.diag().mapv(|v| v.max(0.0).sqrt())
    }

    /// `v' C v`.
    pub fn quadratic_form(&self, v: ArrayView1<f64>) -> f64 {
        v.dot(&self.matrix.dot(&v))
    }
}

/// Inverts the Fisher information stored on `model` and maps it back to the
/// original regressor scale.
///
/// The fitter keeps `X'WX` of the centred design at its final coefficients.
/// The logit link is canonical, so observed and expected information
/// coincide and depend on the labels only through those coefficients; `x`
/// and `y` are accepted to check that the sample matches the model.
///
/// With `T` the map from centred to original coefficients (identity, with
/// `-centers` in the intercept row), the covariance is `T C T'`.
///
/// Fails with `SingularInformationMatrix` when the smallest eigenvalue of the
/// equilibrated information is not clearly positive relative to the largest.
/// Collinear or constant regressors land here instead of producing `NaN`/`inf`
/// standard errors.
pub fn estimate_covariance(
    model: &FittedModel,
    x: ArrayView2<f64>,
    y: ArrayView1<bool>,
) -> Result<CovarianceEstimate, EstimationError> {
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
    let num_regressors = model.num_regressors();
    if x.ncols() != num_regressors {
        return Err(EstimationError::DimensionMismatch {
            context: "design columns".to_string(),
            expected: num_regressors,
            found: x.ncols(),
        });
    }
    if model.information.nrows() != num_regressors + 1 || !model.information.is_square() {
        return Err(EstimationError::DimensionMismatch {
            context: "information matrix".to_string(),
            expected: num_regressors + 1,
            found: model.information.nrows(),
        });
    }
    if model.centers.len() != num_regressors {
        return Err(EstimationError::DimensionMismatch {
            context: "column centers".to_string(),
            expected: num_regressors,
            found: model.centers.len(),
        });
    }

    let centered = invert_information(&model.information)?;

    let mut transform = Array2::<f64>::eye(num_regressors + 1);
    transform
        .slice_mut(s![0, 1..])
        .assign(&model.centers.mapv(|c| -c));
    let raw = transform.dot(centered.matrix()).dot(&transform.t());
    Ok(CovarianceEstimate::from_matrix(symmetrize(&raw)))
}

/// Inverts a symmetric positive definite information matrix.
///
/// The matrix is first scaled to unit diagonal, `S A S`. The rank check and
/// the eigendecomposition `V diag(1 / lambda) V'` run on the scaled matrix,
/// and the result is scaled back with `S`.
pub fn invert_information(information: &Array2<f64>) -> Result<CovarianceEstimate, EstimationError> {
    if !information.iter().all(|v| v.is_finite()) {
        return Err(EstimationError::SingularInformationMatrix { ratio: f64::NAN });
    }

    let (scaled, scale) = equilibrate(information);
    if scale.iter().any(|&s| s == 0.0) {
        log::warn!("Fisher information has a direction with no curvature");
        return Err(EstimationError::SingularInformationMatrix { ratio: 0.0 });
    }

    let (eigvals, eigvecs) = symmetric_eigen(&scaled)?;
    let ratio = eigenvalue_ratio(&eigvals);
    if ratio <= RANK_TOLERANCE {
        log::warn!("Fisher information is singular: scaled eigenvalue ratio {ratio:.3e}");
        return Err(EstimationError::SingularInformationMatrix { ratio });
    }

    let inverse_eigvals = eigvals.mapv(|lambda| 1.0 / lambda);
    let scaled_inverse = (&eigvecs * &inverse_eigvals).dot(&eigvecs.t());
    let column_scale = scale.view().insert_axis(Axis(1));
    let raw = &(&scaled_inverse * &column_scale) * &scale;
    let covariance = symmetrize(&raw);

    log::debug!(
        "Inverted {}x{} Fisher information (scaled eigenvalue ratio {ratio:.3e})",
        covariance.nrows(),
        covariance.ncols()
    );
    Ok(CovarianceEstimate::from_matrix(covariance))
}

// The two triangles differ only by rounding; average them.
fn symmetrize(matrix: &Array2<f64>) -> Array2<f64> {
    (matrix + &matrix.t()) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irls::fit_model;
    use crate::model::FitConfig;
    use approx::assert_abs_diff_eq;
    use crate::irls::{fisher_information, with_intercept};
    use crate::types::LinearPredictor;
    use ndarray::{array, concatenate};

    #[test]
    fn test_inverse_times_information_is_identity() {
        let information = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let covariance = invert_information(&information).unwrap();
        let product = information.dot(covariance.matrix());
        let identity = Array2::<f64>::eye(3);
        for (a, b) in product.iter().zip(identity.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_eq!(covariance.matrix(), &covariance.matrix().t().to_owned());
    }

    #[test]
    fn test_standard_errors_are_root_diagonal() {
        let covariance = CovarianceEstimate::from_matrix(array![[4.0, 0.3], [0.3, 0.25]]);
        let se = covariance.standard_errors();
        assert_abs_diff_eq!(se[0], 2.0, epsilon = 1e-15);
        assert_abs_diff_eq!(se[1], 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(
            covariance.quadratic_form(array![1.0, 2.0].view()),
            4.0 + 2.0 * 0.6 + 4.0 * 0.25,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_singular_information_is_an_error() {
        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(matches!(
            invert_information(&singular),
            Err(EstimationError::SingularInformationMatrix { .. })
        ));

        let non_finite = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        assert!(matches!(
            invert_information(&non_finite),
            Err(EstimationError::SingularInformationMatrix { .. })
        ));
    }

    #[test]
    fn test_collinear_design_fails_with_singular_information() {
        let x1 = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0]];
        let x2 = x1.mapv(|v| 3.0 * v);
        let x = concatenate(Axis(1), &[x1.view(), x2.view()]).unwrap();
        let y = array![false, true, false, false, true, true, false, true];

        let model = fit_model(x.view(), y.view(), &FitConfig::default()).unwrap();
        assert!(matches!(
            estimate_covariance(&model, x.view(), y.view()),
            Err(EstimationError::SingularInformationMatrix { .. })
        ));
    }

    #[test]
    fn test_estimate_rejects_mismatched_design() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [1.5]];
        let y = array![false, true, false, true, true];
        let model = fit_model(x.view(), y.view(), &FitConfig::default()).unwrap();

        let wider = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 1.0], [1.5, 1.0]];
        assert!(matches!(
            estimate_covariance(&model, wider.view(), y.view()),
            Err(EstimationError::DimensionMismatch { .. })
        ));

        let covariance = estimate_covariance(&model, x.view(), y.view()).unwrap();
        assert_eq!(covariance.dim(), 2);
        assert!(covariance.standard_errors().iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn test_badly_scaled_information_is_inverted() {
        // Raw eigenvalue ratio 1e-14, well conditioned after scaling.
        let information = array![[1e14, 2e6], [2e6, 1.0]];
        let covariance = invert_information(&information).unwrap();
        let product = information.dot(covariance.matrix());
        assert_abs_diff_eq!(product[[0, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(product[[1, 1]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(product[[0, 1]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(product[[1, 0]], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_covariance_matches_uncentered_information() {
        let x = array![[0.5], [1.0], [2.0], [3.0], [1.5], [4.0], [2.5]];
        let y = array![false, true, false, true, true, true, false];
        let config = FitConfig {
            convergence_tolerance: 1e-10,
            max_iterations: 100,
        };
        let model = fit_model(x.view(), y.view(), &config).unwrap();
        let covariance = estimate_covariance(&model, x.view(), y.view()).unwrap();

        let eta = LinearPredictor::new(x.column(0).mapv(|v| model.intercept() + model.weights()[0] * v));
        let weights = eta.probabilities().mapv(|p| p * (1.0 - p));
        let direct = fisher_information(with_intercept(x.view()).view(), weights.view());
        let expected = invert_information(&direct).unwrap();
        for (a, b) in covariance.matrix().iter().zip(expected.matrix().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }
}
