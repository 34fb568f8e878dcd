//! # Binomial GLM Fitting (logit link)
//!
//! Fisher scoring, written as iteratively reweighted least squares. Each
//! iteration solves the weighted normal equations `X'WX b = X'Wz` with a
//! Cholesky factorization. Design columns that are linear combinations of
//! earlier columns are aliased up front: they get no coefficient and do not
//! count towards the model rank, which keeps likelihood-ratio degrees of
//! freedom honest when a category is confounded with another.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{InverseC, SolveC};
use thiserror::Error;

const PROB_EPS: f64 = 1e-10;
const MIN_WEIGHT: f64 = 1e-12;
const ALIAS_TOLERANCE: f64 = 1e-7;
const MAX_STEP_HALVINGS: usize = 30;

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("Cannot fit a model with {rows} rows and {cols} columns.")]
    EmptyDesign { rows: usize, cols: usize },
    #[error("Design matrix has {rows} rows but the response has {response} entries.")]
    DimensionMismatch { rows: usize, response: usize },
    #[error("The response must be coded 0/1; found {0} at some row.")]
    NonBinaryResponse(f64),
    #[error("The design matrix contains non-finite values in column {0}.")]
    NonFiniteDesign(usize),
    #[error("The Fisher information matrix is singular: {0}")]
    SingularInformation(LinalgError),
}

/// Tuning for the scoring iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlmConfig {
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            convergence_tolerance: 1e-8,
        }
    }
}

/// A fitted logistic regression.
///
/// `coefficients` and `std_errors` have one entry per design column; aliased
/// columns hold `NaN` in both.
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub coefficients: Array1<f64>,
    pub std_errors: Array1<f64>,
    pub aliased: Vec<bool>,
    /// Covariance of the estimable coefficients, in design-column order with
    /// aliased columns removed.
    pub covariance: Array2<f64>,
    pub deviance: f64,
    pub null_deviance: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub nobs: usize,
    pub rank: usize,
    pub df_residual: usize,
    pub df_null: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Some fitted probability came numerically within reach of 0 or 1.
    pub boundary: bool,
}

#[inline]
fn inverse_logit(eta: f64) -> f64 {
    let p = 1.0 / (1.0 + (-eta.clamp(-700.0, 700.0)).exp());
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

/// Binomial deviance for 0/1 responses: `-2 * sum(y ln mu + (1 - y) ln(1 - mu))`.
pub fn binomial_deviance(y: ArrayView1<f64>, mu: ArrayView1<f64>) -> f64 {
    let total = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui = mui.clamp(PROB_EPS, 1.0 - PROB_EPS);
        let term = if yi > 0.5 { mui.ln() } else { (1.0 - mui).ln() };
        acc + term
    });
    -2.0 * total
}

/// Flags design columns that lie (numerically) in the span of the columns
/// before them, using modified Gram-Schmidt with one re-orthogonalization pass.
pub fn aliased_columns(x: ArrayView2<f64>) -> Vec<bool> {
    let mut basis: Vec<Array1<f64>> = Vec::new();
    let mut aliased = Vec::with_capacity(x.ncols());
    for column in x.axis_iter(Axis(1)) {
        let original_norm = column.dot(&column).sqrt();
        let mut v = column.to_owned();
        for _ in 0..2 {
            for q in &basis {
                let projection = q.dot(&v);
                v.scaled_add(-projection, q);
            }
        }
        let norm = v.dot(&v).sqrt();
        if original_norm == 0.0 || norm <= ALIAS_TOLERANCE * original_norm {
            aliased.push(true);
        } else {
            v /= norm;
            basis.push(v);
            aliased.push(false);
        }
    }
    aliased
}

/// Row-scales the design by the weights and returns `(WX, X'WX)`.
fn weighted_gram(x: &Array2<f64>, weights: &Array1<f64>) -> (Array2<f64>, Array2<f64>) {
    let xw = x * &weights.view().insert_axis(Axis(1));
    let gram = xw.t().dot(x);
    (xw, gram)
}

/// Fits `y ~ x` by maximum likelihood with a logit link.
///
/// `x` must already contain the intercept column if one is wanted.
pub fn fit_logistic(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    config: &GlmConfig,
) -> Result<GlmFit, GlmError> {
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return Err(GlmError::EmptyDesign { rows: n, cols: p });
    }
    if y.len() != n {
        return Err(GlmError::DimensionMismatch {
            rows: n,
            response: y.len(),
        });
    }
    if let Some(&bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(GlmError::NonBinaryResponse(bad));
    }
    if let Some(col) = (0..p).find(|&j| x.column(j).iter().any(|v| !v.is_finite())) {
        return Err(GlmError::NonFiniteDesign(col));
    }

    let aliased = aliased_columns(x);
    let kept: Vec<usize> = (0..p).filter(|&j| !aliased[j]).collect();
    if kept.len() < p {
        log::warn!(
            "{} of {} design columns are aliased and will not be estimated",
            p - kept.len(),
            p
        );
    }
    let xk = x.select(Axis(1), &kept);

    // Standard binomial starting values.
    let mut mu = y.mapv(|yi| (yi + 0.5) / 2.0);
    let mut eta = mu.mapv(|m| (m / (1.0 - m)).ln());
    let mut deviance = binomial_deviance(y, mu.view());
    let mut beta: Option<Array1<f64>> = None;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=config.max_iterations {
        iterations = iter;
        let weights = mu.mapv(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
        let z = &eta + &((&y - &mu) / &weights);
        let (xw, xtwx) = weighted_gram(&xk, &weights);
        let xtwz = xw.t().dot(&z);
        let mut candidate = xtwx
            .solvec(&xtwz)
            .map_err(GlmError::SingularInformation)?;

        let mut eta_new = xk.dot(&candidate);
        let mut mu_new = eta_new.mapv(inverse_logit);
        let mut deviance_new = binomial_deviance(y, mu_new.view());

        // Step-halving towards the previous coefficients when the deviance
        // blows up or increases.
        if let Some(previous) = beta.as_ref() {
            let mut halvings = 0;
            while (!deviance_new.is_finite() || deviance_new > deviance * (1.0 + 1e-12))
                && halvings < MAX_STEP_HALVINGS
            {
                candidate = (&candidate + previous) / 2.0;
                eta_new = xk.dot(&candidate);
                mu_new = eta_new.mapv(inverse_logit);
                deviance_new = binomial_deviance(y, mu_new.view());
                halvings += 1;
            }
            if halvings > 0 {
                log::debug!("IRLS iteration {iter}: {halvings} step halving(s)");
            }
        }

        let change = (deviance_new - deviance).abs() / (deviance_new.abs() + 0.1);
        log::debug!("IRLS iteration {iter}: deviance {deviance_new:.8}, relative change {change:.3e}");
        beta = Some(candidate);
        eta = eta_new;
        mu = mu_new;
        deviance = deviance_new;
        if change < config.convergence_tolerance {
            converged = true;
            break;
        }
    }

    let beta = beta.unwrap_or_else(|| Array1::zeros(kept.len()));
    if !converged {
        log::warn!(
            "IRLS did not converge after {} iterations (deviance {deviance:.6})",
            config.max_iterations
        );
    }
    let boundary = mu
        .iter()
        .any(|&m| m <= 10.0 * PROB_EPS || m >= 1.0 - 10.0 * PROB_EPS);
    if boundary {
        log::warn!("Fitted probabilities numerically 0 or 1 occurred");
    }

    let weights = mu.mapv(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
    let (_, information) = weighted_gram(&xk, &weights);
    let covariance = information
        .invc()
        .map_err(GlmError::SingularInformation)?;

    let mut coefficients = Array1::from_elem(p, f64::NAN);
    let mut std_errors = Array1::from_elem(p, f64::NAN);
    for (k, &j) in kept.iter().enumerate() {
        coefficients[j] = beta[k];
        std_errors[j] = covariance[[k, k]].max(0.0).sqrt();
    }

    let y_mean = y.mean().unwrap_or(0.5);
    let null_mu = Array1::from_elem(n, y_mean);
    let null_deviance = binomial_deviance(y, null_mu.view());
    let rank = kept.len();

    Ok(GlmFit {
        coefficients,
        std_errors,
        aliased,
        covariance,
        deviance,
        null_deviance,
        log_likelihood: -deviance / 2.0,
        aic: deviance + 2.0 * rank as f64,
        nobs: n,
        rank,
        df_residual: n.saturating_sub(rank),
        df_null: n.saturating_sub(1),
        iterations,
        converged,
        boundary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn with_intercept(columns: &[&[f64]]) -> Array2<f64> {
        let n = columns[0].len();
        let mut x = Array2::ones((n, columns.len() + 1));
        for (j, column) in columns.iter().enumerate() {
            for (i, &v) in column.iter().enumerate() {
                x[[i, j + 1]] = v;
            }
        }
        x
    }

    #[test]
    fn intercept_only_matches_log_odds() {
        let y = array![1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let x = Array2::ones((10, 1));
        let fit = fit_logistic(x.view(), y.view(), &GlmConfig::default()).unwrap();
        assert!(fit.converged);
        assert_abs_diff_eq!(fit.coefficients[0], (0.6f64 / 0.4).ln(), epsilon = 1e-8);
        // se = 1 / sqrt(n p (1 - p))
        assert_abs_diff_eq!(fit.std_errors[0], 1.0 / (10.0f64 * 0.24).sqrt(), epsilon = 1e-6);
        assert_abs_diff_eq!(fit.deviance, fit.null_deviance, epsilon = 1e-8);
        assert_eq!(fit.rank, 1);
        assert_eq!(fit.df_residual, 9);
    }

    #[test]
    fn binary_predictor_recovers_cell_log_odds() {
        // Group 0: 2 of 6 succeed, group 1: 4 of 6 succeed.
        let g = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let y = array![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0];
        let x = with_intercept(&[&g]);
        let fit = fit_logistic(x.view(), y.view(), &GlmConfig::default()).unwrap();
        let base = (2.0f64 / 4.0).ln();
        let treated = (4.0f64 / 2.0).ln();
        assert_abs_diff_eq!(fit.coefficients[0], base, epsilon = 1e-7);
        assert_abs_diff_eq!(fit.coefficients[1], treated - base, epsilon = 1e-7);
        assert!(fit.deviance < fit.null_deviance);
        assert_abs_diff_eq!(fit.aic, fit.deviance + 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.log_likelihood, -fit.deviance / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn duplicated_column_is_aliased() {
        let a = [0.1, 0.5, 0.2, 0.9, 0.4, 0.7, 0.3, 0.8];
        let doubled: Vec<f64> = a.iter().map(|v| v * 2.0).collect();
        let y = array![0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let x = with_intercept(&[&a, &doubled]);
        let fit = fit_logistic(x.view(), y.view(), &GlmConfig::default()).unwrap();
        assert_eq!(fit.aliased, vec![false, false, true]);
        assert_eq!(fit.rank, 2);
        assert!(fit.coefficients[2].is_nan());
        assert!(fit.std_errors[2].is_nan());
        assert_eq!(fit.covariance.dim(), (2, 2));
    }

    #[test]
    fn aliasing_detects_dummy_trap() {
        let x = array![
            [1.0, 1.0, 0.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
            [1.0, 0.0, 1.0]
        ];
        assert_eq!(aliased_columns(x.view()), vec![false, false, true]);
    }

    #[test]
    fn rejects_non_binary_response() {
        let x = Array2::ones((3, 1));
        let y = array![0.0, 1.0, 2.0];
        assert!(matches!(
            fit_logistic(x.view(), y.view(), &GlmConfig::default()),
            Err(GlmError::NonBinaryResponse(v)) if v == 2.0
        ));
    }

    #[test]
    fn rejects_empty_design() {
        let x = Array2::<f64>::zeros((0, 1));
        let y = Array1::<f64>::zeros(0);
        assert!(matches!(
            fit_logistic(x.view(), y.view(), &GlmConfig::default()),
            Err(GlmError::EmptyDesign { .. })
        ));
    }
}
