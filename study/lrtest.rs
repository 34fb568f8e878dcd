//! Likelihood-ratio tests between nested fitted models.

use crate::model::{FittedModel, M1_BASE, M2_PREPACKAGED, M3_LATE_FILER, M4_FULL, SpecOutcome};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use thiserror::Error;

/// The (restricted, full) pairs compared after fitting.
pub const COMPARISONS: [(&str, &str); 4] = [
    (M1_BASE, M2_PREPACKAGED),
    (M1_BASE, M3_LATE_FILER),
    (M2_PREPACKAGED, M4_FULL),
    (M3_LATE_FILER, M4_FULL),
];

#[derive(Error, Debug, PartialEq)]
pub enum LrTestError {
    #[error("Model '{restricted}' is not nested in '{full}': predictor set is not a strict subset.")]
    NotNested { restricted: String, full: String },
    #[error("Models '{restricted}' ({restricted_nobs} rows) and '{full}' ({full_nobs} rows) were fit on different samples.")]
    SampleMismatch {
        restricted: String,
        full: String,
        restricted_nobs: usize,
        full_nobs: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LrTest {
    pub restricted: String,
    pub full: String,
    pub restricted_formula: String,
    pub full_formula: String,
    /// Number of estimated parameters of each model.
    pub restricted_df: usize,
    pub full_df: usize,
    pub restricted_loglik: f64,
    pub full_loglik: f64,
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Compares `restricted` against the larger `full` model.
pub fn likelihood_ratio_test(
    restricted: &FittedModel,
    full: &FittedModel,
) -> Result<LrTest, LrTestError> {
    let strict_subset = restricted.predictors.len() < full.predictors.len()
        && restricted
            .predictors
            .iter()
            .all(|p| full.predictors.contains(p));
    if !strict_subset {
        return Err(LrTestError::NotNested {
            restricted: restricted.name.clone(),
            full: full.name.clone(),
        });
    }
    if restricted.fit.nobs != full.fit.nobs {
        return Err(LrTestError::SampleMismatch {
            restricted: restricted.name.clone(),
            full: full.name.clone(),
            restricted_nobs: restricted.fit.nobs,
            full_nobs: full.fit.nobs,
        });
    }

    let statistic = (restricted.fit.deviance - full.fit.deviance).max(0.0);
    let df = full.fit.rank.saturating_sub(restricted.fit.rank);
    let p_value = chi_squared_sf(statistic, df);

    Ok(LrTest {
        restricted: restricted.name.clone(),
        full: full.name.clone(),
        restricted_formula: restricted.formula.clone(),
        full_formula: full.formula.clone(),
        restricted_df: restricted.fit.rank,
        full_df: full.fit.rank,
        restricted_loglik: restricted.fit.log_likelihood,
        full_loglik: full.fit.log_likelihood,
        statistic,
        df,
        p_value,
    })
}

/// Upper tail of the chi-squared distribution; `NaN` for zero degrees of freedom.
pub fn chi_squared_sf(statistic: f64, df: usize) -> f64 {
    match ChiSquared::new(df as f64) {
        Ok(dist) if df > 0 => dist.sf(statistic),
        _ => f64::NAN,
    }
}

/// Runs every comparison in [`COMPARISONS`] whose two models were both fitted.
pub fn run_comparisons(outcomes: &[SpecOutcome]) -> Result<Vec<LrTest>, LrTestError> {
    let find = |name: &str| {
        outcomes
            .iter()
            .find(|o| o.name() == name)
            .and_then(SpecOutcome::fitted)
    };
    let mut tests = Vec::new();
    for (restricted, full) in COMPARISONS {
        match (find(restricted), find(full)) {
            (Some(r), Some(f)) => {
                let test = likelihood_ratio_test(r, f)?;
                log::info!(
                    "LR test {restricted} vs {full}: chisq {:.4} on {} df, p = {:.4}",
                    test.statistic,
                    test.df,
                    test.p_value
                );
                tests.push(test);
            }
            _ => log::info!("LR test {restricted} vs {full} skipped: a model was not fitted"),
        }
    }
    Ok(tests)
}
