//! # Reporting
//!
//! Tidy coefficient tables with odds ratios, text summaries, the
//! likelihood-ratio report and the run's CSV artifacts. Every artifact is
//! rendered in memory first and then written through a temporary file in the
//! output directory that is renamed into place, so a file is either complete
//! or absent.

use crate::glm::GlmFit;
use crate::lrtest::LrTest;
use crate::model::FittedModel;
use crate::superset::NaCount;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt::{self, Write as FmtWrite};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Normal quantile used for the 95% Wald interval.
pub const WALD_Z: f64 = 1.96;

pub const NA_REPORT_FILE: &str = "na_report_superset.csv";
pub const LR_TESTS_FILE: &str = "lr_tests.txt";
pub const FIT_STATS_FILE: &str = "model_fit_stats.csv";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize CSV output: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Failed to render report text: {0}")]
    FormatError(#[from] fmt::Error),
    #[error("Failed to move finished artifact into place at '{}': {source}", .path.display())]
    PersistError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One row of a tidy coefficient table. Aliased terms carry no values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TidyRow {
    pub term: String,
    pub estimate: Option<f64>,
    pub std_error: Option<f64>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub odds_ratio: Option<f64>,
    pub conf_low_or: Option<f64>,
    pub conf_high_or: Option<f64>,
}

/// Per-model fit statistics, one row per fitted model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitStats {
    pub model: String,
    pub nobs: usize,
    pub rank: usize,
    pub deviance: f64,
    pub null_deviance: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Two-sided normal p-value for a Wald statistic.
pub fn wald_p_value(z: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) if z.is_finite() => 2.0 * normal.sf(z.abs()),
        _ => f64::NAN,
    }
}

/// Exponentiated estimate and its 95% Wald interval: `exp(b)`,
/// `exp(b - 1.96 se)`, `exp(b + 1.96 se)`.
pub fn odds_ratio_interval(estimate: f64, std_error: f64) -> (f64, f64, f64) {
    (
        estimate.exp(),
        (estimate - WALD_Z * std_error).exp(),
        (estimate + WALD_Z * std_error).exp(),
    )
}

/// Coefficient table for a fitted model, one row per design term.
pub fn tidy(model: &FittedModel) -> Vec<TidyRow> {
    tidy_fit(&model.term_names, &model.fit)
}

fn tidy_fit(term_names: &[String], fit: &GlmFit) -> Vec<TidyRow> {
    term_names
        .iter()
        .enumerate()
        .map(|(j, term)| {
            if fit.aliased[j] {
                return TidyRow {
                    term: term.clone(),
                    estimate: None,
                    std_error: None,
                    statistic: None,
                    p_value: None,
                    odds_ratio: None,
                    conf_low_or: None,
                    conf_high_or: None,
                };
            }
            let estimate = fit.coefficients[j];
            let std_error = fit.std_errors[j];
            let statistic = estimate / std_error;
            let (odds_ratio, low, high) = odds_ratio_interval(estimate, std_error);
            TidyRow {
                term: term.clone(),
                estimate: Some(estimate),
                std_error: Some(std_error),
                statistic: Some(statistic),
                p_value: Some(wald_p_value(statistic)),
                odds_ratio: Some(odds_ratio),
                conf_low_or: Some(low),
                conf_high_or: Some(high),
            }
        })
        .collect()
}

pub fn fit_stats(model: &FittedModel) -> FitStats {
    FitStats {
        model: model.name.clone(),
        nobs: model.fit.nobs,
        rank: model.fit.rank,
        deviance: model.fit.deviance,
        null_deviance: model.fit.null_deviance,
        log_likelihood: model.fit.log_likelihood,
        aic: model.fit.aic,
        iterations: model.fit.iterations,
        converged: model.fit.converged,
    }
}

fn format_p(p: f64) -> String {
    if p.is_nan() {
        "NA".to_string()
    } else if p < 2e-16 {
        "<2e-16".to_string()
    } else if p < 1e-4 {
        format!("{p:.2e}")
    } else {
        format!("{p:.4}")
    }
}

fn format_opt(value: Option<f64>, width: usize) -> String {
    match value {
        Some(v) => format!("{v:>width$.5}"),
        None => format!("{:>width$}", "NA"),
    }
}

/// Human-readable model summary in the familiar GLM layout.
pub fn summary_text(model: &FittedModel) -> Result<String, fmt::Error> {
    let fit = &model.fit;
    let rows = tidy(model);
    let term_width = rows.iter().map(|r| r.term.len()).max().unwrap_or(0).max(11);
    let mut out = String::new();

    writeln!(out, "Model: {}", model.name)?;
    writeln!(out)?;
    writeln!(out, "Call:")?;
    writeln!(
        out,
        "glm(formula = {}, family = binomial(link = \"logit\"), data = superset)",
        model.formula
    )?;
    writeln!(out)?;
    writeln!(out, "Coefficients:")?;
    writeln!(
        out,
        "{:<term_width$} {:>12} {:>12} {:>10} {:>10}",
        "", "Estimate", "Std. Error", "z value", "Pr(>|z|)"
    )?;
    for row in &rows {
        writeln!(
            out,
            "{:<term_width$} {} {} {} {:>10}",
            row.term,
            format_opt(row.estimate, 12),
            format_opt(row.std_error, 12),
            format_opt(row.statistic, 10),
            row.p_value.map_or("NA".to_string(), format_p)
        )?;
    }
    let aliased: Vec<&str> = rows
        .iter()
        .filter(|r| r.estimate.is_none())
        .map(|r| r.term.as_str())
        .collect();
    if !aliased.is_empty() {
        writeln!(
            out,
            "({} not defined because of singularities: {})",
            aliased.len(),
            aliased.join(", ")
        )?;
    }
    writeln!(out)?;
    writeln!(out, "(Dispersion parameter for binomial family taken to be 1)")?;
    writeln!(out)?;
    writeln!(
        out,
        "    Null deviance: {:.3}  on {} degrees of freedom",
        fit.null_deviance, fit.df_null
    )?;
    writeln!(
        out,
        "Residual deviance: {:.3}  on {} degrees of freedom",
        fit.deviance, fit.df_residual
    )?;
    writeln!(out, "AIC: {:.3}", fit.aic)?;
    writeln!(out, "Log-likelihood: {:.3} (df = {})", fit.log_likelihood, fit.rank)?;
    writeln!(out)?;
    writeln!(out, "Number of Fisher Scoring iterations: {}", fit.iterations)?;
    writeln!(out, "Converged: {}", if fit.converged { "yes" } else { "no" })?;
    if fit.boundary {
        writeln!(out, "Warning: fitted probabilities numerically 0 or 1 occurred")?;
    }
    writeln!(out, "Number of observations: {}", fit.nobs)?;
    Ok(out)
}

/// Sequential text report: header line, test table, blank line per pair.
pub fn lr_report_text(tests: &[LrTest]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for test in tests {
        writeln!(out, "=== {} vs {} ===", test.restricted, test.full)?;
        writeln!(out, "Likelihood ratio test")?;
        writeln!(out)?;
        writeln!(out, "Model 1: {}", test.restricted_formula)?;
        writeln!(out, "Model 2: {}", test.full_formula)?;
        writeln!(
            out,
            "  {:>4} {:>12} {:>3} {:>10} {:>10}",
            "#Df", "LogLik", "Df", "Chisq", "Pr(>Chisq)"
        )?;
        writeln!(out, "1 {:>4} {:>12.4}", test.restricted_df, test.restricted_loglik)?;
        writeln!(
            out,
            "2 {:>4} {:>12.4} {:>3} {:>10.4} {:>10}",
            test.full_df,
            test.full_loglik,
            test.df,
            test.statistic,
            format_p(test.p_value)
        )?;
        writeln!(out)?;
    }
    Ok(out)
}

/// Serializes rows to CSV bytes, header first.
pub fn csv_bytes<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ReportError::IoError(e.into_error()))
}

/// Writes `bytes` to `path` via a sibling temporary file and an atomic rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ReportError::PersistError {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

pub fn ensure_output_dir(dir: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(dir)?;
    Ok(())
}

pub fn write_na_report(dir: &Path, report: &[NaCount]) -> Result<PathBuf, ReportError> {
    let path = dir.join(NA_REPORT_FILE);
    write_atomic(&path, &csv_bytes(report)?)?;
    Ok(path)
}

fn model_artifact_paths(dir: &Path, name: &str) -> [PathBuf; 2] {
    [
        dir.join(format!("{name}_coeffs.csv")),
        dir.join(format!("{name}_summary.txt")),
    ]
}

/// Writes `<model>_coeffs.csv` and `<model>_summary.txt`.
pub fn write_model_artifacts(dir: &Path, model: &FittedModel) -> Result<Vec<PathBuf>, ReportError> {
    let [coeffs, summary] = model_artifact_paths(dir, &model.name);
    write_atomic(&coeffs, &csv_bytes(&tidy(model))?)?;
    write_atomic(&summary, summary_text(model)?.as_bytes())?;
    Ok(vec![coeffs, summary])
}

/// Deletes artifacts a previous run wrote for a model this run did not fit.
/// Returns the paths that were removed.
pub fn remove_model_artifacts(dir: &Path, name: &str) -> Result<Vec<PathBuf>, ReportError> {
    let mut removed = Vec::new();
    for path in model_artifact_paths(dir, name) {
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed stale {}", path.display());
                removed.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

pub fn write_fit_stats(dir: &Path, models: &[&FittedModel]) -> Result<PathBuf, ReportError> {
    let path = dir.join(FIT_STATS_FILE);
    let rows: Vec<FitStats> = models.iter().map(|m| fit_stats(m)).collect();
    write_atomic(&path, &csv_bytes(&rows)?)?;
    Ok(path)
}

pub fn write_lr_tests(dir: &Path, tests: &[LrTest]) -> Result<PathBuf, ReportError> {
    let path = dir.join(LR_TESTS_FILE);
    write_atomic(&path, lr_report_text(tests)?.as_bytes())?;
    Ok(path)
}
