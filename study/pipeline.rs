//! # Study Pipeline
//!
//! The run is split into two explicit phases:
//!
//! 1. [`prepare_sample`] reads the input, builds the model frame, assembles the
//!    superset, records the missing-value report, then imputes and prunes the
//!    superset exactly once.
//! 2. [`fit_phase`] fits every nested specification against that one
//!    prepared sample and runs the likelihood-ratio comparisons.
//!
//! Nothing in phase 2 can change the rows a model sees, so all fits share the
//! same observation count.

use crate::config::{ConfigError, StudyConfig};
use crate::extract::{ExtractError, extract_records};
use crate::features::{FeatureError, OUTCOME, build_model_frame};
use crate::frame::Frame;
use crate::glm::GlmConfig;
use crate::impute::{impute, prune_degenerate};
use crate::lrtest::{LrTest, LrTestError, run_comparisons};
use crate::model::{ModelError, ModelSpec, SpecOutcome, fit_nested_models, nested_specs, superset_variables};
use crate::report::{self, ReportError};
use crate::superset::{NaCount, assemble_superset};
use std::path::PathBuf;
use thiserror::Error;

/// Every way a study run can fail. All variants end the run.
#[derive(Error, Debug)]
pub enum StudyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    LrTest(#[from] LrTestError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Output of phase 1: the imputed, pruned superset every model is fit on.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    pub frame: Frame,
    /// Missing counts measured on the superset before imputation.
    pub na_report: Vec<NaCount>,
    /// Predictors removed for having fewer than two distinct values.
    pub dropped: Vec<String>,
}

/// Output of phase 2.
#[derive(Debug, Clone)]
pub struct StudyResults {
    pub outcomes: Vec<SpecOutcome>,
    pub lr_tests: Vec<LrTest>,
}

/// Paths of everything a full run wrote.
#[derive(Debug, Clone, Default)]
pub struct WrittenArtifacts {
    pub paths: Vec<PathBuf>,
}

/// Builds the analysis sample from a model frame: superset, missing-value
/// report, one imputation, one pruning pass.
pub fn prepare_frame(model_frame: &Frame, specs: &[ModelSpec]) -> PreparedSample {
    let variables = superset_variables(specs);
    let superset = assemble_superset(model_frame, &variables, OUTCOME);
    let imputed = impute(superset.frame, OUTCOME);
    let (frame, dropped) = prune_degenerate(imputed, OUTCOME);
    log::info!(
        "Prepared sample: {} rows, {} columns ({} degenerate predictor(s) dropped)",
        frame.nrows(),
        frame.ncols(),
        dropped.len()
    );
    PreparedSample {
        frame,
        na_report: superset.na_report,
        dropped,
    }
}

/// Phase 1 from the configured input file.
pub fn prepare_sample(config: &StudyConfig, specs: &[ModelSpec]) -> Result<PreparedSample, StudyError> {
    config.validate()?;
    let records = extract_records(&config.input, &config.sheet)?;
    let model_frame = build_model_frame(&records, config.cap_quantile)?;
    Ok(prepare_frame(&model_frame, specs))
}

/// Phase 2: fit all specifications on the prepared sample and compare them.
pub fn fit_phase(
    sample: &PreparedSample,
    specs: &[ModelSpec],
    glm: &GlmConfig,
) -> Result<StudyResults, StudyError> {
    let outcomes = fit_nested_models(&sample.frame, OUTCOME, specs, glm)?;
    let lr_tests = run_comparisons(&outcomes)?;
    Ok(StudyResults { outcomes, lr_tests })
}

/// Writes the model-level artifacts for a completed fit phase and removes
/// those left over from earlier runs for specifications skipped this time.
pub fn write_results(config: &StudyConfig, results: &StudyResults) -> Result<WrittenArtifacts, StudyError> {
    report::ensure_output_dir(&config.output_dir)?;
    let mut written = WrittenArtifacts::default();
    let fitted: Vec<_> = results
        .outcomes
        .iter()
        .filter_map(SpecOutcome::fitted)
        .collect();
    for model in &fitted {
        written
            .paths
            .extend(report::write_model_artifacts(&config.output_dir, model)?);
    }
    for outcome in &results.outcomes {
        if let SpecOutcome::Skipped { name, .. } = outcome {
            report::remove_model_artifacts(&config.output_dir, name)?;
        }
    }
    written
        .paths
        .push(report::write_fit_stats(&config.output_dir, &fitted)?);
    written
        .paths
        .push(report::write_lr_tests(&config.output_dir, &results.lr_tests)?);
    Ok(written)
}

/// Runs only phase 1 and writes the missing-value report.
pub fn inspect(config: &StudyConfig) -> Result<(PreparedSample, PathBuf), StudyError> {
    let sample = prepare_sample(config, &nested_specs())?;
    report::ensure_output_dir(&config.output_dir)?;
    let path = report::write_na_report(&config.output_dir, &sample.na_report)?;
    Ok((sample, path))
}

/// Full run: prepare, write the missing-value report, fit, write model artifacts.
pub fn run_study(config: &StudyConfig) -> Result<(StudyResults, WrittenArtifacts), StudyError> {
    let specs = nested_specs();
    let (sample, na_path) = inspect(config)?;
    let glm = GlmConfig {
        max_iterations: config.max_iterations,
        convergence_tolerance: config.convergence_tolerance,
    };
    let results = fit_phase(&sample, &specs, &glm)?;
    let mut written = write_results(config, &results)?;
    written.paths.insert(0, na_path);
    Ok((results, written))
}
