//! # Nested Model Specifications and Fitting
//!
//! Four specifications share one base predictor list and differ only by the
//! optional `prepackaged` and `late_filer_flag_180d` terms. All of them are fit
//! against the same imputed, pruned superset; this module never filters rows.

use crate::features::{
    EBIT_TO_ASSETS, EBIT_TO_LIAB, LATE_FILER, LEVERAGE, LOG_ASSETS, LOG_EMPL, NI_TO_ASSETS,
    PREPACKAGED,
};
use crate::frame::{Column, Frame};
use crate::glm::{GlmConfig, GlmError, GlmFit, fit_logistic};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use thiserror::Error;

pub const INTERCEPT: &str = "(Intercept)";

/// Base predictors in display order.
pub const BASE_PREDICTORS: [&str; 11] = [
    LOG_ASSETS,
    LOG_EMPL,
    LEVERAGE,
    EBIT_TO_ASSETS,
    NI_TO_ASSETS,
    EBIT_TO_LIAB,
    "voluntary",
    "ceo_replaced",
    "chapter",
    "claimsagent",
    "commcred",
];

pub const M1_BASE: &str = "M1_base";
pub const M2_PREPACKAGED: &str = "M2_base_plus_prepackaged";
pub const M3_LATE_FILER: &str = "M3_base_plus_latefiler";
pub const M4_FULL: &str = "M4_full_plus_latefiler";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model '{model}' has no usable predictors left after pruning degenerate columns.")]
    EmptyPredictorSet { model: String },
    #[error("Column '{0}' is not present in the analysis frame.")]
    MissingColumn(String),
    #[error("Column '{0}' still contains missing values; imputation must run before fitting.")]
    UnimputedColumn(String),
    #[error("Fitting model '{model}' failed: {source}")]
    Glm {
        model: String,
        #[source]
        source: GlmError,
    },
}

/// A named specification: the base list plus the optional terms it adds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    /// Terms whose absence from the pruned frame makes this specification skip.
    pub optional_terms: Vec<&'static str>,
}

impl ModelSpec {
    /// Full predictor list in display order.
    pub fn predictors(&self) -> Vec<&'static str> {
        BASE_PREDICTORS
            .iter()
            .copied()
            .chain(self.optional_terms.iter().copied())
            .collect()
    }
}

/// Base, Base+prepackaged, Base+late-filer, Base+both.
pub fn nested_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            name: M1_BASE,
            optional_terms: vec![],
        },
        ModelSpec {
            name: M2_PREPACKAGED,
            optional_terms: vec![PREPACKAGED],
        },
        ModelSpec {
            name: M3_LATE_FILER,
            optional_terms: vec![LATE_FILER],
        },
        ModelSpec {
            name: M4_FULL,
            optional_terms: vec![PREPACKAGED, LATE_FILER],
        },
    ]
}

/// Union of every variable referenced by `specs`, first-seen order.
pub fn superset_variables(specs: &[ModelSpec]) -> Vec<&'static str> {
    specs
        .iter()
        .flat_map(ModelSpec::predictors)
        .unique()
        .collect()
}

/// `outcome ~ a + b + c`. Predictor order only affects display.
pub fn formula<S: AsRef<str>>(outcome: &str, predictors: &[S]) -> String {
    format!(
        "{outcome} ~ {}",
        predictors.iter().map(|p| p.as_ref()).join(" + ")
    )
}

/// Numeric design for one specification.
#[derive(Debug, Clone)]
pub struct Design {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    /// One name per design column, intercept first.
    pub term_names: Vec<String>,
}

/// Observed levels of a categorical column in natural order; the first is the
/// reference level under treatment contrasts.
pub fn levels(values: &[Option<String>]) -> Vec<String> {
    values
        .iter()
        .flatten()
        .unique()
        .sorted_by(|a, b| natord::compare(a, b))
        .cloned()
        .collect()
}

/// Expands predictors into design columns: numeric columns as-is, categorical
/// columns as treatment-coded dummies named `<variable><level>`.
pub fn build_design<S: AsRef<str>>(
    frame: &Frame,
    outcome: &str,
    predictors: &[S],
) -> Result<Design, ModelError> {
    let n = frame.nrows();
    let y = match frame.column(outcome) {
        Some(Column::Numeric(values)) => Array1::from_vec(values.clone()),
        Some(_) => return Err(ModelError::UnimputedColumn(outcome.to_string())),
        None => return Err(ModelError::MissingColumn(outcome.to_string())),
    };
    if y.iter().any(|v| v.is_nan()) {
        return Err(ModelError::UnimputedColumn(outcome.to_string()));
    }

    let mut term_names = vec![INTERCEPT.to_string()];
    let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
    for predictor in predictors {
        let name = predictor.as_ref();
        let column = frame
            .column(name)
            .ok_or_else(|| ModelError::MissingColumn(name.to_string()))?;
        if column.missing_count() > 0 {
            return Err(ModelError::UnimputedColumn(name.to_string()));
        }
        match column {
            Column::Numeric(values) => {
                term_names.push(name.to_string());
                columns.push(values.clone());
            }
            Column::Categorical(values) => {
                for level in levels(values).into_iter().skip(1) {
                    columns.push(
                        values
                            .iter()
                            .map(|v| if v.as_deref() == Some(level.as_str()) { 1.0 } else { 0.0 })
                            .collect(),
                    );
                    term_names.push(format!("{name}{level}"));
                }
            }
        }
    }

    let x = Array2::from_shape_fn((n, columns.len()), |(i, j)| columns[j][i]);
    Ok(Design { x, y, term_names })
}

/// A specification fitted on the shared sample.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub name: String,
    pub formula: String,
    /// Predictors actually used, after dropping pruned columns.
    pub predictors: Vec<String>,
    pub term_names: Vec<String>,
    pub fit: GlmFit,
}

#[derive(Debug, Clone)]
pub enum SpecOutcome {
    Fitted(FittedModel),
    Skipped { name: String, absent: Vec<String> },
}

impl SpecOutcome {
    pub fn name(&self) -> &str {
        match self {
            SpecOutcome::Fitted(model) => &model.name,
            SpecOutcome::Skipped { name, .. } => name,
        }
    }

    pub fn fitted(&self) -> Option<&FittedModel> {
        match self {
            SpecOutcome::Fitted(model) => Some(model),
            SpecOutcome::Skipped { .. } => None,
        }
    }
}

/// Fits one specification, or reports it skipped when one of its optional
/// terms is absent from the pruned frame.
pub fn fit_specification(
    frame: &Frame,
    outcome: &str,
    spec: &ModelSpec,
    config: &GlmConfig,
) -> Result<SpecOutcome, ModelError> {
    let absent: Vec<String> = spec
        .optional_terms
        .iter()
        .filter(|term| !frame.contains(term))
        .map(|term| term.to_string())
        .collect();
    if !absent.is_empty() {
        log::warn!(
            "Skipping model '{}': defining column(s) {absent:?} absent from the analysis sample",
            spec.name
        );
        return Ok(SpecOutcome::Skipped {
            name: spec.name.to_string(),
            absent,
        });
    }

    let predictors: Vec<String> = spec
        .predictors()
        .into_iter()
        .filter(|p| *p != outcome && frame.contains(p))
        .map(str::to_string)
        .collect();
    if predictors.is_empty() {
        return Err(ModelError::EmptyPredictorSet {
            model: spec.name.to_string(),
        });
    }

    let design = build_design(frame, outcome, &predictors)?;
    let formula = formula(outcome, &predictors);
    log::info!(
        "Fitting {}: {formula} ({} rows, {} design columns)",
        spec.name,
        design.x.nrows(),
        design.x.ncols()
    );
    let fit = fit_logistic(design.x.view(), design.y.view(), config).map_err(|source| {
        ModelError::Glm {
            model: spec.name.to_string(),
            source,
        }
    })?;
    log::info!(
        "{}: deviance {:.4}, AIC {:.4}, {} iterations{}",
        spec.name,
        fit.deviance,
        fit.aic,
        fit.iterations,
        if fit.converged { "" } else { " (not converged)" }
    );

    Ok(SpecOutcome::Fitted(FittedModel {
        name: spec.name.to_string(),
        formula,
        predictors,
        term_names: design.term_names,
        fit,
    }))
}

/// Fits every specification against the same frame, in order.
pub fn fit_nested_models(
    frame: &Frame,
    outcome: &str,
    specs: &[ModelSpec],
    config: &GlmConfig,
) -> Result<Vec<SpecOutcome>, ModelError> {
    specs
        .iter()
        .map(|spec| fit_specification(frame, outcome, spec, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categorical(values: &[&str]) -> Column {
        Column::Categorical(values.iter().map(|v| Some(v.to_string())).collect())
    }

    fn frame() -> Frame {
        Frame::new((0..6).map(|i| i.to_string()).collect())
            .with_column("emerge", Column::Numeric(vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0]))
            .with_column(LOG_ASSETS, Column::Numeric(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))
            .with_column("chapter", categorical(&["11", "7", "11", "7", "MISSING", "11"]))
    }

    #[test]
    fn superset_is_union_in_first_seen_order() {
        let vars = superset_variables(&nested_specs());
        assert_eq!(vars.len(), BASE_PREDICTORS.len() + 2);
        assert_eq!(&vars[..BASE_PREDICTORS.len()], &BASE_PREDICTORS[..]);
        assert_eq!(vars[BASE_PREDICTORS.len()], PREPACKAGED);
        assert_eq!(vars[BASE_PREDICTORS.len() + 1], LATE_FILER);
    }

    #[test]
    fn specifications_are_strictly_nested() {
        let specs = nested_specs();
        let base = specs[0].predictors();
        for spec in &specs[1..] {
            let preds = spec.predictors();
            assert!(base.iter().all(|p| preds.contains(p)));
            assert!(preds.len() > base.len());
        }
        let full = specs[3].predictors();
        assert!(specs[1].predictors().iter().all(|p| full.contains(p)));
        assert!(specs[2].predictors().iter().all(|p| full.contains(p)));
    }

    #[test]
    fn formula_joins_predictors() {
        assert_eq!(formula("emerge", &["a", "b"]), "emerge ~ a + b");
    }

    #[test]
    fn levels_use_natural_order() {
        let values: Vec<Option<String>> = ["11", "7", "MISSING", "7"]
            .iter()
            .map(|v| Some(v.to_string()))
            .collect();
        assert_eq!(levels(&values), vec!["7", "11", "MISSING"]);
    }

    #[test]
    fn design_uses_treatment_contrasts() {
        let design = build_design(&frame(), "emerge", &[LOG_ASSETS, "chapter"]).unwrap();
        assert_eq!(
            design.term_names,
            vec!["(Intercept)", LOG_ASSETS, "chapter11", "chapterMISSING"]
        );
        assert_eq!(design.x.dim(), (6, 4));
        assert_eq!(design.x.column(2).to_vec(), vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        assert_eq!(design.x.column(3).to_vec(), vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn design_rejects_unimputed_columns() {
        let frame = frame().with_column(LOG_ASSETS, Column::Numeric(vec![1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0]));
        assert!(matches!(
            build_design(&frame, "emerge", &[LOG_ASSETS]),
            Err(ModelError::UnimputedColumn(name)) if name == LOG_ASSETS
        ));
    }

    #[test]
    fn spec_with_absent_optional_term_is_skipped() {
        let spec = &nested_specs()[1];
        let outcome = fit_specification(&frame(), "emerge", spec, &GlmConfig::default()).unwrap();
        match outcome {
            SpecOutcome::Skipped { name, absent } => {
                assert_eq!(name, M2_PREPACKAGED);
                assert_eq!(absent, vec![PREPACKAGED.to_string()]);
            }
            SpecOutcome::Fitted(_) => panic!("expected the specification to be skipped"),
        }
    }

    #[test]
    fn empty_predictor_set_is_fatal() {
        let frame = Frame::new(vec!["a".into(), "b".into()])
            .with_column("emerge", Column::Numeric(vec![1.0, 0.0]));
        let err = fit_specification(&frame, "emerge", &nested_specs()[0], &GlmConfig::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::EmptyPredictorSet { model } if model == M1_BASE));
    }
}
