//! Assembly of the shared analysis sample.
//!
//! The superset is the union of every variable any candidate specification
//! references, restricted to rows with an observed outcome. All models are
//! later fit on rows derived from exactly this set.

use crate::frame::{Column, Frame};
use serde::Serialize;

/// Missing-or-non-finite count for one variable, measured before imputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NaCount {
    pub var: String,
    pub na_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Superset {
    pub frame: Frame,
    /// Sorted by `na_count`, largest first; ties keep superset column order.
    pub na_report: Vec<NaCount>,
}

/// Restricts `frame` to the union of `variables` (plus the outcome) and drops
/// rows whose outcome is missing. Variables absent from the frame are skipped.
pub fn assemble_superset<S: AsRef<str>>(frame: &Frame, variables: &[S], outcome: &str) -> Superset {
    let mut wanted: Vec<&str> = vec![outcome];
    for var in variables {
        let var = var.as_ref();
        if !wanted.contains(&var) {
            wanted.push(var);
        }
    }
    let absent: Vec<&str> = wanted
        .iter()
        .copied()
        .filter(|name| !frame.contains(name))
        .collect();
    if !absent.is_empty() {
        log::info!("Variables not present in the model frame: {absent:?}");
    }

    let selected = frame.select(&wanted);
    let keep: Vec<bool> = match selected.column(outcome) {
        Some(Column::Numeric(values)) => values.iter().map(|v| !v.is_nan()).collect(),
        Some(column) => (0..column.len()).map(|row| !column.is_missing_at(row)).collect(),
        None => vec![false; selected.nrows()],
    };
    let superset = selected.filter_rows(&keep);
    log::info!(
        "Superset sample: {} of {} rows kept (outcome observed), {} variables",
        superset.nrows(),
        frame.nrows(),
        superset.ncols()
    );

    let na_report = missing_report(&superset);
    Superset {
        frame: superset,
        na_report,
    }
}

/// Per-variable missing counts, largest first.
pub fn missing_report(frame: &Frame) -> Vec<NaCount> {
    let mut report: Vec<NaCount> = frame
        .iter()
        .map(|(name, column)| NaCount {
            var: name.to_string(),
            na_count: column.missing_count(),
        })
        .collect();
    // sort_by is stable, so equal counts stay in column order
    report.sort_by(|a, b| b.na_count.cmp(&a.na_count));
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new((0..5).map(|i| i.to_string()).collect())
            .with_column("y", Column::Numeric(vec![1.0, f64::NAN, 0.0, 1.0, 0.0]))
            .with_column("a", Column::Numeric(vec![f64::NAN, 1.0, f64::INFINITY, 2.0, 3.0]))
            .with_column(
                "g",
                Column::Categorical(vec![None, Some("x".into()), Some("".into()), Some("NULL".into()), Some("z".into())]),
            )
            .with_column("unused", Column::Numeric(vec![0.0; 5]))
    }

    #[test]
    fn drops_only_rows_with_missing_outcome() {
        let superset = assemble_superset(&frame(), &["a", "g", "a"], "y");
        assert_eq!(superset.frame.nrows(), 4);
        assert_eq!(superset.frame.names(), &["y", "a", "g"]);
        assert!(!superset.frame.contains("unused"));
        assert_eq!(superset.frame.ids(), &["0", "2", "3", "4"]);
    }

    #[test]
    fn report_counts_non_finite_and_sorts_descending() {
        let superset = assemble_superset(&frame(), &["a", "g", "missing_var"], "y");
        let report: Vec<(&str, usize)> = superset
            .na_report
            .iter()
            .map(|r| (r.var.as_str(), r.na_count))
            .collect();
        assert_eq!(report, vec![("g", 3), ("a", 2), ("y", 0)]);
    }
}
