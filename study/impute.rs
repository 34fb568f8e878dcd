//! # Imputation and Degenerate-Predictor Pruning
//!
//! Both operations run exactly once, on the full superset, before any
//! model-specific design is built. That ordering is what makes the nested
//! models comparable: every fit sees the same rows and the same filled values.

use crate::frame::{Column, Frame, is_missing_like};

/// Level assigned to missing categorical entries.
pub const MISSING_LEVEL: &str = "MISSING";

/// Median of the finite values, or `None` when there are none.
pub fn finite_median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    Some(if finite.len() % 2 == 0 {
        (finite[mid - 1] + finite[mid]) / 2.0
    } else {
        finite[mid]
    })
}

/// Fills every non-outcome column: numeric gaps (including infinities) with
/// the median of the finite values, or 0 when a column has none; categorical
/// gaps and missing-like spellings with [`MISSING_LEVEL`].
///
/// Afterwards no column other than `outcome` holds a missing value.
pub fn impute(frame: Frame, outcome: &str) -> Frame {
    let (ids, columns) = frame.into_columns();
    let mut out = Frame::new(ids);
    for (name, column) in columns {
        let filled = if name == outcome {
            column
        } else {
            match column {
                Column::Numeric(values) => {
                    let fill = finite_median(&values).unwrap_or_else(|| {
                        log::warn!("Column '{name}' has no finite values; filling with 0");
                        0.0
                    });
                    Column::Numeric(
                        values
                            .into_iter()
                            .map(|v| if v.is_finite() { v } else { fill })
                            .collect(),
                    )
                }
                Column::Categorical(values) => Column::Categorical(
                    values
                        .into_iter()
                        .map(|v| match v {
                            Some(text) if !is_missing_like(&text) => Some(text),
                            _ => Some(MISSING_LEVEL.to_string()),
                        })
                        .collect(),
                ),
            }
        };
        out = out.with_column(name, filled);
    }
    out
}

/// Drops every non-outcome column with fewer than two distinct observed
/// values. Returns the pruned frame and the names that were dropped.
pub fn prune_degenerate(frame: Frame, outcome: &str) -> (Frame, Vec<String>) {
    let (ids, columns) = frame.into_columns();
    let mut out = Frame::new(ids);
    let mut dropped = Vec::new();
    for (name, column) in columns {
        if name != outcome && column.distinct_count() < 2 {
            log::warn!(
                "Dropping degenerate predictor '{name}' ({} distinct value(s))",
                column.distinct_count()
            );
            dropped.push(name);
        } else {
            out = out.with_column(name, column);
        }
    }
    (out, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> Frame {
        Frame::new((0..4).map(|i| i.to_string()).collect())
            .with_column("y", Column::Numeric(vec![1.0, 0.0, 1.0, 0.0]))
            .with_column("x", Column::Numeric(vec![1.0, f64::NAN, 3.0, f64::NEG_INFINITY]))
            .with_column("empty", Column::Numeric(vec![f64::NAN; 4]))
            .with_column(
                "g",
                Column::Categorical(vec![Some("a".into()), Some("na".into()), None, Some(" ".into())]),
            )
            .with_column("flag", Column::Categorical(vec![Some("Y".into()); 4]))
    }

    #[test]
    fn median_of_even_and_odd_samples() {
        assert_eq!(finite_median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(finite_median(&[4.0, 1.0, f64::NAN, 2.0, 3.0]), Some(2.5));
        assert_eq!(finite_median(&[f64::NAN]), None);
    }

    #[test]
    fn impute_fills_everything_but_the_outcome() {
        let with_missing_outcome = raw().with_column("y", Column::Numeric(vec![1.0, f64::NAN, 1.0, 0.0]));
        let filled = impute(with_missing_outcome, "y");
        for (name, column) in filled.iter() {
            if name == "y" {
                assert_eq!(column.missing_count(), 1);
            } else {
                assert_eq!(column.missing_count(), 0, "column {name} still has gaps");
            }
        }
        assert_eq!(
            filled.column("x"),
            Some(&Column::Numeric(vec![1.0, 2.0, 3.0, 2.0]))
        );
        assert_eq!(filled.column("empty"), Some(&Column::Numeric(vec![0.0; 4])));
        assert_eq!(
            filled.column("g"),
            Some(&Column::Categorical(vec![
                Some("a".into()),
                Some(MISSING_LEVEL.into()),
                Some(MISSING_LEVEL.into()),
                Some(MISSING_LEVEL.into()),
            ]))
        );
    }

    #[test]
    fn impute_is_idempotent() {
        let once = impute(raw(), "y");
        let twice = impute(once.clone(), "y");
        assert_eq!(once, twice);
    }

    #[test]
    fn prune_drops_single_valued_columns() {
        let (pruned, dropped) = prune_degenerate(impute(raw(), "y"), "y");
        assert_eq!(dropped, vec!["empty".to_string(), "flag".to_string()]);
        assert!(!pruned.contains("flag"));
        assert!(pruned.contains("x"));
        assert!(pruned.contains("g"));
        assert!(pruned.contains("y"));
    }

    #[test]
    fn prune_keeps_two_level_categorical() {
        let frame = Frame::new(vec!["a".into(), "b".into()])
            .with_column("y", Column::Numeric(vec![1.0, 1.0]))
            .with_column("two", Column::Categorical(vec![Some("Y".into()), Some("N".into())]));
        let (pruned, dropped) = prune_degenerate(frame, "y");
        assert!(dropped.is_empty());
        assert!(pruned.contains("two"));
        assert!(pruned.contains("y"));
    }
}
