//! # In-Memory Analysis Frame
//!
//! A small, typed, column-oriented table used between pipeline stages. Every
//! stage consumes a `Frame` by value or reference and hands back a new one;
//! nothing mutates a frame that another stage still holds.
//!
//! Numeric columns encode a missing value as `NaN`. Categorical columns encode
//! it as `None`, although raw string forms such as `"NA"` are also treated as
//! missing until the imputer normalizes them (see [`is_missing_like`]).

use std::collections::HashSet;

/// Tokens that are read as "no value" in categorical text, compared
/// case-insensitively after trimming.
const MISSING_TOKENS: [&str; 3] = ["na", "nan", "null"];

/// Returns true for the textual spellings of a missing value: the empty
/// string, `NA`, `NaN` and `NULL` in any case.
pub fn is_missing_like(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || MISSING_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// A single typed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Categorical(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    /// Whether the entry at `row` is missing (non-finite numeric, absent or
    /// missing-like categorical).
    pub fn is_missing_at(&self, row: usize) -> bool {
        match self {
            Column::Numeric(values) => !values[row].is_finite(),
            Column::Categorical(values) => match &values[row] {
                None => true,
                Some(text) => is_missing_like(text),
            },
        }
    }

    /// Count of missing-or-non-finite entries.
    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_missing_at(row)).count()
    }

    /// Number of distinct observed (non-missing) values.
    pub fn distinct_count(&self) -> usize {
        match self {
            Column::Numeric(values) => values
                .iter()
                .filter(|v| v.is_finite())
                // -0.0 and 0.0 are the same observation
                .map(|&v| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
                .collect::<HashSet<u64>>()
                .len(),
            Column::Categorical(values) => values
                .iter()
                .flatten()
                .filter(|text| !is_missing_like(text))
                .map(String::as_str)
                .collect::<HashSet<&str>>()
                .len(),
        }
    }

    fn take_rows(&self, keep: &[bool]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(
                values
                    .iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| *v)
                    .collect(),
            ),
            Column::Categorical(values) => Column::Categorical(
                values
                    .iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| v.clone())
                    .collect(),
            ),
        }
    }
}

/// An ordered set of equally long named columns, keyed by a row identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    ids: Vec<String>,
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    /// Creates a frame with the given row identifiers and no columns.
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Appends a column, replacing an existing column of the same name in place.
    ///
    /// # Panics
    /// If the column length differs from the number of rows.
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Self {
        assert_eq!(
            column.len(),
            self.ids.len(),
            "column length must match the frame's row count"
        );
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.columns[idx] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
        self
    }

    pub fn nrows(&self) -> usize {
        self.ids.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|idx| &self.columns[idx])
    }

    /// Iterates `(name, column)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    /// Consumes the frame, yielding owned `(name, column)` pairs.
    pub fn into_columns(self) -> (Vec<String>, Vec<(String, Column)>) {
        (self.ids, self.names.into_iter().zip(self.columns).collect())
    }

    /// Restricts the frame to the named columns that exist, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Frame {
        let mut out = Frame::new(self.ids.clone());
        for name in names {
            if let Some(column) = self.column(name.as_ref()) {
                out = out.with_column(name.as_ref(), column.clone());
            }
        }
        out
    }

    /// Keeps only the rows where `keep` is true.
    ///
    /// # Panics
    /// If `keep` does not have one entry per row.
    pub fn filter_rows(&self, keep: &[bool]) -> Frame {
        assert_eq!(keep.len(), self.nrows(), "row mask must cover every row");
        let ids = self
            .ids
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(id, _)| id.clone())
            .collect();
        Frame {
            ids,
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take_rows(keep)).collect(),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::new(vec!["a".into(), "b".into(), "c".into()])
            .with_column("x", Column::Numeric(vec![1.0, f64::NAN, 3.0]))
            .with_column(
                "g",
                Column::Categorical(vec![Some("y".into()), Some("NA".into()), None]),
            )
    }

    #[test]
    fn missing_like_tokens() {
        for token in ["", "  ", "NA", "na", "NaN", "nan", "NULL", "Null"] {
            assert!(is_missing_like(token), "{token:?} should be missing");
        }
        assert!(!is_missing_like("N"));
        assert!(!is_missing_like("MISSING"));
    }

    #[test]
    fn missing_and_distinct_counts() {
        let frame = sample();
        let x = frame.column("x").unwrap();
        let g = frame.column("g").unwrap();
        assert_eq!(x.missing_count(), 1);
        assert_eq!(x.distinct_count(), 2);
        assert_eq!(g.missing_count(), 2);
        assert_eq!(g.distinct_count(), 1);
    }

    #[test]
    fn signed_zero_is_one_value() {
        let column = Column::Numeric(vec![0.0, -0.0, 0.0]);
        assert_eq!(column.distinct_count(), 1);
    }

    #[test]
    fn filter_rows_keeps_alignment() {
        let frame = sample().filter_rows(&[true, false, true]);
        assert_eq!(frame.ids(), &["a".to_string(), "c".to_string()]);
        match frame.column("x").unwrap() {
            Column::Numeric(values) => assert_eq!(values, &vec![1.0, 3.0]),
            other => panic!("unexpected column {other:?}"),
        }
    }

    #[test]
    fn select_skips_absent_and_keeps_order() {
        let frame = sample().select(&["g", "absent", "x"]);
        assert_eq!(frame.names(), &["g".to_string(), "x".to_string()]);
    }

    #[test]
    fn with_column_replaces_existing() {
        let frame = sample().with_column("x", Column::Numeric(vec![0.0; 3]));
        assert_eq!(frame.ncols(), 2);
        assert_eq!(frame.column("x"), Some(&Column::Numeric(vec![0.0; 3])));
    }
}
