//! # Feature Construction
//!
//! Turns validated raw records into the model frame: a binary outcome,
//! log-scaled size controls, four winsorized financial ratios, a numeric
//! late-filer control and the categorical filing characteristics.
//!
//! Every elementwise helper here is total. Unparseable text, zero
//! denominators and negative sizes degrade to `NaN` (or a clamped value)
//! instead of failing; the imputer deals with the gaps later. The only
//! fatal condition is an outcome that is not binary.

use crate::extract::RawRecords;
use crate::frame::{Column, Frame, is_missing_like};
use std::cmp::Ordering;
use thiserror::Error;

pub const OUTCOME: &str = "emerge";
pub const LOG_ASSETS: &str = "log_assets";
pub const LOG_EMPL: &str = "log_empl";
pub const LEVERAGE: &str = "leverage";
pub const EBIT_TO_ASSETS: &str = "ebit_to_assets";
pub const NI_TO_ASSETS: &str = "ni_to_assets";
pub const EBIT_TO_LIAB: &str = "ebit_to_liab";
pub const LATE_FILER: &str = "late_filer_flag_180d";
pub const PREPACKAGED: &str = "prepackaged";

/// Minimum number of finite observations before quantile capping is attempted.
pub const MIN_CAP_OBSERVATIONS: usize = 10;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error(
        "The outcome column must contain exactly two distinct non-missing values, but {} were found: {found:?}",
        .found.len()
    )]
    NonBinaryOutcome { found: Vec<String> },
}

/// Parses a cell as a float; anything unparseable becomes `NaN`.
pub fn to_num(value: Option<&str>) -> f64 {
    value
        .map(str::trim)
        .and_then(|text| text.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

pub fn to_num_column(values: &[Option<String>]) -> Vec<f64> {
    values.iter().map(|v| to_num(v.as_deref())).collect()
}

/// Elementwise `a / b`; a denominator of exactly zero yields `NaN`.
pub fn safe_div(a: &[f64], b: &[f64]) -> Vec<f64> {
    assert_eq!(a.len(), b.len(), "safe_div operands must have equal length");
    a.iter()
        .zip(b)
        .map(|(&num, &den)| if den == 0.0 { f64::NAN } else { num / den })
        .collect()
}

/// `ln(1 + max(x, 0))`. Missing stays missing.
pub fn log1p_nonneg(x: &[f64]) -> Vec<f64> {
    // f64::max would swallow NaN, so it is checked first.
    x.iter()
        .map(|&v| if v.is_nan() { f64::NAN } else { v.max(0.0).ln_1p() })
        .collect()
}

/// Sample quantile of sorted data using linear interpolation between order
/// statistics (the conventional "type 7" definition).
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Winsorizes `x` into its `[1 - p, p]` quantile range computed over finite
/// values. Columns with fewer than ten finite values are returned unchanged;
/// non-finite entries are never touched.
pub fn cap(x: &[f64], p: f64) -> Vec<f64> {
    let mut finite: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < MIN_CAP_OBSERVATIONS {
        return x.to_vec();
    }
    finite.sort_by(f64::total_cmp);
    let lo = quantile_sorted(&finite, p.min(1.0 - p));
    let hi = quantile_sorted(&finite, p.max(1.0 - p));
    x.iter()
        .map(|&v| if v.is_finite() { v.clamp(lo, hi) } else { v })
        .collect()
}

/// Maps a two-valued outcome to 0/1. The larger value becomes 1.
///
/// When every observed cell parses as a number, values are identified and
/// ordered numerically, so `1` and `1.0` are the same outcome. Otherwise the
/// trimmed text is compared. Missing-like cells stay `NaN`.
pub fn binarize_outcome(raw: &[Option<String>]) -> Result<Vec<f64>, FeatureError> {
    let observed: Vec<&str> = raw
        .iter()
        .flatten()
        .map(|v| v.trim())
        .filter(|text| !is_missing_like(text))
        .collect();
    let parsed: Option<Vec<f64>> = observed.iter().map(|t| t.parse::<f64>().ok()).collect();
    match parsed {
        Some(values) => binarize_numeric(raw, &observed, &values),
        None => binarize_text(raw, &observed),
    }
}

/// `0.0` for either signed zero, so both compare equal by bit pattern.
fn outcome_key(v: f64) -> u64 {
    if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

fn non_binary(spellings: &[&str]) -> FeatureError {
    let mut found: Vec<String> = spellings.iter().map(|s| s.to_string()).collect();
    found.sort_by(|a, b| natord::compare(a, b));
    FeatureError::NonBinaryOutcome { found }
}

fn binarize_numeric(
    raw: &[Option<String>],
    observed: &[&str],
    values: &[f64],
) -> Result<Vec<f64>, FeatureError> {
    // (key, value, first spelling seen)
    let mut distinct: Vec<(u64, f64, &str)> = Vec::new();
    for (&value, &text) in values.iter().zip(observed) {
        let key = outcome_key(value);
        if !distinct.iter().any(|(k, _, _)| *k == key) {
            distinct.push((key, value, text));
        }
    }
    if distinct.len() != 2 {
        let spellings: Vec<&str> = distinct.iter().map(|(_, _, t)| *t).collect();
        return Err(non_binary(&spellings));
    }
    let (positive_key, _, positive_text) = match distinct[0].1.total_cmp(&distinct[1].1) {
        Ordering::Less => distinct[1],
        _ => distinct[0],
    };
    log::info!("Outcome coding: {positive_text} -> 1, the other observed value -> 0");

    Ok(raw
        .iter()
        .map(|cell| match cell.as_deref().map(str::trim) {
            Some(text) if !is_missing_like(text) => match text.parse::<f64>() {
                Ok(v) if outcome_key(v) == positive_key => 1.0,
                Ok(_) => 0.0,
                Err(_) => f64::NAN,
            },
            _ => f64::NAN,
        })
        .collect())
}

fn binarize_text(raw: &[Option<String>], observed: &[&str]) -> Result<Vec<f64>, FeatureError> {
    let mut distinct: Vec<&str> = Vec::new();
    for &text in observed {
        if !distinct.contains(&text) {
            distinct.push(text);
        }
    }
    if distinct.len() != 2 {
        return Err(non_binary(&distinct));
    }
    let positive = match distinct[0].cmp(distinct[1]) {
        Ordering::Less => distinct[1],
        _ => distinct[0],
    };
    log::info!("Outcome coding: '{positive}' -> 1, the other observed value -> 0");

    Ok(raw
        .iter()
        .map(|cell| match cell.as_deref().map(str::trim) {
            Some(text) if !is_missing_like(text) => {
                if text == positive {
                    1.0
                } else {
                    0.0
                }
            }
            _ => f64::NAN,
        })
        .collect())
}

/// Coerces a coded column to category labels via its text form. Integral
/// numeric codes lose any fractional suffix so that `11` and `11.0` are the
/// same level.
pub fn coerce_categorical(raw: &[Option<String>]) -> Vec<Option<String>> {
    raw.iter()
        .map(|cell| {
            cell.as_deref().map(|text| {
                let trimmed = text.trim();
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => {
                        format!("{}", v as i64)
                    }
                    _ => trimmed.to_string(),
                }
            })
        })
        .collect()
}

/// Builds the model frame from validated raw records.
pub fn build_model_frame(records: &RawRecords, cap_quantile: f64) -> Result<Frame, FeatureError> {
    let emerge = binarize_outcome(&records.emerge)?;

    let assets = to_num_column(&records.assets_before);
    let liab = to_num_column(&records.liab_before);
    let ebit = to_num_column(&records.ebit_before);
    let net_income = to_num_column(&records.net_income_before);
    let empl = to_num_column(&records.empl_before);

    let ratios = [
        (LEVERAGE, safe_div(&liab, &assets)),
        (EBIT_TO_ASSETS, safe_div(&ebit, &assets)),
        (NI_TO_ASSETS, safe_div(&net_income, &assets)),
        (EBIT_TO_LIAB, safe_div(&ebit, &liab)),
    ];

    let mut frame = Frame::new(records.cik.clone())
        .with_column(OUTCOME, Column::Numeric(emerge))
        .with_column(LOG_ASSETS, Column::Numeric(log1p_nonneg(&assets)))
        .with_column(LOG_EMPL, Column::Numeric(log1p_nonneg(&empl)));
    for (name, values) in ratios {
        frame = frame.with_column(name, Column::Numeric(cap(&values, cap_quantile)));
    }
    frame = frame.with_column(
        LATE_FILER,
        Column::Numeric(to_num_column(&records.late_filer_flag_180d)),
    );

    let categoricals = [
        ("voluntary", Some(&records.voluntary)),
        ("ceo_replaced", Some(&records.ceo_replaced)),
        ("chapter", Some(&records.chapter)),
        ("claimsagent", Some(&records.claims_agent)),
        ("commcred", Some(&records.comm_cred)),
        (PREPACKAGED, records.prepackaged.as_ref()),
    ];
    for (name, raw) in categoricals {
        if let Some(raw) = raw {
            frame = frame.with_column(name, Column::Categorical(coerce_categorical(raw)));
        }
    }

    log::info!(
        "Model frame built: {} rows x {} columns",
        frame.nrows(),
        frame.ncols()
    );
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cells(values: &[&str]) -> Vec<Option<String>> {
        values
            .iter()
            .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
            .collect()
    }

    #[test]
    fn to_num_degrades_to_nan() {
        assert_eq!(to_num(Some(" 3.5 ")), 3.5);
        assert!(to_num(Some("n/a")).is_nan());
        assert!(to_num(None).is_nan());
    }

    #[test]
    fn safe_div_zero_denominator_is_missing() {
        let out = safe_div(&[1.0, -4.0, 0.0, 6.0], &[0.0, 0.0, 0.0, 3.0]);
        assert!(out[..3].iter().all(|v| v.is_nan()));
        assert_eq!(out[3], 2.0);
        assert!(out.iter().all(|v| !v.is_infinite()));
    }

    #[test]
    fn log1p_clamps_negative_values() {
        let out = log1p_nonneg(&[-5.0, 0.0, std::f64::consts::E - 1.0, f64::NAN]);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        assert_abs_diff_eq!(out[2], 1.0, epsilon = 1e-12);
        assert!(out[3].is_nan());
    }

    #[test]
    fn quantile_interpolates_between_order_statistics() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(quantile_sorted(&sorted, 1.0), 5.0);
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.9), 4.6, epsilon = 1e-12);
    }

    #[test]
    fn cap_leaves_small_samples_alone() {
        let x = vec![1.0, 1000.0, -50.0, f64::NAN, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let out = cap(&x, 0.998);
        assert_eq!(out.len(), x.len());
        for (a, b) in out.iter().zip(&x) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[test]
    fn cap_clamps_into_quantile_bounds() {
        let mut x: Vec<f64> = (0..200).map(|i| i as f64).collect();
        x.push(1e9);
        x.push(-1e9);
        x.push(f64::NAN);
        let out = cap(&x, 0.99);

        let mut finite: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
        finite.sort_by(f64::total_cmp);
        let lo = quantile_sorted(&finite, 1.0 - 0.99);
        let hi = quantile_sorted(&finite, 0.99);

        assert!(out.iter().filter(|v| v.is_finite()).all(|&v| v >= lo && v <= hi));
        assert_eq!(
            out.iter().filter(|v| !v.is_nan()).count(),
            x.iter().filter(|v| !v.is_nan()).count()
        );
        assert_eq!(out[200], hi);
        assert_eq!(out[201], lo);
        assert!(out[202].is_nan());
    }

    #[test]
    fn larger_outcome_value_maps_to_one() {
        let coded = binarize_outcome(&cells(&["A", "B", "B", "", "A", "NA"])).unwrap();
        assert_eq!(coded[..3], [0.0, 1.0, 1.0]);
        assert!(coded[3].is_nan());
        assert_eq!(coded[4], 0.0);
        assert!(coded[5].is_nan());
    }

    #[test]
    fn numeric_outcomes_compare_numerically() {
        // "10" < "9" as strings, but 10 > 9 as numbers.
        let coded = binarize_outcome(&cells(&["9", "10", "9"])).unwrap();
        assert_eq!(coded, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn non_binary_outcome_lists_values() {
        let err = binarize_outcome(&cells(&["0", "1", "2", "1"])).unwrap_err();
        assert_eq!(
            err,
            FeatureError::NonBinaryOutcome {
                found: vec!["0".into(), "1".into(), "2".into()]
            }
        );
        assert!(matches!(
            binarize_outcome(&cells(&["1", "1", ""])),
            Err(FeatureError::NonBinaryOutcome { .. })
        ));
    }

    #[test]
    fn numeric_spellings_of_one_value_are_one_outcome() {
        let coded = binarize_outcome(&cells(&["0", "1", "1.0", "0", " 1 "])).unwrap();
        assert_eq!(coded, vec![0.0, 1.0, 1.0, 0.0, 1.0]);

        let coded = binarize_outcome(&cells(&["-0.0", "0", "1e0"])).unwrap();
        assert_eq!(coded, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn single_value_under_two_spellings_is_not_binary() {
        assert_eq!(
            binarize_outcome(&cells(&["1", "1.0", "1"])).unwrap_err(),
            FeatureError::NonBinaryOutcome {
                found: vec!["1".into()]
            }
        );
    }

    #[test]
    fn mixed_text_outcome_compares_as_strings() {
        let coded = binarize_outcome(&cells(&["yes", "no", "yes"])).unwrap();
        assert_eq!(coded, vec![1.0, 0.0, 1.0]);
        assert!(matches!(
            binarize_outcome(&cells(&["1", "1.0", "yes"])),
            Err(FeatureError::NonBinaryOutcome { found }) if found.len() == 3
        ));
    }

    #[test]
    fn categorical_codes_become_labels() {
        let out = coerce_categorical(&cells(&["11.0", " 7 ", "free fall", "", "1.5"]));
        assert_eq!(
            out,
            vec![
                Some("11".to_string()),
                Some("7".to_string()),
                Some("free fall".to_string()),
                None,
                Some("1.5".to_string()),
            ]
        );
    }
}
