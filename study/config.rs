//! Run configuration for a study.
//!
//! All paths that drive a run are explicit fields here; nothing in the library
//! reads or changes the process working directory.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CAP_QUANTILE: f64 = 0.998;
pub const DEFAULT_MAX_ITERATIONS: usize = 25;
pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Which worksheet of a workbook to read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

impl FromStr for SheetSelector {
    type Err = std::convert::Infallible;

    /// Purely numeric text selects by position, anything else by name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<usize>() {
            Ok(index) => SheetSelector::Index(index),
            Err(_) => SheetSelector::Name(trimmed.to_string()),
        })
    }
}

impl fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSelector::Index(index) => write!(f, "#{index}"),
            SheetSelector::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Everything a study run needs. Loadable from TOML; the CLI overrides
/// individual fields on top of a loaded file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StudyConfig {
    pub input: PathBuf,
    #[serde(default)]
    pub sheet: SheetSelector,
    pub output_dir: PathBuf,
    #[serde(default = "default_cap_quantile")]
    pub cap_quantile: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
}

fn default_cap_quantile() -> f64 {
    DEFAULT_CAP_QUANTILE
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_convergence_tolerance() -> f64 {
    DEFAULT_CONVERGENCE_TOLERANCE
}

impl StudyConfig {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            sheet: SheetSelector::default(),
            output_dir: output_dir.into(),
            cap_quantile: DEFAULT_CAP_QUANTILE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
        }
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: StudyConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cap_quantile > 0.5 && self.cap_quantile < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "cap_quantile",
                reason: format!("expected a value in (0.5, 1), got {}", self.cap_quantile),
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.convergence_tolerance > 0.0 && self.convergence_tolerance.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "convergence_tolerance",
                reason: format!(
                    "expected a positive finite value, got {}",
                    self.convergence_tolerance
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_selector_parses_index_or_name() {
        assert_eq!("2".parse::<SheetSelector>().unwrap(), SheetSelector::Index(2));
        assert_eq!(
            " regression_data ".parse::<SheetSelector>().unwrap(),
            SheetSelector::Name("regression_data".to_string())
        );
    }

    #[test]
    fn toml_defaults_fill_tuning_fields() {
        let config: StudyConfig = toml::from_str(
            r#"
            input = "data/filings.xlsx"
            output_dir = "out"
            sheet = "regression_data"
            "#,
        )
        .unwrap();
        assert_eq!(config.sheet, SheetSelector::Name("regression_data".into()));
        assert_eq!(config.cap_quantile, DEFAULT_CAP_QUANTILE);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_numeric_sheet_is_an_index() {
        let config: StudyConfig =
            toml::from_str("input = \"a.xlsx\"\noutput_dir = \"o\"\nsheet = 1\n").unwrap();
        assert_eq!(config.sheet, SheetSelector::Index(1));
    }

    #[test]
    fn rejects_out_of_range_quantile() {
        let mut config = StudyConfig::new("a.csv", "out");
        config.cap_quantile = 0.3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "cap_quantile",
                ..
            })
        ));
    }
}
