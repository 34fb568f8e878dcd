//! # Column Extraction and Schema Validation
//!
//! This module is the only place that touches the input file. It reads one
//! sheet of a workbook (calamine) or a delimited text file (polars), normalizes
//! the header names, and validates the result against the fixed study schema.
//!
//! - Strict Schema: later stages never look columns up by string. They receive
//!   a [`RawRecords`] value whose fields are the required inputs.
//! - Complete Errors: every absent required column is reported in a single
//!   [`ExtractError::MissingColumns`], not just the first one found.

use crate::config::SheetSelector;
use calamine::{Data, Reader, open_workbook_auto};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// CIKs are at most ten digits.
const MAX_CIK: f64 = 1e10;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Failed to read workbook: {0}")]
    WorkbookError(#[from] calamine::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "Unsupported input format for '{0}'. Expected .xlsx, .xlsm, .xls, .ods, .csv or .tsv."
    )]
    UnsupportedFormat(String),
    #[error("Sheet {requested} was not found. Available sheets: {available:?}")]
    UnknownSheet {
        requested: String,
        available: Vec<String>,
    },
    #[error("The selected sheet has no header row.")]
    EmptySheet,
    #[error(
        "The following required columns were not found in the input: {}. Please check spelling and case.",
        .missing.join(", ")
    )]
    MissingColumns { missing: Vec<String> },
}

/// Raw cells of one sheet, column oriented, with the header text as read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub columns: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Builds a table from a header row and data rows of uneven length.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = headers.len();
        let mut columns = vec![Vec::with_capacity(rows.len()); width];
        for row in rows {
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(row.get(idx).cloned().flatten());
            }
        }
        Self { headers, columns }
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }
}

/// An input field of the study schema. Each field may be found under
/// several spellings of its normalized header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Cik,
    Emerge,
    AssetsBefore,
    LiabBefore,
    EbitBefore,
    NetIncomeBefore,
    EmplBefore,
    Voluntary,
    CeoReplaced,
    Chapter,
    ClaimsAgent,
    CommCred,
    LateFilerFlag180d,
    Prepackaged,
}

impl Field {
    pub const REQUIRED: [Field; 13] = [
        Field::Cik,
        Field::Emerge,
        Field::AssetsBefore,
        Field::LiabBefore,
        Field::EbitBefore,
        Field::NetIncomeBefore,
        Field::EmplBefore,
        Field::Voluntary,
        Field::CeoReplaced,
        Field::Chapter,
        Field::ClaimsAgent,
        Field::CommCred,
        Field::LateFilerFlag180d,
    ];

    pub fn name(self) -> &'static str {
        self.aliases()[0]
    }

    /// Accepted normalized headers, canonical spelling first.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Cik => &["cik"],
            Field::Emerge => &["emerge"],
            Field::AssetsBefore => &["assetsbefore"],
            Field::LiabBefore => &["liabbefore"],
            Field::EbitBefore => &["ebitbefore"],
            Field::NetIncomeBefore => &["netincomebefore"],
            Field::EmplBefore => &["emplbefore"],
            Field::Voluntary => &["voluntary"],
            Field::CeoReplaced => &["ceo_replaced", "ceoreplaced"],
            Field::Chapter => &["chapter"],
            Field::ClaimsAgent => &["claimsagent"],
            Field::CommCred => &["commcred"],
            Field::LateFilerFlag180d => &["late_filer_flag_180d"],
            Field::Prepackaged => &["prepackaged"],
        }
    }
}

/// Raw values of one filing per row, for every schema field. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecords {
    /// Normalized identifiers (see [`normalize_cik`]).
    pub cik: Vec<String>,
    pub emerge: Vec<Option<String>>,
    pub assets_before: Vec<Option<String>>,
    pub liab_before: Vec<Option<String>>,
    pub ebit_before: Vec<Option<String>>,
    pub net_income_before: Vec<Option<String>>,
    pub empl_before: Vec<Option<String>>,
    pub voluntary: Vec<Option<String>>,
    pub ceo_replaced: Vec<Option<String>>,
    pub chapter: Vec<Option<String>>,
    pub claims_agent: Vec<Option<String>>,
    pub comm_cred: Vec<Option<String>>,
    pub late_filer_flag_180d: Vec<Option<String>>,
    /// Absent from some inputs; the specifications using it are then skipped.
    pub prepackaged: Option<Vec<Option<String>>>,
}

impl RawRecords {
    pub fn nrows(&self) -> usize {
        self.cik.len()
    }
}

/// Reads the configured sheet and validates it against the study schema.
pub fn extract_records(path: &Path, sheet: &SheetSelector) -> Result<RawRecords, ExtractError> {
    let table = read_table(path, sheet)?;
    log::info!(
        "Read {} rows and {} columns from '{}'",
        table.nrows(),
        table.headers.len(),
        path.display()
    );
    validate_schema(table)
}

/// Reads one sheet of a workbook, or a whole CSV/TSV file, as raw text cells.
pub fn read_table(path: &Path, sheet: &SheetSelector) -> Result<RawTable, ExtractError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(path, sheet),
        "csv" => read_delimited(path, b','),
        "tsv" => read_delimited(path, b'\t'),
        _ => Err(ExtractError::UnsupportedFormat(path.display().to_string())),
    }
}

fn read_workbook(path: &Path, sheet: &SheetSelector) -> Result<RawTable, ExtractError> {
    let mut workbook = open_workbook_auto(path)?;
    let available = workbook.sheet_names();
    let unknown = || ExtractError::UnknownSheet {
        requested: sheet.to_string(),
        available: available.clone(),
    };
    let range = match sheet {
        SheetSelector::Index(index) => workbook.worksheet_range_at(*index).ok_or_else(unknown)??,
        SheetSelector::Name(name) => {
            if !available.iter().any(|n| n == name) {
                return Err(unknown());
            }
            workbook.worksheet_range(name)?
        }
    };

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or(ExtractError::EmptySheet)?
        .iter()
        .map(|cell| cell_text(cell).unwrap_or_default())
        .collect();
    let data: Vec<Vec<Option<String>>> = rows
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(RawTable::from_rows(headers, data))
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn read_delimited(path: &Path, separator: u8) -> Result<RawTable, ExtractError> {
    // Every column is read as text; numeric coercion happens in the feature builder.
    // The header line is read as data row 0 so that duplicate names reach
    // `normalize_headers` exactly as written.
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(false)
                .with_infer_schema_length(Some(0))
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;
    if df.height() == 0 {
        return Err(ExtractError::EmptySheet);
    }

    let mut headers = Vec::with_capacity(df.width());
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let text = column.cast(&DataType::String)?;
        let mut values = text.str()?.into_iter().map(|value| value.map(str::to_string));
        headers.push(values.next().flatten().unwrap_or_default());
        columns.push(values.collect());
    }
    Ok(RawTable { headers, columns })
}

/// Lower-cases a header and collapses every run of non-alphanumeric
/// characters into a single underscore, trimming underscores at both ends.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Normalizes every header. Blank headers become `col_<position>`; repeated
/// names get `_2`, `_3`, ... suffixes in order of appearance.
pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let mut base = normalize_name(header);
        if base.is_empty() {
            base = format!("col_{}", idx + 1);
        }
        let mut name = base.clone();
        let counter = seen.entry(base.clone()).or_insert(0);
        *counter += 1;
        if *counter > 1 || taken.contains(&name) {
            let mut suffix = (*counter).max(2);
            loop {
                name = format!("{base}_{suffix}");
                if !taken.contains(&name) {
                    break;
                }
                suffix += 1;
            }
        }
        taken.insert(name.clone());
        out.push(name);
    }
    out
}

/// Integer-valued CIKs below 10^10 are zero-padded to ten digits; anything
/// else is trimmed and upper-cased.
pub fn normalize_cik(raw: Option<&str>) -> String {
    let text = raw.unwrap_or("").trim();
    if text.is_empty() {
        return String::new();
    }
    match text.parse::<f64>() {
        Ok(value) if (0.0..MAX_CIK).contains(&value) => format!("{:010}", value.trunc() as u64),
        _ => text.to_uppercase(),
    }
}

/// Maps normalized header names to their columns and resolves the schema.
pub fn validate_schema(table: RawTable) -> Result<RawRecords, ExtractError> {
    let names = normalize_headers(&table.headers);
    let mut lookup = ColumnLookup {
        columns: names.into_iter().zip(table.columns).collect(),
        missing: Vec::new(),
    };

    let cik = lookup.required(Field::Cik);
    let emerge = lookup.required(Field::Emerge);
    let assets_before = lookup.required(Field::AssetsBefore);
    let liab_before = lookup.required(Field::LiabBefore);
    let ebit_before = lookup.required(Field::EbitBefore);
    let net_income_before = lookup.required(Field::NetIncomeBefore);
    let empl_before = lookup.required(Field::EmplBefore);
    let voluntary = lookup.required(Field::Voluntary);
    let ceo_replaced = lookup.required(Field::CeoReplaced);
    let chapter = lookup.required(Field::Chapter);
    let claims_agent = lookup.required(Field::ClaimsAgent);
    let comm_cred = lookup.required(Field::CommCred);
    let late_filer_flag_180d = lookup.required(Field::LateFilerFlag180d);
    let prepackaged = lookup.optional(Field::Prepackaged);

    if !lookup.missing.is_empty() {
        return Err(ExtractError::MissingColumns {
            missing: lookup.missing,
        });
    }
    if prepackaged.is_none() {
        log::warn!(
            "Optional column '{}' not found; specifications using it will be skipped",
            Field::Prepackaged.name()
        );
    }

    Ok(RawRecords {
        cik: cik.iter().map(|v| normalize_cik(v.as_deref())).collect(),
        emerge,
        assets_before,
        liab_before,
        ebit_before,
        net_income_before,
        empl_before,
        voluntary,
        ceo_replaced,
        chapter,
        claims_agent,
        comm_cred,
        late_filer_flag_180d,
        prepackaged,
    })
}

struct ColumnLookup {
    columns: HashMap<String, Vec<Option<String>>>,
    missing: Vec<String>,
}

impl ColumnLookup {
    fn optional(&mut self, field: Field) -> Option<Vec<Option<String>>> {
        field.aliases().iter().find_map(|alias| {
            self.columns
                .remove(*alias)
                .or_else(|| self.columns.remove(&format!("brd_{alias}")))
        })
    }

    /// Records the field as missing and yields an empty placeholder when absent.
    fn required(&mut self, field: Field) -> Vec<Option<String>> {
        match self.optional(field) {
            Some(values) => values,
            None => {
                self.missing.push(field.name().to_string());
                Vec::new()
            }
        }
    }
}
