//! Reading and writing SPSS system files (`.sav`).
//!
//! Supports the uncompressed and bytecode-compressed layouts, long variable names,
//! very long strings, variable labels, numeric value labels and missing-value
//! definitions. Text is decoded with the file's character encoding and always written
//! as UTF-8. Zlib-compressed (`$FL3`) files are rejected.

pub mod reader;
pub mod writer;

use chrono::{Duration, NaiveDate, NaiveDateTime};

pub use reader::{parse_sav, read_sav};
pub use writer::{write_sav, WriteOptions};

/// The system-missing value.
pub const SYSMIS: f64 = -f64::MAX;

const FMT_A: u8 = 1;
const FMT_F: u8 = 5;
const FMT_DATE: u8 = 20;
const FMT_DATETIME: u8 = 22;
const FMT_ADATE: u8 = 23;
const FMT_JDATE: u8 = 24;
const FMT_EDATE: u8 = 38;
const FMT_SDATE: u8 = 39;

/// Print/write format, packed on disk as `type << 16 | width << 8 | decimals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub kind: u8,
    pub width: u8,
    pub decimals: u8,
}

impl Format {
    pub const fn numeric(width: u8, decimals: u8) -> Self {
        Format {
            kind: FMT_F,
            width,
            decimals,
        }
    }

    pub const fn string(width: u8) -> Self {
        Format {
            kind: FMT_A,
            width,
            decimals: 0,
        }
    }

    pub const fn date() -> Self {
        Format {
            kind: FMT_DATE,
            width: 11,
            decimals: 0,
        }
    }

    /// Whether values are dates (seconds since 1582-10-14 at midnight).
    pub fn is_date(self) -> bool {
        matches!(
            self.kind,
            FMT_DATE | FMT_ADATE | FMT_JDATE | FMT_EDATE | FMT_SDATE
        )
    }

    pub fn is_datetime(self) -> bool {
        self.kind == FMT_DATETIME
    }

    pub fn pack(self) -> i32 {
        (i32::from(self.kind) << 16) | (i32::from(self.width) << 8) | i32::from(self.decimals)
    }

    pub fn unpack(raw: i32) -> Self {
        Format {
            kind: ((raw >> 16) & 0xff) as u8,
            width: ((raw >> 8) & 0xff) as u8,
            decimals: (raw & 0xff) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MissingValues {
    #[default]
    None,
    Discrete(Vec<f64>),
    Range { low: f64, high: f64 },
    RangeAndValue { low: f64, high: f64, value: f64 },
    /// Up to three 8-byte string values.
    Strings(Vec<[u8; 8]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub label: Option<String>,
    /// 0 for numeric variables, otherwise the string width in bytes.
    pub width: usize,
    pub print: Format,
    pub write: Format,
    pub value_labels: Vec<(f64, String)>,
    pub missing: MissingValues,
}

impl Variable {
    pub fn numeric(name: &str, label: Option<&str>, format: Format) -> Self {
        Variable {
            name: name.to_string(),
            label: label.map(str::to_string),
            width: 0,
            print: format,
            write: format,
            value_labels: Vec::new(),
            missing: MissingValues::None,
        }
    }

    pub fn string(name: &str, label: Option<&str>, width: usize) -> Self {
        let format = Format::string(width.clamp(1, 255) as u8);
        Variable {
            name: name.to_string(),
            label: label.map(str::to_string),
            width: width.max(1),
            print: format,
            write: format,
            value_labels: Vec::new(),
            missing: MissingValues::None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.width == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rectangular SPSS dataset: one column per variable, one row per case.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub file_label: String,
    pub variables: Vec<Variable>,
    pub columns: Vec<Column>,
}

impl Dataset {
    pub fn n_cases(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn push(&mut self, variable: Variable, column: Column) {
        self.variables.push(variable);
        self.columns.push(column);
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .position(|v| v.name.eq_ignore_ascii_case(name))
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.columns.get(self.position(name)?)? {
            Column::Numeric(values) => Some(values),
            Column::Text(_) => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(self.position(name)?)? {
            Column::Text(values) => Some(values),
            Column::Numeric(_) => None,
        }
    }
}

fn spss_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1582, 10, 14)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Converts an SPSS date or datetime (seconds since 1582-10-14) to a timestamp.
pub fn to_datetime(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round() as i64;
    spss_epoch().checked_add_signed(Duration::milliseconds(millis))
}

pub fn to_date(seconds: f64) -> Option<NaiveDate> {
    to_datetime(seconds).map(|dt| dt.date())
}

pub fn from_date(date: NaiveDate) -> f64 {
    (date.and_hms_opt(0, 0, 0).unwrap_or_default() - spss_epoch()).num_seconds() as f64
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_pack_formats() {
        assert_eq!(Format::numeric(8, 2).pack(), 0x050802);
        assert_eq!(Format::unpack(0x140b00), Format::date());
        assert!(Format::date().is_date());
        assert!(Format::unpack(0x161400).is_datetime());
        assert!(!Format::numeric(8, 2).is_date());
    }

    #[test]
    fn should_convert_spss_dates() {
        let date = NaiveDate::from_ymd_opt(2016, 9, 23).unwrap();
        let seconds = from_date(date);

        assert_eq!(seconds, 13_693_968_000.0);
        assert_eq!(to_date(seconds), Some(date));
        assert_eq!(to_date(seconds + 15.5 * 3600.0), Some(date));
    }

    #[test]
    fn should_find_columns_case_insensitively() {
        let mut dataset = Dataset::default();
        dataset.push(
            Variable::string("region", None, 5),
            Column::Text(vec!["AT13".to_string()]),
        );
        dataset.push(
            Variable::numeric("INWYYS", None, Format::numeric(4, 0)),
            Column::Numeric(vec![Some(2016.0)]),
        );

        assert_eq!(dataset.text("REGION").map(|v| v.len()), Some(1));
        assert_eq!(dataset.numeric("inwyys"), Some(&[Some(2016.0)][..]));
        assert!(dataset.numeric("region").is_none());
        assert_eq!(dataset.n_cases(), 1);
    }
}
