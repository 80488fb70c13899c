//! Upstream record sources.
//!
//! The writer consumes records as plain string fields. Sources that carry typed
//! values convert them with a [`ColumnFormatter`], which renders nulls as the
//! configured literal and dates with the configured pattern.

use crate::config::{DEFAULT_FIELD_DELIMITER, DEFAULT_NULL_FORMAT, JobSettings};
use crate::error::{Result, RollError};
use chrono::NaiveDateTime;
use std::io::BufRead;

/// Rendering used for dates when no pattern is configured.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Pull-based stream of records.
pub trait RecordSource {
    /// The next record, or `None` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`RollError::Source`] if the upstream failed.
    fn next_record(&mut self) -> Result<Option<Vec<String>>>;
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Null,
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    Date(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl From<&str> for Column {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Column {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Column {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for Column {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for Column {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDateTime> for Column {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Column {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Renders typed columns as record fields.
#[derive(Debug, Clone)]
pub struct ColumnFormatter {
    null_format: String,
    date_format: Option<String>,
}

impl Default for ColumnFormatter {
    fn default() -> Self {
        Self {
            null_format: DEFAULT_NULL_FORMAT.to_string(),
            date_format: None,
        }
    }
}

impl ColumnFormatter {
    #[must_use]
    pub fn new(null_format: impl Into<String>, date_format: Option<String>) -> Self {
        Self {
            null_format: null_format.into(),
            date_format,
        }
    }

    /// Formatter using a job's `nullFormat` and `dateFormat`.
    #[must_use]
    pub fn from_settings(settings: &JobSettings) -> Self {
        Self::new(settings.null_format.clone(), settings.date_format.clone())
    }

    #[must_use]
    pub fn format(&self, column: &Column) -> String {
        match column {
            Column::Null => self.null_format.clone(),
            Column::String(s) => s.clone(),
            Column::Long(v) => v.to_string(),
            Column::Double(v) => v.to_string(),
            Column::Bool(v) => v.to_string(),
            Column::Date(d) => d
                .format(self.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT))
                .to_string(),
            Column::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    #[must_use]
    pub fn format_row(&self, columns: &[Column]) -> Vec<String> {
        columns.iter().map(|c| self.format(c)).collect()
    }
}

/// Source over an iterator of ready-made records.
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    inner: I,
}

pub type VecSource = IterSource<std::vec::IntoIter<Vec<String>>>;

impl<I> IterSource<I>
where
    I: Iterator<Item = Vec<String>>,
{
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: rows.into_iter(),
        }
    }
}

impl<I> RecordSource for IterSource<I>
where
    I: Iterator<Item = Vec<String>>,
{
    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.inner.next())
    }
}

/// Source over typed rows, rendered with a [`ColumnFormatter`].
#[derive(Debug, Clone)]
pub struct ColumnSource<I> {
    inner: I,
    formatter: ColumnFormatter,
}

impl<I> ColumnSource<I>
where
    I: Iterator<Item = Vec<Column>>,
{
    pub fn new(rows: impl IntoIterator<IntoIter = I>, formatter: ColumnFormatter) -> Self {
        Self {
            inner: rows.into_iter(),
            formatter,
        }
    }
}

impl<I> RecordSource for ColumnSource<I>
where
    I: Iterator<Item = Vec<Column>>,
{
    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.inner.next().map(|row| self.formatter.format_row(&row)))
    }
}

/// Reads one record per line and splits it on a delimiter. No quoting.
#[derive(Debug)]
pub struct DelimitedLineSource<R> {
    reader: R,
    delimiter: char,
    line: String,
}

impl<R: BufRead> DelimitedLineSource<R> {
    pub const fn new(reader: R, delimiter: char) -> Self {
        Self {
            reader,
            delimiter,
            line: String::new(),
        }
    }

    pub const fn with_default_delimiter(reader: R) -> Self {
        Self::new(reader, DEFAULT_FIELD_DELIMITER)
    }
}

impl<R: BufRead> RecordSource for DelimitedLineSource<R> {
    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .map_err(|e| RollError::Source(format!("read input line: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        let line = self
            .line
            .strip_suffix('\n')
            .map_or(self.line.as_str(), |l| l.strip_suffix('\r').unwrap_or(l));
        Ok(Some(line.split(self.delimiter).map(str::to_string).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 0, 5)
            .unwrap()
    }

    #[test]
    fn nulls_and_dates() {
        let f = ColumnFormatter::default();
        let row = vec![
            Column::Null,
            Column::from(7_i64),
            Column::from(noon()),
            Column::from(Option::<bool>::None),
            Column::Bytes(b"raw".to_vec()),
        ];
        assert_eq!(
            f.format_row(&row),
            vec!["null", "7", "2024-03-09 12:00:05", "null", "raw"]
        );

        let f = ColumnFormatter::new("\\N", Some("%d/%m/%Y".into()));
        assert_eq!(f.format(&Column::Null), "\\N");
        assert_eq!(f.format(&Column::Date(noon())), "09/03/2024");
        assert_eq!(f.format(&Column::Bool(true)), "true");
    }

    #[test]
    fn delimited_lines_split_and_strip_terminators() {
        let input = "a,b,c\r\nd\n\n,x";
        let mut src = DelimitedLineSource::with_default_delimiter(input.as_bytes());
        assert_eq!(src.next_record().unwrap().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(src.next_record().unwrap().unwrap(), vec!["d"]);
        assert_eq!(src.next_record().unwrap().unwrap(), vec![""]);
        assert_eq!(src.next_record().unwrap().unwrap(), vec!["", "x"]);
        assert!(src.next_record().unwrap().is_none());
    }

    #[test]
    fn column_source_formats_rows() {
        let mut src = ColumnSource::new(
            vec![vec![Column::from("k"), Column::Null]],
            ColumnFormatter::new("NULL", None),
        );
        assert_eq!(src.next_record().unwrap().unwrap(), vec!["k", "NULL"]);
        assert!(src.next_record().unwrap().is_none());
    }
}
