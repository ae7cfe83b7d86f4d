//! Schema-tolerant reader for the depository's delimited exports.
//!
//! The header line is resolved once against a declared `RecordSchema`:
//! header tokens are trimmed and case-folded, so column order and case in
//! the file do not matter. Missing required columns fail the open before a
//! single row is yielded.

use crate::error::{ReconError, ReconResult};
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Case-folded header name.
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind, required: true }
}

const fn optional(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind, required: false }
}

#[derive(Debug)]
pub struct RecordSchema {
    pub file: &'static str,
    pub columns: &'static [ColumnSpec],
}

pub const COL_SETTLEMENT: &str = "sctiessttlmtxid";
pub const COL_SYMBOL: &str = "tckrsymb";
pub const COL_ISIN: &str = "isin";
pub const COL_CLIENT: &str = "clntid";
pub const COL_SHORT_QTY: &str = "shrtqty";
pub const COL_DELIVERY_QTY: &str = "qtyorshrtqty";

/// Daily shortage export.
pub static SHORTAGE_SCHEMA: RecordSchema = RecordSchema {
    file: "shortage",
    columns: &[
        required(COL_SETTLEMENT, ColumnKind::Text),
        required(COL_SYMBOL, ColumnKind::Text),
        optional(COL_ISIN, ColumnKind::Text),
        optional(COL_SHORT_QTY, ColumnKind::Integer),
    ],
};

/// Next-cycle delivery/receipt export.
pub static DELIVERY_SCHEMA: RecordSchema = RecordSchema {
    file: "delivery",
    columns: &[
        required(COL_SETTLEMENT, ColumnKind::Text),
        required(COL_CLIENT, ColumnKind::Text),
        required(COL_DELIVERY_QTY, ColumnKind::Integer),
        required(COL_SYMBOL, ColumnKind::Text),
        required(COL_ISIN, ColumnKind::Text),
    ],
};

impl RecordSchema {
    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
}

/// One data line, holding a value for every column the schema declares.
#[derive(Debug, Clone)]
pub struct Row {
    schema: &'static RecordSchema,
    values: Vec<FieldValue>,
    pub line: u64,
}

impl Row {
    fn field(&self, name: &str) -> &FieldValue {
        self.schema
            .position(name)
            .map(|i| &self.values[i])
            .unwrap_or(&FieldValue::Null)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.field(name) {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.field(name) {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

/// Lazy, single-pass stream of header-resolved rows.
pub struct DelimitedRecordReader {
    reader: csv::Reader<Box<dyn Read>>,
    schema: &'static RecordSchema,
    /// File column index for each schema column, if the header carried it.
    indices: Vec<Option<usize>>,
    record: StringRecord,
    soft_failures: usize,
    rows_read: usize,
    done: bool,
}

impl std::fmt::Debug for DelimitedRecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedRecordReader")
            .field("file", &self.schema.file)
            .field("rows_read", &self.rows_read)
            .field("soft_failures", &self.soft_failures)
            .finish()
    }
}

impl DelimitedRecordReader {
    /// Open `input`, gunzipping first when `compressed`, and resolve its header
    /// against `schema`.
    pub fn open<R: Read + 'static>(
        input: R,
        compressed: bool,
        schema: &'static RecordSchema,
    ) -> ReconResult<Self> {
        let input: Box<dyn Read> = if compressed {
            Box::new(GzDecoder::new(input))
        } else {
            Box::new(input)
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(ReconError::EmptyFile {
                file: schema.file.to_string(),
            });
        }

        let indices: Vec<Option<usize>> = schema
            .columns
            .iter()
            .map(|c| headers.iter().position(|h| h == c.name))
            .collect();

        let missing: Vec<String> = schema
            .columns
            .iter()
            .zip(&indices)
            .filter(|(c, idx)| c.required && idx.is_none())
            .map(|(c, _)| c.name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReconError::MissingColumns {
                file: schema.file.to_string(),
                missing,
            });
        }

        Ok(Self {
            reader,
            schema,
            indices,
            record: StringRecord::new(),
            soft_failures: 0,
            rows_read: 0,
            done: false,
        })
    }

    /// Present numeric fields that failed to parse and were read as null.
    pub fn soft_failures(&self) -> usize {
        self.soft_failures
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    fn build_row(&mut self) -> Row {
        let line = self.record.position().map(|p| p.line()).unwrap_or(0);
        let mut values = Vec::with_capacity(self.schema.columns.len());
        for (spec, idx) in self.schema.columns.iter().zip(&self.indices) {
            let raw = idx.and_then(|i| self.record.get(i)).unwrap_or("");
            let value = if raw.is_empty() {
                FieldValue::Null
            } else {
                match spec.kind {
                    ColumnKind::Text => FieldValue::Text(raw.to_string()),
                    ColumnKind::Integer => match raw.parse::<i64>() {
                        Ok(n) => FieldValue::Integer(n),
                        Err(_) => {
                            self.soft_failures += 1;
                            log::debug!(
                                "{} file line {line}: unparseable {} value '{raw}'",
                                self.schema.file,
                                spec.name
                            );
                            FieldValue::Null
                        }
                    },
                }
            };
            values.push(value);
        }
        Row {
            schema: self.schema,
            values,
            line,
        }
    }
}

impl Iterator for DelimitedRecordReader {
    type Item = ReconResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Ok(true) => {
                    if self.record.iter().all(|f| f.is_empty()) {
                        continue;
                    }
                    self.rows_read += 1;
                    return Some(Ok(self.build_row()));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
