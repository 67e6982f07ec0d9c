//! Bundle file body parser
//!
//! A bundle body is a sequence of records, each introduced by a delimiter
//! line (`<DOCID>value` for document streams, `<USERID>value` for user and
//! order streams) and followed by `<PROPNAME>value` lines, one property per
//! line. A line that does not open a property continues the previous
//! value across the line break.
//!
//! The reader is lazy (one record at a time) and restartable (re-open the
//! file). Delete bundles have a fast path that materializes just the DOCID
//! values.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use vireo_core::{EngineError, EngineResult, RawDoc};

/// Which header line starts a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDelimiter {
    /// Document streams: records start at `<DOCID>`.
    DocId,
    /// User and order streams: records start at `<USERID>`.
    UserId,
}

impl RecordDelimiter {
    fn property(&self) -> &'static str {
        match self {
            RecordDelimiter::DocId => "DOCID",
            RecordDelimiter::UserId => "USERID",
        }
    }
}

/// Lazy reader over the records of one bundle file.
pub struct BundleReader {
    lines: std::io::Lines<BufReader<File>>,
    delimiter: RecordDelimiter,
    /// Delimiter line carried over from the previous record's scan.
    pending: Option<(String, String)>,
    started: bool,
    path: String,
}

impl BundleReader {
    /// Open a bundle file for record iteration.
    pub fn open(path: &Path, delimiter: RecordDelimiter) -> EngineResult<Self> {
        let file = File::open(path)?;
        Ok(BundleReader {
            lines: BufReader::new(file).lines(),
            delimiter,
            pending: None,
            started: false,
            path: path.display().to_string(),
        })
    }

    /// Read the next record, or `None` at end of file.
    ///
    /// Fails with `BadFormat` when content precedes the first delimiter
    /// line or the file contains no records at all.
    pub fn next_record(&mut self) -> EngineResult<Option<RawDoc>> {
        let mut record: RawDoc = match self.pending.take() {
            Some(header) => vec![header],
            None => Vec::new(),
        };

        loop {
            let line = match self.lines.next() {
                Some(line) => line?,
                None => {
                    return if record.is_empty() {
                        if self.started {
                            Ok(None)
                        } else {
                            Err(EngineError::bad_format(format!(
                                "{}: no record header found",
                                self.path
                            )))
                        }
                    } else {
                        Ok(Some(record))
                    };
                }
            };

            if line.trim().is_empty() && record.is_empty() {
                continue;
            }

            match parse_property_line(&line) {
                Some((name, value)) => {
                    let is_header = name.eq_ignore_ascii_case(self.delimiter.property());
                    if is_header {
                        if record.is_empty() {
                            self.started = true;
                            record.push((name, value));
                        } else {
                            // Next record begins; hand back the current one.
                            self.pending = Some((name, value));
                            return Ok(Some(record));
                        }
                    } else if record.is_empty() {
                        return Err(EngineError::bad_format(format!(
                            "{}: property <{}> before record header",
                            self.path, name
                        )));
                    } else {
                        record.push((name, value));
                    }
                }
                None => {
                    // Continuation of the previous property's value.
                    match record.last_mut() {
                        Some((_, value)) => {
                            value.push('\n');
                            value.push_str(&line);
                        }
                        None => {
                            return Err(EngineError::bad_format(format!(
                                "{}: content before record header",
                                self.path
                            )));
                        }
                    }
                }
            }
        }
    }

    /// Materialize just the delimiter values (the DOCID list of a delete
    /// bundle) without building full records.
    pub fn doc_id_list(path: &Path, delimiter: RecordDelimiter) -> EngineResult<Vec<String>> {
        let mut reader = BundleReader::open(path, delimiter)?;
        let mut ids = Vec::new();
        while let Some(record) = reader.next_record()? {
            if let Some((_, value)) = record.first() {
                ids.push(value.clone());
            }
        }
        Ok(ids)
    }
}

impl Iterator for BundleReader {
    type Item = EngineResult<RawDoc>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Parse a `<PROPNAME>value` line. `None` when the line does not open a
/// property (continuation line).
fn parse_property_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix('<')?;
    let close = rest.find('>')?;
    let name = &rest[..close];
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }
    Some((name.to_string(), rest[close + 1..].to_string()))
}
