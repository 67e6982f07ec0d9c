//! Bundle files: naming, discovery, and parsing
//!
//! A bundle file is a text batch of document mutations. The file name
//! encodes everything the scheduler needs:
//!
//! ```text
//! B-NN-YYYYMMDDhhmm-ssuuu-T-C.SCD
//!   │  │            │     │ └─ collection tag
//!   │  │            │     └─── type: I(nsert) U(pdate) D(elete) R(ebuild)
//!   │  │            └───────── seconds + milliseconds
//!   │  └────────────────────── local timestamp, minute precision
//!   └───────────────────────── two-digit sequence
//! ```
//!
//! The canonical processing order is lexicographic on the full name, which
//! is chronological by embedded timestamp, then by sequence.

pub mod parser;
pub mod scan;

use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::path::PathBuf;
use vireo_core::{EngineError, EngineResult};

/// Bundle mutation type, encoded in the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleType {
    /// New documents.
    Insert,
    /// Mutations of existing documents.
    Update,
    /// DOCID lists to delete.
    Delete,
    /// Rebuild marker; routed through the rebuild coordinator, never the
    /// bundle dispatcher.
    Rebuild,
}

impl BundleType {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "I" => Some(BundleType::Insert),
            "U" => Some(BundleType::Update),
            "D" => Some(BundleType::Delete),
            "R" => Some(BundleType::Rebuild),
            _ => None,
        }
    }

    /// Short label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            BundleType::Insert => "insert",
            BundleType::Update => "update",
            BundleType::Delete => "delete",
            BundleType::Rebuild => "rebuild",
        }
    }
}

/// A validated bundle file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleName {
    raw: String,
    sequence: u32,
    timestamp: i64,
    bundle_type: BundleType,
    collection_tag: String,
}

impl BundleName {
    /// Parse and validate a bundle file name.
    pub fn parse(name: &str) -> EngineResult<Self> {
        let stem = name
            .strip_suffix(".SCD")
            .or_else(|| name.strip_suffix(".scd"))
            .ok_or_else(|| EngineError::bad_format(format!("'{}': missing .SCD suffix", name)))?;

        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() != 6 || parts[0] != "B" {
            return Err(EngineError::bad_format(format!(
                "'{}': expected B-NN-YYYYMMDDhhmm-ssuuu-T-C.SCD",
                name
            )));
        }

        let sequence: u32 = parts[1]
            .parse()
            .ok()
            .filter(|_| parts[1].len() == 2)
            .ok_or_else(|| {
                EngineError::bad_format(format!("'{}': bad sequence '{}'", name, parts[1]))
            })?;

        if parts[2].len() != 12 || parts[3].len() != 5 {
            return Err(EngineError::bad_format(format!(
                "'{}': bad timestamp fields",
                name
            )));
        }
        let compact = format!("{}{}", parts[2], &parts[3][..2]);
        let timestamp = NaiveDateTime::parse_from_str(&compact, "%Y%m%d%H%M%S")
            .map_err(|e| EngineError::bad_format(format!("'{}': bad timestamp: {}", name, e)))?
            .and_utc()
            .timestamp();

        let bundle_type = BundleType::from_tag(parts[4]).ok_or_else(|| {
            EngineError::bad_format(format!("'{}': unknown type tag '{}'", name, parts[4]))
        })?;

        if parts[5].is_empty() {
            return Err(EngineError::bad_format(format!(
                "'{}': empty collection tag",
                name
            )));
        }

        Ok(BundleName {
            raw: name.to_string(),
            sequence,
            timestamp,
            bundle_type,
            collection_tag: parts[5].to_string(),
        })
    }

    /// The full original file name.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Two-digit sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Timestamp embedded in the name, in epoch seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Mutation type encoded in the name.
    pub fn bundle_type(&self) -> BundleType {
        self.bundle_type
    }

    /// Collection tag.
    pub fn collection_tag(&self) -> &str {
        &self.collection_tag
    }
}

// Canonical sort: lexicographic on the full name.
impl Ord for BundleName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for BundleName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A discovered bundle file: validated name plus location and size.
#[derive(Debug, Clone)]
pub struct BundleFile {
    /// Full path of the file.
    pub path: PathBuf,
    /// Validated name.
    pub name: BundleName,
    /// File size in bytes.
    pub size: u64,
}
