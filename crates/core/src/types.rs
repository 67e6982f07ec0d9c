//! Identifier and timestamp types
//!
//! - `DocId`: 32-bit internal document identifier assigned by the id manager
//! - `ItemId`: 32-bit recommendation item identifier
//! - `TermId`: 32-bit analyzer term identifier
//! - `DocKey`: 128-bit content hash of the external DOCID string
//! - `CancellationToken`: cooperative cancellation checked at per-document
//!   granularity inside build loops
//!
//! Timestamps are epoch seconds everywhere except the indexing-hook
//! boundary, which receives microseconds (see `to_micros`).

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_128;

/// Internal document identifier. Zero is never a live docid.
pub type DocId = u32;

/// Recommendation item identifier.
pub type ItemId = u32;

/// Analyzer term identifier.
pub type TermId = u32;

/// 128-bit content hash of an external DOCID string.
///
/// For a given key there is at most one live [`DocId`]; on a full update the
/// previous docid is retired and a new one issued.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DocKey(pub u128);

impl DocKey {
    /// Hash an external DOCID string to its 128-bit key.
    pub fn from_name(name: &str) -> Self {
        DocKey(xxh3_128(name.as_bytes()))
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Compact bundle date format: `YYYYMMDDhhmmss`.
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Current wall-clock time in epoch seconds.
pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Convert a second-scale timestamp to the microsecond scale the indexing
/// hook contract expects. Stores always receive second-scale values.
pub fn to_micros(seconds: i64) -> i64 {
    seconds.saturating_mul(1_000_000)
}

/// Parse a compact `YYYYMMDDhhmmss` date string into epoch seconds.
pub fn parse_compact_date(s: &str) -> EngineResult<i64> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), COMPACT_DATE_FORMAT)
        .map_err(|e| EngineError::bad_format(format!("date '{}': {}", s, e)))?;
    Ok(naive.and_utc().timestamp())
}

/// Render epoch seconds as the canonical compact date string.
pub fn compact_date_string(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|t| t.format(COMPACT_DATE_FORMAT).to_string())
        .unwrap_or_else(|| "19700101000000".to_string())
}

// ============================================================================
// CancellationToken
// ============================================================================

/// Cooperative cancellation signal.
///
/// Build loops call [`CancellationToken::checkpoint`] once per document; a
/// cancelled token makes the checkpoint return `EngineError::Cancelled`, and
/// the loop exits cleanly at that point. Cloning shares the signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all clones of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fail with `Cancelled` if cancellation has been signalled.
    pub fn checkpoint(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dockey_is_stable_and_distinct() {
        assert_eq!(DocKey::from_name("A"), DocKey::from_name("A"));
        assert_ne!(DocKey::from_name("A"), DocKey::from_name("B"));
    }

    #[test]
    fn compact_date_roundtrip() {
        let secs = parse_compact_date("20091009163011").unwrap();
        assert_eq!(compact_date_string(secs), "20091009163011");
    }

    #[test]
    fn compact_date_rejects_garbage() {
        assert!(parse_compact_date("not-a-date").is_err());
        assert!(parse_compact_date("2009").is_err());
    }

    #[test]
    fn micros_conversion() {
        assert_eq!(to_micros(12), 12_000_000);
    }

    #[test]
    fn cancellation_checkpoint() {
        let token = CancellationToken::new();
        assert!(token.checkpoint().is_ok());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(EngineError::Cancelled)));
    }
}
