//! Error types for the vireo engine
//!
//! `EngineError` is the unified error type for all vireo APIs. The variants
//! map onto the failure classes the pipeline distinguishes:
//!
//! | Variant | Scope | Handling |
//! |---------|-------|----------|
//! | `BadFormat` | bundle name or body | skip the affected file or record |
//! | `SchemaViolation` | unknown property, missing required key | skip record, log |
//! | `IdConflict` | docid already present, hash already mapped | skip record, log |
//! | `StoreError` | document/index store rejected a write | skip record, log |
//! | `DirectoryDirty` | guard acquisition failed | abort the pass |
//! | `Filesystem` | directory scan or rename failed | abort the pass (scan) or log (rename) |
//! | `Cancelled` | cancellation checkpoint fired | graceful partial commit |
//! | `InvalidConfig` | unusable configuration or cron expression | surfaced at startup |
//!
//! Per-document errors are caught at the dispatcher level and never surface
//! past a build pass; per-pass errors propagate as `EngineResult` to the
//! scheduler task, which logs and continues.

use thiserror::Error;

/// Unified error type for the vireo pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed bundle file name or body.
    #[error("bad bundle format: {reason}")]
    BadFormat {
        /// What was malformed.
        reason: String,
    },

    /// Unknown property or missing required key in a record.
    #[error("schema violation: {reason}")]
    SchemaViolation {
        /// Which rule the record violated.
        reason: String,
    },

    /// Document id already present, or a content hash already mapped.
    #[error("id conflict: {reason}")]
    IdConflict {
        /// The conflicting identifier.
        reason: String,
    },

    /// A document or index store rejected a write.
    #[error("store error: {reason}")]
    StoreError {
        /// The store's rejection reason.
        reason: String,
    },

    /// A directory guard could not be acquired.
    #[error("data directory '{name}' is dirty")]
    DirectoryDirty {
        /// Name of the dirty directory.
        name: String,
    },

    /// Filesystem failure during scan, copy, or rename.
    #[error("filesystem error: {source}")]
    Filesystem {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The operation was cancelled at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,

    /// Unusable configuration value.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which setting is invalid and why.
        reason: String,
    },
}

impl EngineError {
    /// Construct a `BadFormat` error.
    pub fn bad_format(reason: impl Into<String>) -> Self {
        EngineError::BadFormat {
            reason: reason.into(),
        }
    }

    /// Construct a `SchemaViolation` error.
    pub fn schema(reason: impl Into<String>) -> Self {
        EngineError::SchemaViolation {
            reason: reason.into(),
        }
    }

    /// Construct an `IdConflict` error.
    pub fn id_conflict(reason: impl Into<String>) -> Self {
        EngineError::IdConflict {
            reason: reason.into(),
        }
    }

    /// Construct a `StoreError`.
    pub fn store(reason: impl Into<String>) -> Self {
        EngineError::StoreError {
            reason: reason.into(),
        }
    }

    /// Construct a `DirectoryDirty` error.
    pub fn dirty(name: impl Into<String>) -> Self {
        EngineError::DirectoryDirty { name: name.into() }
    }

    /// Construct an `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Errors that are scoped to a single document and must not abort the
    /// enclosing build pass.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            EngineError::BadFormat { .. }
                | EngineError::SchemaViolation { .. }
                | EngineError::IdConflict { .. }
                | EngineError::StoreError { .. }
        )
    }

    /// Errors that abort the whole build pass.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            EngineError::DirectoryDirty { .. }
                | EngineError::Filesystem { .. }
                | EngineError::Cancelled
        )
    }
}

/// Result alias used throughout the vireo crates.
pub type EngineResult<T> = Result<T, EngineError>;
