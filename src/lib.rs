//! # vireo
//!
//! A collection-oriented search and recommendation engine core.
//!
//! vireo consumes a stream of document bundles (inserts, updates, deletes)
//! and maintains three interdependent stores: an inverted search index fed
//! through pluggable store contracts, a recommendation co-occurrence
//! pipeline, and a rotating on-disk data directory supporting online
//! backups.
//!
//! # Components
//!
//! | Component | Purpose | Entry point |
//! |-----------|---------|-------------|
//! | **Job scheduler** | Per-collection single-consumer task queue | [`JobScheduler`] |
//! | **Directory rotator** | Current/next data-directory pair with atomic handover | [`DirectoryRotator`] |
//! | **Bundle scanner/parser** | Discover, order, and decode bundle files | [`bundle`] |
//! | **Document preparer** | In-memory document build + R-type classification | [`DocumentPreparer`] |
//! | **Index worker** | Build-pass state machine over the document/index stores | [`IndexWorker`] |
//! | **Recommend service** | User/order ingest and similarity-matrix upkeep | [`RecommendTaskService`] |
//! | **Log forwarder** | Fire-and-forget mutation mirror | [`LogForwarder`] |
//!
//! Storage engines (document store, index store, id manager, analyzer,
//! similarity matrix) are collaborators behind the traits in
//! [`vireo_core::traits`]; in-memory reference implementations live in
//! [`vireo_engine::memstore`].

pub use vireo_core::{
    CollectionConfig, CollectionSchema, Document, EngineError, EngineResult, IndexDocument,
    PropertyKind, PropertySchema, PropertyValue,
};
pub use vireo_engine::bundle;
pub use vireo_engine::directory::{Directory, DirectoryGuard, DirectoryRotator};
pub use vireo_engine::logserver::LogForwarder;
pub use vireo_engine::prepare::DocumentPreparer;
pub use vireo_engine::recommend::RecommendTaskService;
pub use vireo_engine::scheduler::JobScheduler;
pub use vireo_engine::worker::IndexWorker;
