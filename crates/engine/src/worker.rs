//! Index worker: the build-pass state machine
//!
//! A build pass drives the bundle scanner, parser, and preparer against the
//! document and index stores:
//!
//! ```text
//! idle → scanning → (for each file) dispatching → mining → backup? → idle
//! ```
//!
//! The pass holds a directory guard on the current data directory for its
//! full duration. Per-document failures are logged and skipped; per-file
//! format failures abort that file but not the pass; filesystem errors on
//! scan and store failures during flush abort the pass. Cancellation is
//! checked per document and exits the loop with a partial commit.

use crate::bundle::parser::{BundleReader, RecordDelimiter};
use crate::bundle::scan::{backup_bundle_files, scan_bundle_dir, total_size_mb, BUNDLE_BACKUP_DIR};
use crate::bundle::{BundleFile, BundleType};
use crate::directory::{DirectoryGuard, DirectoryRotator};
use crate::logserver::LogForwarder;
use crate::prepare::{DocumentPreparer, Prepared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vireo_core::traits::{
    DocumentStore, IdManager, IndexMode, IndexStore, IndexingHook, LanguageAnalyzer,
    MiningService,
};
use vireo_core::types::{self, CancellationToken, DocId, DocKey};
use vireo_core::{
    CollectionConfig, CollectionSchema, Document, EngineError, EngineResult, IndexDocument,
    RawDoc, DOCID_PROPERTY,
};

/// Document-lifecycle state machine over the bundle stream.
pub struct IndexWorker {
    config: Arc<CollectionConfig>,
    rotator: Arc<DirectoryRotator>,
    id_manager: Arc<dyn IdManager>,
    doc_store: Arc<dyn DocumentStore>,
    index_store: Arc<dyn IndexStore>,
    preparer: DocumentPreparer,
    hook: Option<Arc<dyn IndexingHook>>,
    mining: Option<Arc<dyn MiningService>>,
    forwarder: Option<Arc<LogForwarder>>,
    cancel: CancellationToken,
    num_updated: AtomicU64,
    num_deleted: AtomicU64,
    mb_since_backup: AtomicU64,
}

impl IndexWorker {
    /// Wire a worker to its stores and data directories.
    pub fn new(
        config: Arc<CollectionConfig>,
        schema: Arc<CollectionSchema>,
        rotator: Arc<DirectoryRotator>,
        id_manager: Arc<dyn IdManager>,
        doc_store: Arc<dyn DocumentStore>,
        index_store: Arc<dyn IndexStore>,
        analyzer: Arc<dyn LanguageAnalyzer>,
    ) -> Self {
        let preparer = DocumentPreparer::new(
            Arc::clone(&schema),
            Arc::clone(&config),
            Arc::clone(&id_manager),
            Arc::clone(&doc_store),
            analyzer,
        );
        IndexWorker {
            config,
            rotator,
            id_manager,
            doc_store,
            index_store,
            preparer,
            hook: None,
            mining: None,
            forwarder: None,
            cancel: CancellationToken::new(),
            num_updated: AtomicU64::new(0),
            num_deleted: AtomicU64::new(0),
            mb_since_backup: AtomicU64::new(0),
        }
    }

    /// Attach an indexing hook.
    pub fn with_hook(mut self, hook: Arc<dyn IndexingHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Attach the mining collaborator.
    pub fn with_mining(mut self, mining: Arc<dyn MiningService>) -> Self {
        self.mining = Some(mining);
        self
    }

    /// Attach the log-server forwarder.
    pub fn with_forwarder(mut self, forwarder: Arc<LogForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// A clone of the worker's cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of documents updated by the current/last pass.
    pub fn updated_count(&self) -> u64 {
        self.num_updated.load(Ordering::Relaxed)
    }

    /// Number of documents deleted by the current/last pass.
    pub fn deleted_count(&self) -> u64 {
        self.num_deleted.load(Ordering::Relaxed)
    }

    /// Bundle megabytes absorbed since the last directory backup.
    pub fn mb_since_backup(&self) -> u64 {
        self.mb_since_backup.load(Ordering::Relaxed)
    }

    /// Number of live documents in the index.
    pub fn num_docs(&self) -> u64 {
        self.index_store.num_docs()
    }

    // ========================================================================
    // Build pass
    // ========================================================================

    /// Run one build pass over the bundle directory.
    ///
    /// `limit` bounds the number of documents taken from each insert bundle
    /// (used by partial-build requests); `None` processes everything.
    pub fn build_collection(&self, limit: Option<u64>) -> EngineResult<()> {
        info!(
            target: "vireo::worker",
            collection = %self.config.collection,
            "start building collection"
        );

        // The current directory may have been rotated in from the backup
        // copy; replay any bundles it has not absorbed yet.
        if let Err(e) = self.recover_bundles() {
            warn!(
                target: "vireo::worker",
                error = %e,
                "bundle recovery failed, continuing with what is on disk"
            );
        }

        let bundle_dir = self.config.index_bundle_dir.clone();
        let files = scan_bundle_dir(&bundle_dir)?;
        if files.is_empty() {
            warn!(
                target: "vireo::worker",
                dir = %bundle_dir.display(),
                "no bundle files to process"
            );
            return Ok(());
        }

        let total_mb = total_size_mb(&files);
        let mode = self.select_index_mode(total_mb);
        self.index_store.set_index_mode(mode);

        let current = self.rotator.current();
        let guard = DirectoryGuard::acquire(&current)?;

        for file in &files {
            info!(
                target: "vireo::worker",
                file = %file.name.as_str(),
                kind = file.name.bundle_type().label(),
                "bundle file queued"
            );
        }

        match self.dispatch_files(&files, limit) {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                // Graceful partial commit: everything dispatched so far is
                // already atomic at the store level; make it durable and
                // leave the remaining bundles for the next pass.
                let _ = self.doc_store.flush();
                let _ = self.id_manager.flush();
                let _ = self.index_store.commit();
                info!(
                    target: "vireo::worker",
                    collection = %self.config.collection,
                    "build pass cancelled, partial state committed"
                );
                return Err(EngineError::Cancelled);
            }
            Err(e) => {
                self.num_updated.store(0, Ordering::Relaxed);
                self.num_deleted.store(0, Ordering::Relaxed);
                return Err(e);
            }
        }

        self.doc_store.flush()?;
        self.id_manager.flush()?;
        if mode == IndexMode::Batch {
            self.index_store.commit()?;
        }

        if let Some(hook) = &self.hook {
            if !hook.on_finish() {
                error!(target: "vireo::worker", "indexing hook rejected finish");
                return Err(EngineError::store("indexing hook rejected finish"));
            }
        }

        if let Some(mining) = &self.mining {
            self.index_store.pause_merge();
            let mined = mining.mine_collection();
            self.index_store.resume_merge();
            mined?;
        }

        backup_bundle_files(&bundle_dir, &files, Some(&current));

        info!(
            target: "vireo::worker",
            collection = %self.config.collection,
            indexed = self.doc_store.max_doc_id(),
            updated = self.num_updated.load(Ordering::Relaxed),
            deleted = self.num_deleted.load(Ordering::Relaxed),
            "build pass finished"
        );
        self.num_updated.store(0, Ordering::Relaxed);
        self.num_deleted.store(0, Ordering::Relaxed);

        drop(guard);

        if self.require_backup(total_mb) {
            self.index_store.commit()?;
            self.rotator.backup_current()?;
            self.mb_since_backup.store(0, Ordering::Relaxed);
        }

        Ok(())
    }

    fn dispatch_files(&self, files: &[BundleFile], limit: Option<u64>) -> EngineResult<()> {
        for file in files {
            self.cancel.checkpoint()?;
            let timestamp = file.name.timestamp();

            let result = match file.name.bundle_type() {
                BundleType::Insert => self.insert_or_update_file(file, true, limit, timestamp),
                BundleType::Update => self.insert_or_update_file(file, false, None, timestamp),
                BundleType::Delete => {
                    if self.doc_store.max_doc_id() > 0 {
                        self.delete_file(file, timestamp)
                    } else {
                        warn!(
                            target: "vireo::worker",
                            file = %file.name.as_str(),
                            "no indexed documents, skipping delete bundle"
                        );
                        Ok(())
                    }
                }
                BundleType::Rebuild => {
                    warn!(
                        target: "vireo::worker",
                        file = %file.name.as_str(),
                        "rebuild bundles are driven through rebuild_collection, skipping"
                    );
                    Ok(())
                }
            };

            match result {
                Ok(()) => {}
                Err(EngineError::BadFormat { reason }) => {
                    error!(
                        target: "vireo::worker",
                        file = %file.name.as_str(),
                        %reason,
                        "bundle body invalid, file aborted"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn insert_or_update_file(
        &self,
        file: &BundleFile,
        is_insert: bool,
        limit: Option<u64>,
        timestamp: i64,
    ) -> EngineResult<()> {
        info!(
            target: "vireo::worker",
            file = %file.name.as_str(),
            "processing bundle file"
        );
        let mut reader = BundleReader::open(&file.path, RecordDelimiter::DocId)
            .map_err(|e| EngineError::bad_format(format!("cannot open bundle: {}", e)))?;

        let mut taken = 0u64;
        let mut source_counts: HashMap<String, u64> = HashMap::new();

        while let Some(record) = reader.next_record()? {
            self.cancel.checkpoint()?;
            if is_insert {
                if let Some(limit) = limit {
                    if taken >= limit {
                        break;
                    }
                }
            }
            taken += 1;

            let prepared = match self.preparer.prepare(&record, is_insert, timestamp) {
                Ok(Some(prepared)) => prepared,
                Ok(None) => continue,
                Err(e) if e.is_per_document() => {
                    warn!(
                        target: "vireo::worker",
                        file = %file.name.as_str(),
                        error = %e,
                        "skipping record"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(source) = &prepared.source {
                *source_counts.entry(source.clone()).or_default() += 1;
            }

            let outcome = if is_insert || prepared.old_id.is_none() {
                self.insert_doc(&prepared.document, &prepared.index_document, prepared.timestamp)
            } else {
                let updated = self.update_doc(&prepared);
                if updated.is_ok() {
                    self.num_updated.fetch_add(1, Ordering::Relaxed);
                }
                updated
            };

            match outcome {
                Ok(()) => {
                    if let Some(forwarder) = self.enabled_forwarder() {
                        forwarder.forward_upsert(prepared.key, &self.config.collection, &record);
                    }
                }
                Err(e) if e.is_per_document() => {
                    warn!(
                        target: "vireo::worker",
                        file = %file.name.as_str(),
                        docid = prepared.document.id(),
                        error = %e,
                        "document write failed, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.log_source_counts(if is_insert { "insert" } else { "update" }, &source_counts);
        Ok(())
    }

    fn delete_file(&self, file: &BundleFile, timestamp: i64) -> EngineResult<()> {
        info!(
            target: "vireo::worker",
            file = %file.name.as_str(),
            "processing delete bundle"
        );
        let raw_ids = BundleReader::doc_id_list(&file.path, RecordDelimiter::DocId)?;

        // Resolve, then apply in ascending docid order for a deterministic
        // merge order in the index.
        let mut targets: Vec<(DocId, DocKey)> = Vec::with_capacity(raw_ids.len());
        for raw_id in &raw_ids {
            let key = DocKey::from_name(raw_id.trim());
            match self.id_manager.resolve(key) {
                Some(doc_id) => targets.push((doc_id, key)),
                None => {
                    debug!(
                        target: "vireo::worker",
                        docid = %raw_id,
                        "deleted document does not exist, skipping"
                    );
                }
            }
        }
        targets.sort_by_key(|(doc_id, _)| *doc_id);

        let mut source_counts: HashMap<String, u64> = HashMap::new();
        for (doc_id, key) in targets {
            self.cancel.checkpoint()?;

            if let Some(source_field) = &self.config.product_source_field {
                if let Some(value) = self.doc_store.get_property_value(doc_id, source_field) {
                    *source_counts.entry(value.compare_text()).or_default() += 1;
                }
            }

            match self.delete_doc(doc_id, timestamp) {
                Ok(()) => {
                    if let Some(forwarder) = self.enabled_forwarder() {
                        forwarder.forward_delete(key, &self.config.collection);
                    }
                }
                Err(e) if e.is_per_document() => {
                    warn!(
                        target: "vireo::worker",
                        docid = doc_id,
                        error = %e,
                        "cannot delete document, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.log_source_counts("delete", &source_counts);
        Ok(())
    }

    // ========================================================================
    // Per-document writes
    // ========================================================================

    fn insert_doc(
        &self,
        document: &Document,
        index_document: &IndexDocument,
        timestamp: i64,
    ) -> EngineResult<()> {
        if let Some(hook) = &self.hook {
            if !hook.on_insert(document, index_document, types::to_micros(timestamp)) {
                return Err(EngineError::store("indexing hook vetoed insert"));
            }
        }
        self.doc_store.insert_document(document)?;
        self.index_store.insert_document(index_document)?;
        Ok(())
    }

    fn update_doc(&self, prepared: &Prepared) -> EngineResult<()> {
        if let Some(hook) = &self.hook {
            if !hook.on_update(
                &prepared.document,
                &prepared.index_document,
                types::to_micros(prepared.timestamp),
                prepared.rtype,
            ) {
                return Err(EngineError::store("indexing hook vetoed update"));
            }
        }

        if prepared.rtype {
            // Snapshot the old column values before they are rewritten.
            let old_columns = self.preparer.prepare_partial_document(&prepared.document)?;
            self.doc_store.update_partial_document(&prepared.document)?;
            self.index_store
                .update_rtype_document(&old_columns, &prepared.index_document)?;
        } else {
            if let Some(old_id) = prepared.old_id {
                if !self.doc_store.remove_document(old_id) {
                    debug!(
                        target: "vireo::worker",
                        docid = old_id,
                        "previous document already deleted"
                    );
                }
            }
            self.doc_store.insert_document(&prepared.document)?;
            self.index_store.update_document(&prepared.index_document)?;
        }
        Ok(())
    }

    fn delete_doc(&self, doc_id: DocId, timestamp: i64) -> EngineResult<()> {
        if let Some(hook) = &self.hook {
            if !hook.on_delete(doc_id, types::to_micros(timestamp)) {
                return Err(EngineError::store("indexing hook vetoed delete"));
            }
        }
        if !self.doc_store.remove_document(doc_id) {
            return Err(EngineError::store(format!(
                "document {} not removable",
                doc_id
            )));
        }
        self.index_store.remove_document(doc_id)?;
        self.num_deleted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // ========================================================================
    // Mode selection, recovery, backup
    // ========================================================================

    /// Realtime when the load is small relative to the existing index and
    /// under the hard ceiling; batch otherwise.
    fn select_index_mode(&self, total_mb: u64) -> IndexMode {
        let docs = self.index_store.num_docs().max(1);
        let per_doc = total_mb as f64 / docs as f64;
        if per_doc <= self.config.realtime_threshold() && total_mb <= self.config.max_realtime_mb
        {
            IndexMode::Realtime
        } else {
            IndexMode::Batch
        }
    }

    /// Move bundles that only exist in `backup/` and are missing from the
    /// current directory's bundle log back into the live bundle path, so
    /// the data rotated in from the backup copy catches up.
    fn recover_bundles(&self) -> EngineResult<bool> {
        let current = self.rotator.current();
        let next = self.rotator.next();
        if current.name() == next.name() {
            return Ok(false);
        }

        let absorbed = current.bundle_log()?;
        if absorbed.is_empty() {
            return Ok(false);
        }

        let backup_dir = self.config.index_bundle_dir.join(BUNDLE_BACKUP_DIR);
        if !backup_dir.is_dir() {
            return Ok(false);
        }

        let mut recovered = false;
        for entry in std::fs::read_dir(&backup_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if absorbed.contains(&file_name) {
                continue;
            }
            let target = self.config.index_bundle_dir.join(&file_name);
            match std::fs::rename(entry.path(), &target) {
                Ok(()) => {
                    info!(
                        target: "vireo::worker",
                        file = %file_name,
                        "recovered missed bundle from backup"
                    );
                    recovered = true;
                }
                Err(e) => {
                    warn!(
                        target: "vireo::worker",
                        file = %file_name,
                        error = %e,
                        "failed to recover bundle from backup"
                    );
                }
            }
        }
        Ok(recovered)
    }

    /// Accumulate this pass's bundle size; trigger a backup once the total
    /// exceeds the threshold and the next directory differs from current.
    /// Failed passes never reach this accounting.
    fn require_backup(&self, total_mb: u64) -> bool {
        let accumulated = self.mb_since_backup.fetch_add(total_mb, Ordering::Relaxed) + total_mb;
        let current = self.rotator.current();
        let next = self.rotator.next();
        next.name() != current.name() && accumulated > self.config.backup_threshold_mb
    }

    fn enabled_forwarder(&self) -> Option<&LogForwarder> {
        if self.config.forward_to_log_server {
            self.forwarder.as_deref()
        } else {
            None
        }
    }

    fn log_source_counts(&self, op: &str, counts: &HashMap<String, u64>) {
        for (source, count) in counts {
            info!(
                target: "vireo::worker",
                collection = %self.config.collection,
                op,
                source = %source,
                count,
                "per-source document count"
            );
        }
    }

    // ========================================================================
    // Rebuild coordinator
    // ========================================================================

    /// Re-index every live document of `source` through the insert path
    /// with freshly assigned docids and a synthesized timestamp. Deleted
    /// docids are skipped. Intended for schema changes where the forward
    /// indices must be rebuilt; never runs through the file parser.
    pub fn rebuild_collection(&self, source: &dyn DocumentStore) -> EngineResult<()> {
        info!(
            target: "vireo::worker",
            collection = %self.config.collection,
            "start rebuilding collection"
        );

        let max_id = source.max_doc_id();
        let mut inserted = 0u64;

        for doc_id in 1..=max_id {
            self.cancel.checkpoint()?;
            if source.is_deleted(doc_id) {
                continue;
            }
            let Some(source_doc) = source.get_document(doc_id) else {
                continue;
            };
            let Some(docid_text) = source_doc
                .get(DOCID_PROPERTY)
                .and_then(|v| v.as_text())
                .map(str::to_string)
            else {
                debug!(
                    target: "vireo::worker",
                    docid = doc_id,
                    "source document has no DOCID property, skipping"
                );
                continue;
            };

            let key = DocKey::from_name(docid_text.trim());
            let new_id = match self.preparer.create_insert_doc_id(key) {
                Ok(id) => id,
                Err(e) => {
                    warn!(
                        target: "vireo::worker",
                        docid = %docid_text,
                        error = %e,
                        "cannot assign rebuild docid, skipping"
                    );
                    continue;
                }
            };

            let mut document = source_doc.clone();
            document.set_id(new_id);
            let timestamp = types::now_seconds();

            let index_document =
                match self.preparer.prepare_index_document(None, timestamp, &document) {
                    Ok(index_document) => index_document,
                    Err(e) => {
                        warn!(
                            target: "vireo::worker",
                            docid = %docid_text,
                            error = %e,
                            "cannot prepare rebuild document, skipping"
                        );
                        continue;
                    }
                };

            match self.insert_doc(&document, &index_document, timestamp) {
                Ok(()) => {
                    inserted += 1;
                    if inserted % 10_000 == 0 {
                        info!(target: "vireo::worker", inserted, "rebuild progress");
                    }
                }
                Err(e) if e.is_per_document() => {
                    warn!(
                        target: "vireo::worker",
                        docid = %docid_text,
                        error = %e,
                        "rebuild insert failed, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.doc_store.flush()?;
        self.id_manager.flush()?;
        self.index_store.flush()?;

        if let Some(mining) = &self.mining {
            self.index_store.pause_merge();
            let mined = mining.mine_collection();
            self.index_store.resume_merge();
            mined?;
        }

        info!(
            target: "vireo::worker",
            inserted,
            total = max_id,
            "rebuild finished"
        );
        Ok(())
    }

    // ========================================================================
    // Single-document operations
    // ========================================================================

    /// Insert one document outside a bundle pass (write-through API).
    pub fn create_document(&self, raw: &RawDoc) -> EngineResult<()> {
        let current = self.rotator.current();
        let _guard = DirectoryGuard::acquire(&current)?;

        let timestamp = types::now_seconds();
        let Some(prepared) = self.preparer.prepare(raw, true, timestamp)? else {
            return Ok(());
        };
        self.insert_doc(&prepared.document, &prepared.index_document, prepared.timestamp)?;
        if let Some(forwarder) = self.enabled_forwarder() {
            forwarder.forward_upsert(prepared.key, &self.config.collection, raw);
        }
        Ok(())
    }

    /// Update one document outside a bundle pass.
    pub fn update_document(&self, raw: &RawDoc) -> EngineResult<()> {
        let current = self.rotator.current();
        let _guard = DirectoryGuard::acquire(&current)?;

        let timestamp = types::now_seconds();
        let Some(prepared) = self.preparer.prepare(raw, false, timestamp)? else {
            return Ok(());
        };
        if prepared.old_id.is_none() {
            self.insert_doc(&prepared.document, &prepared.index_document, prepared.timestamp)?;
        } else {
            self.update_doc(&prepared)?;
            self.num_updated.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(forwarder) = self.enabled_forwarder() {
            forwarder.forward_upsert(prepared.key, &self.config.collection, raw);
        }
        Ok(())
    }

    /// Delete one document by its external DOCID.
    pub fn destroy_document(&self, docid: &str) -> EngineResult<()> {
        let current = self.rotator.current();
        let _guard = DirectoryGuard::acquire(&current)?;

        let key = DocKey::from_name(docid.trim());
        let doc_id = self
            .id_manager
            .resolve(key)
            .ok_or_else(|| EngineError::store(format!("no document for DOCID '{}'", docid)))?;
        self.delete_doc(doc_id, types::now_seconds())?;
        if let Some(forwarder) = self.enabled_forwarder() {
            forwarder.forward_delete(key, &self.config.collection);
        }
        Ok(())
    }

    /// Back up the current directory, then optimize the index under a
    /// directory guard.
    pub fn optimize_index(&self) -> EngineResult<()> {
        self.rotator.backup_current()?;
        let current = self.rotator.current();
        let _guard = DirectoryGuard::acquire(&current)?;
        self.index_store.optimize()
    }
}
