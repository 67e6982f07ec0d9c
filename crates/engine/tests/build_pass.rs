//! Build-pass scenario tests
//!
//! Drives the index worker end to end over real bundle files in a temp
//! directory, against the in-memory reference stores.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use vireo_core::traits::{DocumentStore, IdManager, IndexStore, LanguageAnalyzer};
use vireo_core::types::{self, DocKey};
use vireo_core::{
    CollectionConfig, CollectionSchema, EngineError, IndexPayload, PropertyKind, PropertySchema,
    PropertyValue,
};
use vireo_engine::memstore::{
    MemDocumentStore, MemIdManager, MemIndexStore, RecordingHook, WhitespaceAnalyzer,
};
use vireo_engine::scheduler::JobScheduler;
use vireo_engine::worker::IndexWorker;
use vireo_engine::DirectoryRotator;

struct Env {
    _tmp: TempDir,
    config: Arc<CollectionConfig>,
    rotator: Arc<DirectoryRotator>,
    id_manager: Arc<MemIdManager>,
    doc_store: Arc<MemDocumentStore>,
    index_store: Arc<MemIndexStore>,
    analyzer: Arc<WhitespaceAnalyzer>,
    hook: Arc<RecordingHook>,
    worker: Arc<IndexWorker>,
    seq: std::cell::Cell<u32>,
}

fn schema() -> Arc<CollectionSchema> {
    Arc::new(
        CollectionSchema::new(vec![
            PropertySchema::filter(1, "DOCID", PropertyKind::String),
            PropertySchema::filter(2, "DATE", PropertyKind::Date),
            PropertySchema::analyzed(3, "Title", "la_standard"),
            PropertySchema::filter(4, "Price", PropertyKind::Int),
        ])
        .unwrap(),
    )
}

fn env_with(config_fn: impl FnOnce(&mut CollectionConfig)) -> Env {
    let tmp = TempDir::new().unwrap();
    let mut config = CollectionConfig::for_collection("c", tmp.path());
    config_fn(&mut config);
    fs::create_dir_all(&config.index_bundle_dir).unwrap();
    let config = Arc::new(config);

    let rotator = Arc::new(DirectoryRotator::open(tmp.path().join("data")).unwrap());
    let id_manager = Arc::new(MemIdManager::new());
    let doc_store = Arc::new(MemDocumentStore::new());
    let index_store = Arc::new(MemIndexStore::new());
    let analyzer = Arc::new(WhitespaceAnalyzer::new());
    let hook = Arc::new(RecordingHook::new());

    let worker = IndexWorker::new(
        Arc::clone(&config),
        schema(),
        Arc::clone(&rotator),
        Arc::clone(&id_manager) as Arc<dyn vireo_core::traits::IdManager>,
        Arc::clone(&doc_store) as Arc<dyn DocumentStore>,
        Arc::clone(&index_store) as Arc<dyn IndexStore>,
        Arc::clone(&analyzer) as Arc<dyn LanguageAnalyzer>,
    )
    .with_hook(Arc::clone(&hook) as Arc<dyn vireo_core::traits::IndexingHook>);

    Env {
        _tmp: tmp,
        config,
        rotator,
        id_manager,
        doc_store,
        index_store,
        analyzer,
        hook,
        worker: Arc::new(worker),
        seq: std::cell::Cell::new(0),
    }
}

fn env() -> Env {
    env_with(|_| {})
}

impl Env {
    /// Write a bundle file with the next sequence number; files written
    /// later sort later.
    fn write_bundle(&self, type_tag: char, body: &str) -> PathBuf {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let name = format!("B-{:02}-202608020900-00000-{}-c.SCD", seq, type_tag);
        let path = self.config.index_bundle_dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn docid(&self, external: &str) -> u32 {
        self.id_manager
            .resolve(DocKey::from_name(external))
            .unwrap_or_else(|| panic!("no docid for {}", external))
    }
}

#[test]
fn insert_then_rtype_update_rewrites_only_the_price_column() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>blue shoes\n<Price>10\n");
    env.worker.build_collection(None).unwrap();

    let doc_id = env.docid("A");
    let analyzer_calls = env.analyzer.call_count();

    env.write_bundle('U', "<DOCID>A\n<Price>12\n");
    env.worker.build_collection(None).unwrap();

    // Same docid, price column rewritten, title never re-tokenized.
    assert_eq!(env.docid("A"), doc_id);
    assert_eq!(env.index_store.rtype_update_count(), 1);
    assert_eq!(env.analyzer.call_count(), analyzer_calls);

    let indexed = env.index_store.document(doc_id).unwrap();
    assert_eq!(
        indexed.field("Price").unwrap().payload,
        IndexPayload::Value(PropertyValue::Int(12))
    );
    // The title forward index is untouched.
    assert!(matches!(
        indexed.field("Title").unwrap().payload,
        IndexPayload::Forward(_)
    ));
    assert_eq!(
        env.doc_store
            .get_property_value(doc_id, "Price")
            .unwrap()
            .as_text(),
        Some("12")
    );
}

#[test]
fn insert_then_full_update_reissues_the_docid() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>blue shoes\n<Price>10\n");
    env.worker.build_collection(None).unwrap();
    let old_id = env.docid("A");

    env.write_bundle('U', "<DOCID>A\n<Title>red shoes\n");
    env.worker.build_collection(None).unwrap();

    let new_id = env.docid("A");
    assert!(new_id > old_id);
    assert!(env.doc_store.is_deleted(old_id));
    // Partial completion carried the price over; title was re-tokenized.
    assert_eq!(
        env.doc_store
            .get_property_value(new_id, "Price")
            .unwrap()
            .as_text(),
        Some("10")
    );
    assert!(matches!(
        env.index_store.document(new_id).unwrap().field("Title").unwrap().payload,
        IndexPayload::Forward(_)
    ));
}

#[test]
fn deleting_a_nonexistent_docid_is_a_successful_noop() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>x\n");
    env.worker.build_collection(None).unwrap();

    env.write_bundle('D', "<DOCID>Z\n");
    env.worker.build_collection(None).unwrap();

    assert!(env.index_store.removal_order().is_empty());
    assert_eq!(env.worker.deleted_count(), 0);
}

#[test]
fn deletes_apply_in_ascending_docid_order_not_list_order() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>a\n<DOCID>B\n<Title>b\n<DOCID>C\n<Title>c\n");
    env.worker.build_collection(None).unwrap();

    let (a, b, c) = (env.docid("A"), env.docid("B"), env.docid("C"));

    // Listed out of order on purpose.
    env.write_bundle('D', "<DOCID>C\n<DOCID>A\n<DOCID>B\n");
    env.worker.build_collection(None).unwrap();

    let mut expected = vec![a, b, c];
    expected.sort();
    assert_eq!(env.index_store.removal_order(), expected);
}

#[test]
fn inserted_documents_round_trip_through_the_stores() {
    let env = env();
    env.write_bundle(
        'I',
        "<DOCID>A\n<DATE>20091009163011\n<Title>blue shoes\n<Price>10\n",
    );
    env.worker.build_collection(None).unwrap();

    let doc_id = env.docid("A");
    let doc = env.doc_store.get_document(doc_id).unwrap();
    assert_eq!(doc.get("DOCID").unwrap().as_text(), Some("A"));
    assert_eq!(doc.get("Title").unwrap().as_text(), Some("blue shoes"));
    assert_eq!(doc.get("Price").unwrap().as_text(), Some("10"));
    // Date canonicalized to the compact form
    assert_eq!(doc.get("DATE").unwrap().as_text(), Some("20091009163011"));
}

#[test]
fn hook_receives_microsecond_timestamps() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<DATE>20091009163011\n<Title>x\n");
    env.worker.build_collection(None).unwrap();

    let expected_us = types::parse_compact_date("20091009163011").unwrap() * 1_000_000;
    assert_eq!(env.hook.insert_timestamps.lock().as_slice(), &[expected_us]);
    assert_eq!(env.hook.finish_count(), 1);
}

#[test]
fn processed_bundles_move_to_backup_and_into_the_bundle_log() {
    let env = env();
    let path = env.write_bundle('I', "<DOCID>A\n<Title>x\n");
    env.worker.build_collection(None).unwrap();

    assert!(!path.exists());
    let backed_up = env
        .config
        .index_bundle_dir
        .join("backup")
        .join(path.file_name().unwrap());
    assert!(backed_up.exists());

    let log = env.rotator.current().bundle_log().unwrap();
    assert!(log.contains(path.file_name().unwrap().to_str().unwrap()));
}

#[test]
fn backup_triggers_once_accumulated_bundles_exceed_the_threshold() {
    let env = env_with(|cfg| cfg.backup_threshold_mb = 1);

    // ~1.5 MiB pass
    let pad = "pad ".repeat(400_000);
    env.write_bundle('I', &format!("<DOCID>A\n<Title>x\n{}\n", pad));
    env.worker.build_collection(None).unwrap();
    // 1 MiB accumulated: not over the threshold yet.
    assert_eq!(env.worker.mb_since_backup(), 1);
    assert!(!env.rotator.next().valid());

    // ~1.2 MiB pass pushes the total over the threshold.
    let pad = "pad ".repeat(320_000);
    env.write_bundle('I', &format!("<DOCID>B\n<Title>y\n{}\n", pad));
    env.worker.build_collection(None).unwrap();

    assert!(env.rotator.next().valid());
    assert_eq!(
        env.rotator.next().parent_name().as_deref(),
        Some(env.rotator.current().name())
    );
    // Counter reset after the successful backup.
    assert_eq!(env.worker.mb_since_backup(), 0);
}

#[test]
fn missed_bundles_are_recovered_after_rotation() {
    let env = env();

    // First pass absorbed by data0, then backed up into data1.
    let f1 = env.write_bundle('I', "<DOCID>A\n<Title>x\n");
    env.worker.build_collection(None).unwrap();
    env.rotator.backup_current().unwrap();

    // Second pass absorbed by data0 only; data1 never saw it.
    let f2 = env.write_bundle('I', "<DOCID>B\n<Title>y\n");
    env.worker.build_collection(None).unwrap();

    // Rotate: the stale copy becomes current.
    env.rotator.rotate().unwrap();
    let current = env.rotator.current();
    assert_eq!(current.name(), "data1");
    let log = current.bundle_log().unwrap();
    assert!(log.contains(f1.file_name().unwrap().to_str().unwrap()));
    assert!(!log.contains(f2.file_name().unwrap().to_str().unwrap()));

    // The next pass replays the missed bundle out of backup/.
    env.worker.build_collection(None).unwrap();
    let log = env.rotator.current().bundle_log().unwrap();
    assert!(log.contains(f2.file_name().unwrap().to_str().unwrap()));
    // And the bundle directory holds no regular bundle files afterwards.
    assert!(env
        .config
        .index_bundle_dir
        .read_dir()
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| e.file_name() == "backup"));
}

#[test]
fn dirty_directory_aborts_the_pass() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>x\n");

    // Poison the current directory through a panicking guard holder.
    let current = env.rotator.current();
    let dir = Arc::clone(&current);
    let _ = std::thread::spawn(move || {
        let _guard = vireo_engine::DirectoryGuard::acquire(&dir).unwrap();
        panic!("boom");
    })
    .join();

    let err = env.worker.build_collection(None).unwrap_err();
    assert!(matches!(err, EngineError::DirectoryDirty { .. }));
    assert_eq!(env.index_store.num_docs(), 0);
}

#[test]
fn cancellation_exits_with_a_partial_commit() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>x\n");
    env.worker.cancellation().cancel();

    let err = env.worker.build_collection(None).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    // The committed-so-far state was made durable.
    assert!(env.index_store.commit_count() >= 1);
    // The unprocessed bundle stays behind for the next pass.
    assert_eq!(
        env.config
            .index_bundle_dir
            .read_dir()
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .count(),
        1
    );
}

#[test]
fn bad_record_is_skipped_without_aborting_the_pass() {
    let env = env();
    // Second record has an unparseable DATE; third is fine.
    env.write_bundle(
        'I',
        "<DOCID>A\n<Title>x\n<DOCID>B\n<DATE>garbage\n<DOCID>C\n<Title>z\n",
    );
    env.worker.build_collection(None).unwrap();

    // A and C made it into the stores; B was dropped at preparation.
    assert_eq!(env.index_store.num_docs(), 2);
    assert!(env.doc_store.get_document(env.docid("A")).is_some());
    assert!(env.doc_store.get_document(env.docid("C")).is_some());
    if let Some(b) = env.id_manager.resolve(DocKey::from_name("B")) {
        assert!(env.doc_store.get_document(b).is_none());
    }
}

#[test]
fn rebuild_reissues_every_live_docid() {
    let source_env = env();
    source_env.write_bundle(
        'I',
        "<DOCID>A\n<Title>a\n<DOCID>B\n<Title>b\n<DOCID>C\n<Title>c\n",
    );
    source_env.worker.build_collection(None).unwrap();
    source_env.write_bundle('D', "<DOCID>B\n");
    source_env.worker.build_collection(None).unwrap();

    // Rebuild into a fresh target engine.
    let target = env();
    target
        .worker
        .rebuild_collection(source_env.doc_store.as_ref())
        .unwrap();

    assert!(target.id_manager.resolve(DocKey::from_name("A")).is_some());
    // Deleted docids are skipped.
    assert!(target.id_manager.resolve(DocKey::from_name("B")).is_none());
    assert!(target.id_manager.resolve(DocKey::from_name("C")).is_some());
    assert_eq!(target.index_store.num_docs(), 2);
}

#[test]
fn build_runs_on_the_job_scheduler() {
    let env = env();
    env.write_bundle('I', "<DOCID>A\n<Title>x\n");

    let scheduler = JobScheduler::new();
    let worker = Arc::clone(&env.worker);
    scheduler.add("c", move || {
        let _ = worker.build_collection(None);
    });
    scheduler.drain();
    scheduler.shutdown();

    assert_eq!(env.index_store.num_docs(), 1);
}

#[test]
fn single_document_api_writes_through() {
    let env = env();
    let raw: vireo_core::RawDoc = vec![
        ("DOCID".to_string(), "A".to_string()),
        ("Title".to_string(), "blue shoes".to_string()),
        ("Price".to_string(), "10".to_string()),
    ];
    env.worker.create_document(&raw).unwrap();
    let doc_id = env.docid("A");
    assert_eq!(env.index_store.num_docs(), 1);

    let update: vireo_core::RawDoc = vec![
        ("DOCID".to_string(), "A".to_string()),
        ("Price".to_string(), "15".to_string()),
    ];
    env.worker.update_document(&update).unwrap();
    assert_eq!(env.docid("A"), doc_id);
    assert_eq!(env.index_store.rtype_update_count(), 1);

    env.worker.destroy_document("A").unwrap();
    assert!(env.doc_store.is_deleted(doc_id));
    assert!(env.worker.destroy_document("A").is_err());
}

#[test]
fn finish_hook_veto_fails_the_pass() {
    let env = env();
    env.hook
        .veto_finish
        .store(true, std::sync::atomic::Ordering::Relaxed);
    env.write_bundle('I', "<DOCID>A\n<Title>x\n");
    let err = env.worker.build_collection(None).unwrap_err();
    assert!(matches!(err, EngineError::StoreError { .. }));
}
