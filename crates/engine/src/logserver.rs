//! Fire-and-forget mutation mirror
//!
//! When enabled, every insert/update/delete flowing through the index
//! worker is mirrored to an external log store. Submissions never block
//! and never fail the originating mutation: records are queued and drained
//! by a dedicated sender thread; sink errors are logged and dropped.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;
use vireo_core::{DocKey, EngineResult, RawDoc};

/// One mirrored mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A document was inserted or updated; carries the reassembled bundle
    /// text keyed by the DOCID hash.
    Upsert {
        /// Content hash of the external DOCID.
        key: DocKey,
        /// Collection the mutation belongs to.
        collection: String,
        /// Reassembled `<PROP>value` bundle text, DOCID line first.
        content: String,
    },
    /// A document was deleted.
    Delete {
        /// Content hash of the external DOCID.
        key: DocKey,
        /// Collection the mutation belongs to.
        collection: String,
    },
}

/// Transport behind the forwarder (network client, test recorder, ...).
pub trait LogSink: Send + Sync {
    /// Deliver one record. Errors are logged and dropped by the forwarder.
    fn submit(&self, record: LogRecord) -> EngineResult<()>;
}

struct ForwarderInner {
    queue: Mutex<VecDeque<LogRecord>>,
    ready: Condvar,
    shutdown: AtomicBool,
}

/// Asynchronous mirror of index mutations to a [`LogSink`].
pub struct LogForwarder {
    inner: Arc<ForwarderInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogForwarder {
    /// Start the forwarder with its sender thread.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        let inner = Arc::new(ForwarderInner {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("vireo-logfwd".to_string())
            .spawn(move || sender_loop(&inner_clone, sink))
            .expect("failed to spawn log forwarder thread");

        LogForwarder {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue an upsert mirror. Never blocks, never fails.
    pub fn forward_upsert(&self, key: DocKey, collection: &str, raw: &RawDoc) {
        self.enqueue(LogRecord::Upsert {
            key,
            collection: collection.to_string(),
            content: reassemble_bundle_text(raw),
        });
    }

    /// Queue a delete mirror. Never blocks, never fails.
    pub fn forward_delete(&self, key: DocKey, collection: &str) {
        self.enqueue(LogRecord::Delete {
            key,
            collection: collection.to_string(),
        });
    }

    fn enqueue(&self, record: LogRecord) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        self.inner.queue.lock().push_back(record);
        self.inner.ready.notify_one();
    }

    /// Drain pending records, then stop and join the sender thread.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.ready.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sender_loop(inner: &ForwarderInner, sink: Arc<dyn LogSink>) {
    loop {
        let record = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(record) = queue.pop_front() {
                    break record;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.ready.wait(&mut queue);
            }
        };

        if let Err(e) = sink.submit(record) {
            warn!(
                target: "vireo::logserver",
                error = %e,
                "log server submission failed, record dropped"
            );
        }
    }
}

/// Reassemble a raw record into bundle text with the DOCID line first.
fn reassemble_bundle_text(raw: &RawDoc) -> String {
    let mut docid_line = String::new();
    let mut rest = String::new();
    for (name, value) in raw {
        let line = format!("<{}>{}\n", name, value);
        if name.eq_ignore_ascii_case("DOCID") {
            docid_line = line;
        } else {
            rest.push_str(&line);
        }
    }
    docid_line.push_str(&rest);
    docid_line
}
