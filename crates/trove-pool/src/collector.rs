//! Mark-and-sweep collection over the store's keyspace.
//!
//! Marking starts at the in-memory root, the pid stored under the root key
//! and every dirty or in-flight pid. A materialized object is traced
//! through its in-memory fields: loaded objects by pid, unloaded lazy
//! references by the pid they hold, inline objects by recursion. Its
//! stored record is traced too when it has unsaved changes, so records the
//! store still points at survive until the next flush replaces them.
//! Anything not materialized is traced through its stored record's
//! pointers, so nothing is loaded just to be marked.
//!
//! Records dropped from memory but still referenced by a stored record
//! are kept; flush before collecting to reclaim them in one pass.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use trove_record::Record;
use trove_store::StoreError;
use trove_types::Pid;

use crate::error::{PoolError, PoolResult};
use crate::node::ObjectRef;
use crate::pool::ObjectPool;
use crate::value::Value;

/// Outcome of a collection.
#[derive(Debug, Default)]
pub struct CollectReport {
    /// Pid keys examined (the root key is not counted).
    pub scanned: usize,
    /// Pids found reachable, including any without a stored record.
    pub reachable: usize,
    /// Records deleted, or that would be deleted on a dry run.
    pub deleted: Vec<Pid>,
    /// Unreachable records whose delete failed. They are retried by the
    /// next collection.
    pub failed: Vec<(Pid, StoreError)>,
    pub dry_run: bool,
}

impl ObjectPool {
    /// Delete every stored record not reachable from the root.
    ///
    /// Waits for in-progress flushes and blocks new ones until done. A
    /// failed delete is reported and does not stop the sweep.
    pub async fn collect(&self) -> PoolResult<CollectReport> {
        self.run_collection(false).await
    }

    /// Report what [`collect`](Self::collect) would delete without deleting.
    pub async fn collect_dry_run(&self) -> PoolResult<CollectReport> {
        self.run_collection(true).await
    }

    async fn run_collection(&self, dry_run: bool) -> PoolResult<CollectReport> {
        let _gate = self.shared().gate.write().await;
        let root_key = self.config().root_key.clone();
        let keys = self.store().all_keys().await?;

        self.purge_identity();
        let roots = self.collection_roots(&root_key).await?;
        if roots.is_empty() {
            if keys.is_empty() {
                return Ok(CollectReport {
                    dry_run,
                    ..CollectReport::default()
                });
            }
            return Err(PoolError::MissingRoot { key: root_key });
        }

        let reachable = self.mark(roots).await?;
        let mut report = CollectReport {
            reachable: reachable.len(),
            dry_run,
            ..CollectReport::default()
        };

        for key in keys {
            if key == root_key {
                continue;
            }
            report.scanned += 1;
            let pid = match Pid::parse(&key) {
                Ok(pid) => pid,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping store key that is not a pid");
                    continue;
                }
            };
            if reachable.contains(&pid) {
                continue;
            }
            if dry_run {
                report.deleted.push(pid);
                continue;
            }
            match self.store().delete(&key).await {
                Ok(_) => {
                    // A live object whose record is gone must be rewritten
                    // if it is ever pointed at again.
                    if let Some(node) = self.lookup(&pid) {
                        node.set_stored_digest(None);
                    }
                    debug!(pid = %pid, "deleted unreachable record");
                    report.deleted.push(pid);
                }
                Err(err) => {
                    warn!(pid = %pid, error = %err, "delete failed; retrying next collection");
                    report.failed.push((pid, err));
                }
            }
        }

        info!(
            scanned = report.scanned,
            reachable = report.reachable,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            dry_run,
            "collection complete"
        );
        Ok(report)
    }

    /// The in-memory root pid and the pid stored under the root key. They
    /// differ after `set_root` until the next flush.
    async fn collection_roots(&self, root_key: &str) -> PoolResult<Vec<Pid>> {
        let mut roots: Vec<Pid> = self.root_pid().into_iter().collect();
        if let Some(bytes) = self.store().get(root_key).await? {
            let stored = self.read_root_pointer(&bytes)?;
            if !roots.contains(&stored) {
                roots.push(stored);
            }
        }
        Ok(roots)
    }

    async fn mark(&self, roots: Vec<Pid>) -> PoolResult<HashSet<Pid>> {
        // Objects whose stored record may differ from memory.
        let unsaved: HashSet<Pid> = {
            let shared = self.shared();
            let dirty = shared.dirty.lock().expect("dirty lock poisoned");
            let writing = shared.writing.lock().expect("writing lock poisoned");
            dirty.keys().chain(writing.iter()).cloned().collect()
        };
        let mut pending = roots;
        pending.extend(unsaved.iter().cloned());

        let mut reachable = HashSet::new();
        while let Some(pid) = pending.pop() {
            if !reachable.insert(pid.clone()) {
                continue;
            }
            let is_unsaved = unsaved.contains(&pid);
            if let Some(node) = self.lookup(&pid) {
                trace_node(&node, &mut pending, &mut HashSet::new());
                if !is_unsaved {
                    continue;
                }
            }
            match self.store().get(pid.as_str()).await? {
                Some(bytes) => {
                    let record = Record::from_bytes(&bytes)
                        .map_err(|e| PoolError::record(pid.as_str(), e))?;
                    pending.extend(record.pointers());
                }
                None if is_unsaved => {}
                None => warn!(pid = %pid, "reachable pid has no stored record"),
            }
        }
        Ok(reachable)
    }
}

/// Push every pid referenced by `node`'s persisted fields. Objects without
/// a pid are traced through in place.
fn trace_node(node: &ObjectRef, pending: &mut Vec<Pid>, visited: &mut HashSet<usize>) {
    if !visited.insert(Arc::as_ptr(node) as usize) {
        return;
    }
    let slots = node.snapshot();
    for (index, _) in node.schema().persisted_fields() {
        trace_value(&slots[index], pending, visited);
    }
}

fn trace_value(value: &Value, pending: &mut Vec<Pid>, visited: &mut HashSet<usize>) {
    match value {
        Value::Lazy(proxy) => pending.push(proxy.pid().clone()),
        Value::Object(child) => match child.pid() {
            Some(pid) => pending.push(pid.clone()),
            None => trace_node(child, pending, visited),
        },
        Value::List(items) => {
            for item in items {
                trace_value(item, pending, visited);
            }
        }
        Value::Map(map) => {
            for item in map.values() {
                trace_value(item, pending, visited);
            }
        }
        _ => {}
    }
}
