//! Durable work queue with derived status counts.
//!
//! Every mutation is a full read-modify-write of the aggregate: the current
//! [`Queue`] is cloned, the clone is mutated, counts are recomputed, the
//! result is persisted, and only then is it swapped in. A persistence failure
//! therefore leaves the in-memory queue exactly as it was, and no reader ever
//! observes items and counts that disagree.
//!
//! The store is safe to share between the orchestrator and callers that keep
//! enqueuing while a batch runs.

use crate::error::{Capture2PdfError, FailureClass};
use crate::model::{
    CapturedDocument, ItemFailure, ItemResult, ItemStatus, Queue, QueueItem, ResultPatch,
};
use crate::storage::{KeyValueStore, QUEUE_KEY};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The queue, persisted through a [`KeyValueStore`].
pub struct QueueStore {
    queue: Mutex<Queue>,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("queue", &*self.queue.lock())
            .finish_non_exhaustive()
    }
}

impl QueueStore {
    /// Load the persisted queue from `store`, or start an empty one.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Result<Self, Capture2PdfError> {
        let mut queue = match store.get(QUEUE_KEY)? {
            Some(value) => {
                serde_json::from_value::<Queue>(value).map_err(|e| Capture2PdfError::Storage {
                    key: QUEUE_KEY.to_string(),
                    detail: format!("invalid queue record: {e}"),
                })?
            }
            None => Queue::default(),
        };

        // A run that died mid-item leaves it `processing`; nothing can be
        // running yet, so hand it back to the next run.
        let mut recovered = 0;
        for item in queue.items.iter_mut().filter(|i| i.status == ItemStatus::Processing) {
            item.status = ItemStatus::Pending;
            item.started_at = None;
            recovered += 1;
        }
        queue.recount();
        if recovered > 0 {
            warn!("Returned {} interrupted item(s) to pending", recovered);
            let value = serde_json::to_value(&queue).map_err(|e| Capture2PdfError::Storage {
                key: QUEUE_KEY.to_string(),
                detail: e.to_string(),
            })?;
            store.replace(QUEUE_KEY, value)?;
        }
        debug!("Opened queue with {} items", queue.total);

        Ok(Self {
            queue: Mutex::new(queue),
            store,
        })
    }

    /// Add `doc` as a pending item, or return the existing item for the same
    /// source document unchanged.
    pub fn enqueue(&self, doc: CapturedDocument) -> Result<QueueItem, Capture2PdfError> {
        let mut created = None;
        self.mutate(|q| {
            if let Some(existing) = q.items.iter().find(|i| i.source_id == doc.id) {
                created = Some(existing.clone());
                return false;
            }
            let item = new_item(doc, ItemStatus::Pending);
            q.items.push(item.clone());
            created = Some(item);
            true
        })?;

        let item = created.ok_or_else(|| Capture2PdfError::Internal("enqueue produced no item".into()))?;
        info!("Enqueued '{}' as {}", item.document.title, item.id);
        Ok(item)
    }

    /// Record a document whose extraction failed upstream, so it shows up as
    /// a failed item instead of disappearing. Idempotent on `source_id`.
    pub fn enqueue_unavailable(
        &self,
        source_id: &str,
        source_url: &str,
        reason: &str,
    ) -> Result<QueueItem, Capture2PdfError> {
        let doc = CapturedDocument {
            id: source_id.to_string(),
            source_url: source_url.to_string(),
            title: String::new(),
            body: String::new(),
            author: String::new(),
            images: Vec::new(),
            captured_at: Utc::now(),
        };
        let mut recorded = None;
        self.mutate(|q| {
            if let Some(existing) = q.items.iter().find(|i| i.source_id == source_id) {
                recorded = Some(existing.clone());
                return false;
            }
            let mut item = new_item(doc, ItemStatus::Failed);
            item.error = Some(reason.to_string());
            item.error_class = Some(FailureClass::SourceUnavailable);
            q.items.push(item.clone());
            recorded = Some(item);
            true
        })?;
        recorded.ok_or_else(|| Capture2PdfError::Internal("enqueue produced no item".into()))
    }

    /// Remove an item. Absent ids are ignored.
    pub fn remove(&self, item_id: &str) -> Result<(), Capture2PdfError> {
        self.mutate(|q| {
            let before = q.items.len();
            q.items.retain(|i| i.id != item_id);
            q.items.len() != before
        })
    }

    /// Update an item's status, merging `patch` into its result and setting
    /// `error` when given.
    ///
    /// `started_at` is stamped the first time the item enters
    /// [`ItemStatus::Processing`]; `completed_at` is stamped whenever a patch
    /// is supplied. Missing items are ignored: they may have been removed
    /// while the orchestrator was working on them.
    pub fn set_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        patch: Option<ResultPatch>,
        error: Option<ItemFailure>,
    ) -> Result<(), Capture2PdfError> {
        self.mutate(|q| {
            let Some(item) = q.find_mut(item_id) else {
                debug!("set_status: item {} no longer exists", item_id);
                return false;
            };
            item.status = status;
            if status == ItemStatus::Processing && item.started_at.is_none() {
                item.started_at = Some(Utc::now());
            }
            if let Some(patch) = patch {
                let result = item.result.get_or_insert_with(ItemResult::default);
                result.merge(patch);
                result.completed_at = Some(Utc::now());
            }
            if let Some(failure) = error {
                item.error = Some(failure.message);
                item.error_class = Some(failure.class);
            }
            true
        })
    }

    /// Empty the queue.
    pub fn clear_all(&self) -> Result<(), Capture2PdfError> {
        self.mutate(|q| {
            q.items.clear();
            true
        })
    }

    /// Drop completed items only.
    pub fn clear_completed(&self) -> Result<(), Capture2PdfError> {
        self.mutate(|q| {
            let before = q.items.len();
            q.items.retain(|i| i.status != ItemStatus::Completed);
            q.items.len() != before
        })
    }

    /// Reset every failed item to pending. Returns how many were reset.
    pub fn retry_failed(&self) -> Result<usize, Capture2PdfError> {
        let mut reset = 0;
        self.mutate(|q| {
            for item in q.items.iter_mut().filter(|i| i.status == ItemStatus::Failed) {
                item.status = ItemStatus::Pending;
                item.error = None;
                item.error_class = None;
                item.retry_count += 1;
                reset += 1;
            }
            reset > 0
        })?;
        if reset > 0 {
            info!("Reset {} failed items to pending", reset);
        }
        Ok(reset)
    }

    /// Pending items in FIFO (`added_at`) order.
    pub fn pending(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .queue
            .lock()
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Pending)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.added_at);
        items
    }

    /// Whether an item already references `source_id`.
    pub fn contains(&self, source_id: &str) -> bool {
        self.queue
            .lock()
            .items
            .iter()
            .any(|i| i.source_id == source_id)
    }

    /// Look up a single item.
    pub fn get(&self, item_id: &str) -> Option<QueueItem> {
        self.queue
            .lock()
            .items
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
    }

    /// A consistent copy of the whole aggregate.
    pub fn snapshot(&self) -> Queue {
        self.queue.lock().clone()
    }

    /// Read-modify-write under the lock. `f` returns whether it changed
    /// anything; unchanged queues are not re-persisted.
    fn mutate<F>(&self, f: F) -> Result<(), Capture2PdfError>
    where
        F: FnOnce(&mut Queue) -> bool,
    {
        let mut guard = self.queue.lock();
        let mut next = guard.clone();
        if !f(&mut next) {
            return Ok(());
        }
        next.recount();

        let value = serde_json::to_value(&next).map_err(|e| Capture2PdfError::Storage {
            key: QUEUE_KEY.to_string(),
            detail: e.to_string(),
        })?;
        self.store.replace(QUEUE_KEY, value)?;

        *guard = next;
        Ok(())
    }
}

fn new_item(doc: CapturedDocument, status: ItemStatus) -> QueueItem {
    QueueItem {
        id: Uuid::new_v4().to_string(),
        source_id: doc.id.clone(),
        document: doc,
        status,
        added_at: Utc::now(),
        started_at: None,
        result: None,
        error: None,
        error_class: None,
        retry_count: 0,
    }
}
