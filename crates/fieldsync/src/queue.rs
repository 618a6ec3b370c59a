//! Durable FIFO queue of pending operations.
//!
//! The whole queue is persisted as one JSON array under
//! [`PENDING_OPERATIONS_KEY`]. Order is global across record paths, so two
//! writes to the same path replay in the order they were made.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::operation::PendingOperation;
use crate::storage::{self, Storage};

/// Storage key holding the serialized queue.
pub const PENDING_OPERATIONS_KEY: &str = "sync:pending_operations";

/// Persistent queue of operations awaiting remote confirmation.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    storage: Arc<Storage>,
}

impl PendingQueue {
    /// Create a queue view over the shared storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Append `op` to the end of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub fn enqueue(&self, op: PendingOperation) -> Result<()> {
        let (id, kind) = (op.id.clone(), op.kind.to_string());
        let len = self.storage.transaction(|tx| {
            let mut ops = decode(storage::read(tx, PENDING_OPERATIONS_KEY)?.as_deref())?;
            ops.push(op);
            storage::write(tx, PENDING_OPERATIONS_KEY, &serde_json::to_string(&ops)?)?;
            Ok(ops.len())
        })?;
        debug!(op_id = %id, op = %kind, queued = len, "operation enqueued");
        Ok(())
    }

    /// Take every queued operation in FIFO order, leaving the queue empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or cleared. The queue is
    /// left untouched in that case.
    pub fn snapshot_and_clear(&self) -> Result<Vec<PendingOperation>> {
        self.storage.transaction(|tx| {
            let ops = decode(storage::read(tx, PENDING_OPERATIONS_KEY)?.as_deref())?;
            storage::write(tx, PENDING_OPERATIONS_KEY, "[]")?;
            Ok(ops)
        })
    }

    /// Put operations that could not be applied back into the queue.
    ///
    /// `remaining` came from an earlier [`snapshot_and_clear`](Self::snapshot_and_clear),
    /// so it is older than anything enqueued since; it goes in front of those
    /// operations rather than replacing them.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub fn persist(&self, remaining: Vec<PendingOperation>) -> Result<()> {
        let returned = remaining.len();
        let total = self.storage.transaction(|tx| {
            let newer = decode(storage::read(tx, PENDING_OPERATIONS_KEY)?.as_deref())?;
            let mut ops = remaining;
            ops.extend(newer);
            storage::write(tx, PENDING_OPERATIONS_KEY, &serde_json::to_string(&ops)?)?;
            Ok(ops.len())
        })?;
        debug!(returned, total, "pending queue persisted");
        Ok(())
    }

    /// Read the queue without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn list(&self) -> Result<Vec<PendingOperation>> {
        decode(self.storage.get(PENDING_OPERATIONS_KEY)?.as_deref())
    }

    /// Number of queued operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Check whether the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn decode(raw: Option<&str>) -> Result<Vec<PendingOperation>> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            warn!(error = %e, "pending queue is not readable");
            e.into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RecordPath;
    use serde_json::json;

    fn create_test_queue() -> (PendingQueue, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        (PendingQueue::new(Arc::clone(&storage)), storage)
    }

    fn write_op(path: &str, payload: serde_json::Value) -> PendingOperation {
        PendingOperation::write(RecordPath::parse(path).unwrap(), payload)
    }

    #[test]
    fn test_empty_queue() {
        let (queue, _) = create_test_queue();
        assert!(queue.is_empty().unwrap());
        assert!(queue.snapshot_and_clear().unwrap().is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let (queue, _) = create_test_queue();
        let a = write_op("a", json!(1));
        let b = write_op("b", json!(2));
        let c = write_op("a", json!(3));
        queue.enqueue(a.clone()).unwrap();
        queue.enqueue(b.clone()).unwrap();
        queue.enqueue(c.clone()).unwrap();

        assert_eq!(queue.len().unwrap(), 3);
        assert_eq!(queue.snapshot_and_clear().unwrap(), vec![a, b, c]);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_persist_restores_remaining() {
        let (queue, _) = create_test_queue();
        let a = write_op("a", json!(1));
        let b = write_op("b", json!(2));
        queue.enqueue(a.clone()).unwrap();
        queue.enqueue(b).unwrap();

        let _ = queue.snapshot_and_clear().unwrap();
        queue.persist(vec![a.clone()]).unwrap();

        assert_eq!(queue.list().unwrap(), vec![a]);
    }

    #[test]
    fn test_persist_keeps_operations_enqueued_meanwhile() {
        let (queue, _) = create_test_queue();
        let old = write_op("a", json!("old"));
        queue.enqueue(old.clone()).unwrap();

        let snapshot = queue.snapshot_and_clear().unwrap();
        let newer = write_op("a", json!("new"));
        queue.enqueue(newer.clone()).unwrap();
        queue.persist(snapshot).unwrap();

        assert_eq!(queue.list().unwrap(), vec![old, newer]);
    }

    #[test]
    fn test_persists_as_single_json_array() {
        let (queue, storage) = create_test_queue();
        queue.enqueue(write_op("a", json!(1))).unwrap();

        let raw = storage.get(PENDING_OPERATIONS_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["kind"], "write");
    }

    #[test]
    fn test_unreadable_queue_is_an_error_and_untouched() {
        let (queue, storage) = create_test_queue();
        storage.put(PENDING_OPERATIONS_KEY, "garbage").unwrap();

        assert!(queue.snapshot_and_clear().is_err());
        assert_eq!(
            storage.get(PENDING_OPERATIONS_KEY).unwrap().as_deref(),
            Some("garbage")
        );
    }
}
