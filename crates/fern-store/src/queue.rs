//! Outbound queue over a record store

use parking_lot::Mutex;

use fern_core::{MeshError, MeshResult, Sample};

use crate::{RecordStore, StoredRecord};

/// Cursor over the backing log.
///
/// `commit` is the index of the oldest unconfirmed record; `pending` runs
/// one past it while a peeked sample is in flight. Invariant:
/// `commit <= pending <= log length`. `commit` advances only after a
/// confirming ACK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct QueueCursor {
    commit: usize,
    pending: usize,
}

struct QueueInner<S> {
    store: S,
    cursor: QueueCursor,
}

/// Durable FIFO of samples awaiting confirmed delivery.
///
/// Single reader: the push task. `peek` is idempotent until `advance`, so
/// a crash between the two redelivers the same sample (at-least-once).
pub struct OutboundQueue<S: RecordStore> {
    inner: Mutex<QueueInner<S>>,
}

impl<S: RecordStore> OutboundQueue<S> {
    /// Open the queue, recovering the cursor from the confirmed markers.
    pub fn open(mut store: S) -> MeshResult<Self> {
        let mut commit = store.len();
        for index in 0..store.len() {
            if !store.read(index)?.confirmed {
                commit = index;
                break;
            }
        }
        Ok(OutboundQueue {
            inner: Mutex::new(QueueInner {
                store,
                cursor: QueueCursor {
                    commit,
                    pending: commit,
                },
            }),
        })
    }

    /// Append a sample. Fails only on a storage fault; never blocks on
    /// delivery state.
    pub fn push(&self, sample: Sample) -> MeshResult<()> {
        let mut inner = self.inner.lock();
        inner.store.append(StoredRecord::unconfirmed(sample))
    }

    /// The oldest unconfirmed sample, without removing it. Repeated calls
    /// return the same sample until `advance`. A storage fault degrades to
    /// an empty queue with a log line.
    pub fn peek(&self) -> Option<Sample> {
        let mut inner = self.inner.lock();
        let commit = inner.cursor.commit;
        if commit >= inner.store.len() {
            return None;
        }
        match inner.store.read(commit) {
            Ok(record) => {
                inner.cursor.pending = commit + 1;
                Some(record.sample)
            }
            Err(err) => {
                tracing::warn!(%err, index = commit, "queue read failed");
                None
            }
        }
    }

    /// Confirm the previously peeked sample. Call only after a matching
    /// ACK (or a successful gateway upload).
    pub fn advance(&self) -> MeshResult<()> {
        let mut inner = self.inner.lock();
        let QueueCursor { commit, pending } = inner.cursor;
        if pending != commit + 1 {
            return Err(MeshError::CursorOutOfBounds);
        }
        inner.store.mark_confirmed(commit)?;
        inner.cursor.commit = commit + 1;
        Ok(())
    }

    /// Rewrite the log keeping only unconfirmed records. Crash-safe via the
    /// store's rewrite-then-replace contract: no confirmed record is
    /// retained and no unconfirmed record is lost at any interruption
    /// point.
    pub fn compact(&self) -> MeshResult<()> {
        let mut inner = self.inner.lock();
        let commit = inner.cursor.commit;
        let mut retained = Vec::with_capacity(inner.store.len() - commit);
        for index in commit..inner.store.len() {
            retained.push(inner.store.read(index)?);
        }
        inner.store.replace_all(&retained)?;
        // Confirmed prefix is gone; a peeked-but-unconfirmed sample keeps
        // its cursor position relative to the new log head.
        inner.cursor = QueueCursor {
            commit: 0,
            pending: inner.cursor.pending - commit,
        };
        Ok(())
    }

    /// Unconfirmed records currently queued.
    pub fn backlog(&self) -> usize {
        let inner = self.inner.lock();
        inner.store.len() - inner.cursor.commit
    }
}
