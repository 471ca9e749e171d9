//! Prioritized, deduplicated queue of pending chunk loads.
//!
//! Tasks pop highest [`LoadPriority`] first, nearest first within a priority.
//! Each position appears at most once; re-requesting a queued position can only
//! raise its priority. Removal is lazy: the heap may hold stale entries, which
//! are recognized by their sequence number and skipped on pop.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use rustc_hash::FxHashMap;

use crate::coords::ChunkPos;

/// Urgency of a chunk load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadPriority {
    Low,
    Normal,
    High,
    /// A writer is blocked on this chunk.
    Urgent,
}

/// A load that has been dequeued (or claimed) and must now be populated.
///
/// Dropping the task drops its completion sender, which releases every
/// [`LoadTicket`] waiting on it.
#[derive(Debug)]
pub(crate) struct LoadTask {
    pub pos: ChunkPos,
    pub priority: LoadPriority,
    // Held only to be dropped: that disconnects every ticket's receiver.
    #[allow(dead_code)]
    pub done_tx: Sender<()>,
    pub done_rx: Receiver<()>,
}

impl LoadTask {
    pub(crate) fn new(pos: ChunkPos, priority: LoadPriority) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        Self {
            pos,
            priority,
            done_tx,
            done_rx,
        }
    }

    pub(crate) fn ticket(&self) -> LoadTicket {
        LoadTicket {
            done: self.done_rx.clone(),
        }
    }
}

/// Handle for waiting on a requested chunk load.
///
/// Completion is signalled by the loader dropping its end of the channel, so a
/// ticket also resolves when the load is cancelled.
#[derive(Clone, Debug)]
pub struct LoadTicket {
    done: Receiver<()>,
}

impl LoadTicket {
    /// A ticket for a chunk that is already resident.
    pub(crate) fn ready() -> Self {
        let (_, done) = crossbeam_channel::bounded(0);
        Self { done }
    }

    pub(crate) fn from_receiver(done: Receiver<()>) -> Self {
        Self { done }
    }

    /// Blocks until the load has finished.
    pub fn wait(&self) {
        // Nothing is ever sent; `recv` returns once the sender is gone.
        let _ = self.done.recv();
    }

    /// Blocks for at most `timeout`. Returns `true` if the load finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    pub fn is_done(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    priority: LoadPriority,
    task: LoadTask,
}

/// Heap key: priority, then nearest, then oldest.
type HeapEntry = (LoadPriority, Reverse<u64>, Reverse<u64>, ChunkPos);

/// Priority queue of chunk loads, deduplicated by position.
#[derive(Debug, Default)]
pub(crate) struct LoadQueue {
    heap: BinaryHeap<HeapEntry>,
    pending: FxHashMap<ChunkPos, Pending>,
    next_seq: u64,
}

impl LoadQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a load and returns a ticket for it.
    ///
    /// If `pos` is already queued, no new task is created; the existing task
    /// is raised to `priority` when that is higher.
    pub(crate) fn push(&mut self, pos: ChunkPos, priority: LoadPriority, dist_sq: u64) -> LoadTicket {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(pending) = self.pending.get_mut(&pos) {
            if priority > pending.priority {
                pending.seq = seq;
                pending.priority = priority;
                pending.task.priority = priority;
                self.heap.push((priority, Reverse(dist_sq), Reverse(seq), pos));
            }
            return pending.task.ticket();
        }

        let task = LoadTask::new(pos, priority);
        let ticket = task.ticket();
        self.pending.insert(pos, Pending { seq, priority, task });
        self.heap.push((priority, Reverse(dist_sq), Reverse(seq), pos));
        ticket
    }

    /// Removes and returns the most urgent task.
    pub(crate) fn pop(&mut self) -> Option<LoadTask> {
        while let Some((_, _, Reverse(seq), pos)) = self.heap.pop() {
            let current = self.pending.get(&pos).is_some_and(|p| p.seq == seq);
            if current {
                return self.pending.remove(&pos).map(|p| p.task);
            }
            // Superseded by a priority bump, or removed; skip it.
        }
        None
    }

    /// Takes a queued task out of line, e.g. for a writer that needs it now.
    pub(crate) fn remove(&mut self, pos: ChunkPos) -> Option<LoadTask> {
        self.pending.remove(&pos).map(|p| p.task)
    }

    pub(crate) fn contains(&self, pos: ChunkPos) -> bool {
        self.pending.contains_key(&pos)
    }

    /// Removes every queued task whose position matches `pred`.
    pub(crate) fn cancel_where(&mut self, mut pred: impl FnMut(ChunkPos) -> bool) -> Vec<ChunkPos> {
        let cancelled: Vec<ChunkPos> = self.pending.keys().copied().filter(|p| pred(*p)).collect();
        for pos in &cancelled {
            self.pending.remove(pos);
        }
        if self.pending.is_empty() {
            self.heap.clear();
        }
        cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
