/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Thread-safe priority work queue feeding the analysis workers.
//!
//! Ordering: adjusted priority (`max(base − retry_count, 1)`, so repeatedly
//! failing files drain sooner), then file size ascending, then insertion
//! order. The last key makes the pop sequence deterministic for equal work.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::graph::model::Position;
use crate::walker::FileDescriptor;

/// A unit of work: one file, with its retry history.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// The file to analyze.
    pub file: FileDescriptor,
    /// How many times this file has already failed.
    pub retry_count: u32,
    /// Where the previous attempt blew up, so the next one can skip past it.
    pub resume_position: Option<Position>,
}

impl WorkItem {
    /// Wraps a freshly discovered file.
    #[must_use]
    pub const fn new(file: FileDescriptor) -> Self {
        Self {
            file,
            retry_count: 0,
            resume_position: None,
        }
    }

    /// Priority after retry adjustment, floored at 1.
    #[must_use]
    pub fn adjusted_priority(&self) -> u32 {
        self.file.priority.rank().saturating_sub(self.retry_count).max(1)
    }
}

/// Outcome of a blocking pop.
#[derive(Debug)]
pub enum Pop {
    /// An item was available (or became available before the deadline).
    Item(WorkItem),
    /// The deadline passed with the queue still empty.
    TimedOut,
    /// The queue was closed; no more items will arrive.
    Closed,
}

struct Entry {
    key: (u32, u64, u64),
    item: WorkItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe priority queue with async blocking pop and cancellation.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    /// Creates an empty open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an item. Pushing into a closed queue is a no-op.
    pub fn push(&self, item: WorkItem) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let key = (item.adjusted_priority(), item.file.size, seq);
            state.heap.push(Reverse(Entry { key, item }));
        }
        self.notify.notify_one();
    }

    /// Pops the highest-priority item, waiting up to `deadline` for one to
    /// arrive.
    pub async fn pop(&self, deadline: Duration) -> Pop {
        let deadline = tokio::time::Instant::now() + deadline;
        loop {
            // Register interest before inspecting state, so a push between
            // the check and the await still wakes us.
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(Reverse(entry)) = state.heap.pop() {
                    return Pop::Item(entry.item);
                }
                if state.closed {
                    return Pop::Closed;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Pop::TimedOut;
            }
        }
    }

    /// Removes any queued entry for `path`. Returns true if one was removed.
    pub fn remove(&self, path: &Path) -> bool {
        let mut state = self.lock();
        let before = state.heap.len();
        let entries: Vec<Reverse<Entry>> = std::mem::take(&mut state.heap)
            .into_iter()
            .filter(|Reverse(e)| e.item.file.path != path)
            .collect();
        state.heap = entries.into_iter().collect();
        state.heap.len() != before
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns all queued items, best-first.
    pub fn drain(&self) -> Vec<WorkItem> {
        let mut state = self.lock();
        let mut items: Vec<WorkItem> = Vec::with_capacity(state.heap.len());
        while let Some(Reverse(entry)) = state.heap.pop() {
            items.push(entry.item);
        }
        items
    }

    /// Closes the queue and wakes every blocked consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned queue mutex means a panic mid-push/pop; the queue
        // contents are still a consistent heap, so continue with them.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;
    use crate::walker::Priority;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn item(name: &str, priority: Priority, size: u64) -> WorkItem {
        WorkItem::new(FileDescriptor {
            path: PathBuf::from(name),
            size,
            language: "python",
            priority,
        })
    }

    #[tokio::test]
    async fn pops_in_priority_then_size_order() {
        let queue = WorkQueue::new();
        queue.push(item("regular.py", Priority::Regular, 10));
        queue.push(item("entry.py", Priority::EntryPoint, 500));
        queue.push(item("small_root.py", Priority::RootFile, 5));
        queue.push(item("big_root.py", Priority::RootFile, 50));

        let mut names = Vec::new();
        for _ in 0..4 {
            match queue.pop(Duration::from_millis(10)).await {
                Pop::Item(i) => names.push(i.file.path.display().to_string()),
                other => panic!("unexpected pop result: {other:?}"),
            }
        }
        assert_eq!(names, vec!["entry.py", "small_root.py", "big_root.py", "regular.py"]);
    }

    #[tokio::test]
    async fn retry_raises_urgency() {
        let queue = WorkQueue::new();
        let mut retried = item("flaky.py", Priority::Regular, 100);
        retried.retry_count = 3;
        queue.push(item("entry.py", Priority::EntryPoint, 1));
        queue.push(retried);

        // Regular (4) − 3 retries = 1, ties with EntryPoint; smaller size wins.
        match queue.pop(Duration::from_millis(10)).await {
            Pop::Item(i) => assert!(i.file.path.ends_with("entry.py")),
            other => panic!("unexpected: {other:?}"),
        }
        match queue.pop(Duration::from_millis(10)).await {
            Pop::Item(i) => assert!(i.file.path.ends_with("flaky.py")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = WorkQueue::new();
        assert!(matches!(queue.pop(Duration::from_millis(20)).await, Pop::TimedOut));
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumers() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(matches!(waiter.await.unwrap(), Pop::Closed));
    }

    #[tokio::test]
    async fn push_wakes_blocked_consumer() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(item("late.py", Priority::Regular, 1));
        assert!(matches!(waiter.await.unwrap(), Pop::Item(_)));
    }

    #[tokio::test]
    async fn remove_and_drain() {
        let queue = WorkQueue::new();
        queue.push(item("a.py", Priority::Regular, 1));
        queue.push(item("b.py", Priority::Regular, 2));
        assert_eq!(queue.len(), 2);

        assert!(queue.remove(Path::new("a.py")));
        assert!(!queue.remove(Path::new("a.py")));

        let rest = queue.drain();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].file.path.ends_with("b.py"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn push_after_close_is_ignored() {
        let queue = WorkQueue::new();
        queue.close();
        queue.push(item("late.py", Priority::Regular, 1));
        assert!(queue.is_empty());
        assert!(matches!(queue.pop(Duration::from_millis(5)).await, Pop::Closed));
    }
}
