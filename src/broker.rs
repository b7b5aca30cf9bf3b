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

//! Per-job batch fan-out: bounded replay ring plus live subscriber push.
//!
//! Publishing never blocks the pipeline. A subscriber that stops draining
//! its buffer is dropped (its receiver closes with the slow flag set); a
//! subscriber asking for history below the ring floor gets a
//! `resync_required` control message and only live batches after that.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::graph::model::{AnalysisStats, BatchUpdate};
use crate::job::JobStatus;

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum BrokerMessage {
    /// A sequenced batch, replayed or live.
    Batch(Arc<BatchUpdate>),
    /// The requested start is older than the ring; re-query the store for a
    /// full snapshot, then continue from the live stream.
    ResyncRequired {
        /// Oldest sequence still buffered.
        ring_floor: u64,
    },
    /// The job reached a terminal state. Not sequence-numbered; carries the
    /// final counters.
    JobEnded {
        /// Terminal status (completed, failed, or cancelled).
        status: JobStatus,
        /// Final counters.
        stats: AnalysisStats,
    },
}

/// A live subscription handle.
pub struct Subscription {
    rx: mpsc::Receiver<BrokerMessage>,
    slow: Arc<AtomicBool>,
}

impl Subscription {
    /// Receives the next message; `None` once the subscription is closed
    /// (job feed removed, or this subscriber was dropped for slowness).
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }

    /// True if the broker dropped this subscriber for not keeping up.
    #[must_use]
    pub fn dropped_for_slowness(&self) -> bool {
        self.slow.load(Ordering::SeqCst)
    }
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<BrokerMessage>,
    slow: Arc<AtomicBool>,
}

#[derive(Default)]
struct Feed {
    ring: VecDeque<Arc<BatchUpdate>>,
    last_sequence: u64,
    subscribers: Vec<SubscriberSlot>,
}

/// Fan-out hub for all jobs in the process.
pub struct SubscriptionBroker {
    feeds: Mutex<HashMap<String, Feed>>,
    ring_capacity: usize,
    subscriber_buffer: usize,
    next_subscriber_id: AtomicU64,
}

impl SubscriptionBroker {
    /// Creates a broker with the given ring and per-subscriber buffer sizes.
    #[must_use]
    pub fn new(ring_capacity: usize, subscriber_buffer: usize) -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
            ring_capacity: ring_capacity.max(1),
            subscriber_buffer: subscriber_buffer.max(1),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Attaches a subscriber to a job. Buffered batches with
    /// `sequence >= from_sequence` are replayed first, in order; the
    /// subscription then receives live batches as they are published.
    pub fn subscribe(&self, job_id: &str, from_sequence: Option<u64>) -> Subscription {
        let mut feeds = self.lock();
        let feed = feeds.entry(job_id.to_string()).or_default();

        let ring_floor = feed.ring.front().map(|b| b.sequence);
        let mut replay: Vec<Arc<BatchUpdate>> = Vec::new();
        let mut resync = None;

        if let Some(from) = from_sequence {
            match ring_floor {
                Some(floor) if from < floor => {
                    // History already evicted; the client must snapshot.
                    resync = Some(floor);
                }
                Some(_) => {
                    replay.extend(feed.ring.iter().filter(|b| b.sequence >= from).cloned());
                }
                None if from <= feed.last_sequence && feed.last_sequence > 0 => {
                    resync = Some(feed.last_sequence + 1);
                }
                None => {}
            }
        }

        // Size the channel so the whole replay fits ahead of the live
        // buffer; the slow-consumer policy applies to live traffic.
        let capacity = self.subscriber_buffer + replay.len() + usize::from(resync.is_some());
        let (tx, rx) = mpsc::channel(capacity);
        let slow = Arc::new(AtomicBool::new(false));

        if let Some(ring_floor) = resync {
            let _ = tx.try_send(BrokerMessage::ResyncRequired { ring_floor });
        }
        for batch in replay {
            let _ = tx.try_send(BrokerMessage::Batch(batch));
        }

        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        feed.subscribers.push(SubscriberSlot {
            id,
            tx,
            slow: slow.clone(),
        });
        debug!("subscriber {id} attached to job {job_id}");

        Subscription { rx, slow }
    }

    /// Publishes a batch to the ring and every live subscriber. Slow
    /// subscribers are dropped; the pipeline is never blocked.
    pub fn publish(&self, batch: Arc<BatchUpdate>) {
        let mut feeds = self.lock();
        let feed = feeds.entry(batch.job_id.clone()).or_default();

        feed.last_sequence = feed.last_sequence.max(batch.sequence);
        feed.ring.push_back(batch.clone());
        while feed.ring.len() > self.ring_capacity {
            feed.ring.pop_front();
        }

        feed.subscribers.retain(|slot| {
            match slot.tx.try_send(BrokerMessage::Batch(batch.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "dropping slow subscriber {} on job {}",
                        slot.id, batch.job_id
                    );
                    slot.slow.store(true, Ordering::SeqCst);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Tells every subscriber the job is over. Slow subscribers may miss
    /// this; their channel is already gone.
    pub fn publish_ended(&self, job_id: &str, status: JobStatus, stats: AnalysisStats) {
        let mut feeds = self.lock();
        let feed = feeds.entry(job_id.to_string()).or_default();
        feed.subscribers.retain(|slot| {
            slot.tx
                .try_send(BrokerMessage::JobEnded {
                    status,
                    stats: stats.clone(),
                })
                .is_ok()
        });
    }

    /// Highest sequence published for a job (0 if none).
    #[must_use]
    pub fn last_sequence(&self, job_id: &str) -> u64 {
        self.lock().get(job_id).map_or(0, |f| f.last_sequence)
    }

    /// Live subscriber count for a job.
    #[must_use]
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.lock().get(job_id).map_or(0, |f| f.subscribers.len())
    }

    /// Forgets a job's feed entirely; outstanding subscriptions close.
    pub fn remove_job(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Feed>> {
        match self.feeds.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;
    use crate::graph::model::BatchStatus;

    fn batch(job: &str, sequence: u64) -> Arc<BatchUpdate> {
        Arc::new(BatchUpdate {
            job_id: job.to_string(),
            sequence,
            nodes: vec![],
            edges: vec![],
            processed_files: vec![],
            failed_files: vec![],
            status: BatchStatus::StructureComplete,
            statistics: None,
        })
    }

    fn broker() -> SubscriptionBroker {
        SubscriptionBroker::new(8, 4)
    }

    #[tokio::test]
    async fn live_subscriber_sees_batches_in_order() {
        let broker = broker();
        let mut sub = broker.subscribe("job-1", None);

        broker.publish(batch("job-1", 1));
        broker.publish(batch("job-1", 2));

        for expected in 1..=2 {
            match sub.recv().await.unwrap() {
                BrokerMessage::Batch(b) => assert_eq!(b.sequence, expected),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_backlog_then_live() {
        let broker = broker();
        for seq in 1..=6 {
            broker.publish(batch("job-1", seq));
        }

        let mut sub = broker.subscribe("job-1", Some(4));
        broker.publish(batch("job-1", 7));

        let mut seen = Vec::new();
        for _ in 0..4 {
            match sub.recv().await.unwrap() {
                BrokerMessage::Batch(b) => seen.push(b.sequence),
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(seen, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn below_ring_floor_requires_resync() {
        let broker = SubscriptionBroker::new(3, 4);
        for seq in 1..=10 {
            broker.publish(batch("job-1", seq));
        }

        // Ring holds 8..=10; asking for 2 is history.
        let mut sub = broker.subscribe("job-1", Some(2));
        match sub.recv().await.unwrap() {
            BrokerMessage::ResyncRequired { ring_floor } => assert_eq!(ring_floor, 8),
            other => panic!("expected resync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_job_unaffected() {
        let broker = SubscriptionBroker::new(64, 2);
        let mut slow_sub = broker.subscribe("job-1", None);
        let mut healthy = broker.subscribe("job-1", None);

        // Publish past the slow subscriber's buffer without draining it.
        for seq in 1..=5 {
            broker.publish(batch("job-1", seq));
            // Keep the healthy one drained.
            while let Ok(msg) = tokio::time::timeout(
                std::time::Duration::from_millis(10),
                healthy.recv(),
            )
            .await
            {
                let _ = msg;
                break;
            }
        }

        assert_eq!(broker.subscriber_count("job-1"), 1);

        // The slow subscription drains its buffered prefix, then closes.
        let mut drained = 0;
        while let Some(BrokerMessage::Batch(_)) = slow_sub.recv().await {
            drained += 1;
        }
        assert_eq!(drained, 2);
        assert!(slow_sub.dropped_for_slowness());
        assert!(!healthy.dropped_for_slowness());
    }

    #[tokio::test]
    async fn remove_job_closes_subscriptions() {
        let broker = broker();
        let mut sub = broker.subscribe("job-1", None);
        broker.remove_job("job-1");
        assert!(sub.recv().await.is_none());
        assert!(!sub.dropped_for_slowness());
    }

    #[tokio::test]
    async fn last_sequence_tracks_published() {
        let broker = broker();
        assert_eq!(broker.last_sequence("job-1"), 0);
        broker.publish(batch("job-1", 1));
        broker.publish(batch("job-1", 2));
        assert_eq!(broker.last_sequence("job-1"), 2);
    }
}
