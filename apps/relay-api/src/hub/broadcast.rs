//! The broadcast hub: owns the event log and the subscriber registry and
//! fans every accepted event out to all live subscribers.
//!
//! All mutation goes through one `parking_lot::Mutex`. Appending an event and
//! pushing it to every subscriber happen in the same critical section, which
//! makes lock acquisition in [`BroadcastHub::submit`] the single linearization
//! point: every subscriber sees events in log order, and a subscriber added
//! concurrently either gets the event in its `init` snapshot or as a `newLog`,
//! never both and never neither.
//!
//! Pushes are non-blocking `try_send`s onto bounded per-subscriber queues, so
//! a stalled connection can never hold the lock. A subscriber whose queue is
//! full or closed is dropped on the spot.
//!
//! State is in-memory only and starts empty on every process start.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::event::{EventRecord, NewEvent};

use super::log::BoundedLog;
use super::messages::ServerMessage;
use super::registry::{Outbound, Subscriber, SubscriberId, SubscriberRegistry};

/// Smallest usable queue: a fresh subscriber receives `init` and a
/// `clientCount` before its connection starts draining.
const MIN_QUEUE_CAPACITY: usize = 2;

/// Result of a successful submit.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub record: Arc<EventRecord>,
    /// Log length right after the append.
    pub total: usize,
}

/// Order in which log snapshots are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOrder {
    OldestFirst,
    #[default]
    NewestFirst,
}

/// A consistent read of the log.
#[derive(Debug, Clone)]
pub struct LogPage {
    pub logs: Vec<Arc<EventRecord>>,
    /// Full log length, regardless of any `after` filter.
    pub total: usize,
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub logs: usize,
    pub capacity: usize,
    pub clients: usize,
}

/// The receiving side handed to a newly registered subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Outbound>,
}

impl Subscription {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Next queued message. `None` once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.receiver.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Result<Outbound, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

struct HubState {
    log: BoundedLog,
    subscribers: SubscriberRegistry,
    last_seq: u64,
}

impl HubState {
    /// Push `message` to every subscriber, dropping the ones that fail.
    /// Each round that drops someone is followed by a fresh `clientCount`.
    fn fan_out(&mut self, message: Outbound) {
        let mut pending = Some(message);
        while let Some(message) = pending.take() {
            let mut dropped = 0usize;
            for subscriber in self.subscribers.enumerate() {
                if let Err(err) = subscriber.push(&message) {
                    tracing::debug!(
                        subscriber_id = %subscriber.id(),
                        msg_type = message.type_name(),
                        %err,
                        "dropping unreachable subscriber"
                    );
                    self.subscribers.remove(subscriber.id());
                    dropped += 1;
                }
            }
            if dropped > 0 {
                pending = Some(self.client_count());
            }
        }
    }

    fn client_count(&self) -> Outbound {
        Arc::new(ServerMessage::ClientCount {
            count: self.subscribers.size(),
        })
    }
}

/// Single-process relay hub. Share it as `Arc<BroadcastHub>`.
pub struct BroadcastHub {
    state: Mutex<HubState>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize, queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState {
                log: BoundedLog::new(capacity),
                subscribers: SubscriberRegistry::new(),
                last_seq: 0,
            }),
            queue_capacity: queue_capacity.max(MIN_QUEUE_CAPACITY),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_logs, config.subscriber_queue)
    }

    /// Ingest one event: stamp it, append it, and push it to every subscriber.
    pub fn submit(&self, event: NewEvent, source_address: Option<String>) -> Submitted {
        let mut state = self.state.lock();

        state.last_seq += 1;
        let record = Arc::new(event.into_record(state.last_seq, Utc::now(), source_address));
        state.log.append(record.clone());
        let total = state.log.len();

        state.fan_out(Arc::new(ServerMessage::NewLog {
            log: record.clone(),
        }));

        tracing::debug!(
            seq = record.seq,
            kind = %record.kind,
            source = %record.source_address,
            subscribers = state.subscribers.size(),
            "event accepted"
        );

        Submitted { record, total }
    }

    /// Register a new subscriber. Its queue starts with an `init` snapshot,
    /// followed by the `clientCount` every subscriber receives.
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.queue_capacity);
        let subscriber = Subscriber::new(tx);

        let mut state = self.state.lock();

        let init = Arc::new(ServerMessage::Init {
            logs: state.log.all(),
            total_clients: state.subscribers.size() + 1,
        });
        if let Err(err) = subscriber.push(&init) {
            // Cannot happen on a fresh queue with capacity >= 2.
            tracing::warn!(subscriber_id = %subscriber.id(), %err, "failed to queue init snapshot");
        }

        let id = state.subscribers.add(subscriber);
        let count = state.client_count();
        state.fan_out(count);

        tracing::debug!(subscriber_id = %id, clients = state.subscribers.size(), "subscriber added");

        Subscription { id, receiver }
    }

    /// Remove a subscriber. Unknown or already-removed ids are a no-op.
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let mut state = self.state.lock();
        if !state.subscribers.remove(id) {
            return false;
        }
        let count = state.client_count();
        state.fan_out(count);

        tracing::debug!(subscriber_id = %id, clients = state.subscribers.size(), "subscriber removed");
        true
    }

    /// Oldest-first copy of the log.
    pub fn snapshot(&self) -> Vec<Arc<EventRecord>> {
        self.state.lock().log.all()
    }

    /// Read the log in the requested order, optionally only entries newer
    /// than `after`.
    pub fn query(&self, order: LogOrder, after: Option<u64>) -> LogPage {
        let state = self.state.lock();
        let logs = match (order, after) {
            (LogOrder::NewestFirst, None) => state.log.newest_first(),
            (LogOrder::OldestFirst, None) => state.log.all(),
            (order, Some(seq)) => {
                let mut logs = state.log.after(seq);
                if order == LogOrder::NewestFirst {
                    logs.reverse();
                }
                logs
            }
        };
        LogPage {
            logs,
            total: state.log.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().log.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.size()
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, id: &SubscriberId) -> bool {
        self.state.lock().subscribers.contains(id)
    }

    pub fn stats(&self) -> HubStats {
        let state = self.state.lock();
        HubStats {
            logs: state.log.len(),
            capacity: state.log.capacity(),
            clients: state.subscribers.size(),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    use super::*;

    fn event(n: u32) -> NewEvent {
        NewEvent::new("click", format!("session-{n}")).with_detail("n", n as i64)
    }

    /// Drain everything currently queued for a subscription.
    fn drain(sub: &mut Subscription) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = sub.try_recv() {
            out.push(msg);
        }
        out
    }

    fn new_log_seqs(messages: &[Outbound]) -> Vec<u64> {
        messages
            .iter()
            .filter_map(|m| match m.as_ref() {
                ServerMessage::NewLog { log } => Some(log.seq),
                _ => None,
            })
            .collect()
    }

    fn counts(messages: &[Outbound]) -> Vec<usize> {
        messages
            .iter()
            .filter_map(|m| match m.as_ref() {
                ServerMessage::ClientCount { count } => Some(*count),
                _ => None,
            })
            .collect()
    }

    fn seqs(records: &[Arc<EventRecord>]) -> Vec<u64> {
        records.iter().map(|r| r.seq).collect()
    }

    #[test]
    fn log_length_is_min_of_submits_and_capacity() {
        let hub = BroadcastHub::new(5, 16);
        for n in 1..=12u32 {
            let submitted = hub.submit(event(n), None);
            assert_eq!(submitted.total, (n as usize).min(5));
            assert_eq!(hub.len(), (n as usize).min(5));
        }
    }

    #[test]
    fn capacity_three_scenario() {
        let hub = BroadcastHub::new(3, 16);
        for n in 1..=5 {
            hub.submit(event(n), None);
        }
        assert_eq!(seqs(&hub.snapshot()), vec![3, 4, 5]);

        let mut sub = hub.subscribe();
        let queued = drain(&mut sub);
        match queued[0].as_ref() {
            ServerMessage::Init { logs, total_clients } => {
                assert_eq!(seqs(logs), vec![3, 4, 5]);
                assert_eq!(*total_clients, 1);
            }
            other => panic!("expected init, got {other:?}"),
        }
        assert_eq!(counts(&queued), vec![1]);

        let e6 = hub.submit(event(6), None);
        let queued = drain(&mut sub);
        assert_eq!(queued.len(), 1);
        match queued[0].as_ref() {
            ServerMessage::NewLog { log } => assert_eq!(log, &e6.record),
            other => panic!("expected newLog, got {other:?}"),
        }
        assert_eq!(seqs(&hub.snapshot()), vec![4, 5, 6]);
    }

    #[test]
    fn server_fields_are_stamped_at_ingestion() {
        let hub = BroadcastHub::new(10, 16);
        let before = Utc::now();
        let first = hub.submit(event(1), Some("198.51.100.4".into()));
        let second = hub.submit(event(2), None);

        assert_eq!(first.record.seq, 1);
        assert_eq!(second.record.seq, 2);
        assert!(first.record.server_timestamp >= before);
        assert!(second.record.server_timestamp >= first.record.server_timestamp);
        assert_eq!(first.record.source_address, "198.51.100.4");
        assert_eq!(second.record.source_address, "unknown");
    }

    #[test]
    fn subscriber_receives_every_later_event_in_order() {
        let hub = BroadcastHub::new(3, 64);
        hub.submit(event(1), None);
        let mut sub = hub.subscribe();
        drain(&mut sub);

        for n in 2..=10 {
            hub.submit(event(n), None);
        }
        let queued = drain(&mut sub);
        assert_eq!(new_log_seqs(&queued), (2..=10).collect::<Vec<_>>());
    }

    #[test]
    fn client_count_follows_every_add_and_remove() {
        let hub = BroadcastHub::new(10, 16);
        let mut a = hub.subscribe();
        assert_eq!(counts(&drain(&mut a)), vec![1]);

        let mut b = hub.subscribe();
        assert_eq!(counts(&drain(&mut a)), vec![2]);
        match drain(&mut b)[0].as_ref() {
            ServerMessage::Init { total_clients, .. } => assert_eq!(*total_clients, 2),
            other => panic!("expected init, got {other:?}"),
        }

        assert!(hub.unsubscribe(b.id()));
        assert_eq!(counts(&drain(&mut a)), vec![1]);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new(10, 16);
        let mut a = hub.subscribe();
        let b = hub.subscribe();
        drain(&mut a);

        assert!(hub.unsubscribe(b.id()));
        assert!(!hub.unsubscribe(b.id()));
        assert!(!hub.unsubscribe(&SubscriberId::new()));

        // Only the first removal announces a new count.
        assert_eq!(counts(&drain(&mut a)), vec![1]);
    }

    #[test]
    fn closed_subscriber_does_not_affect_others() {
        let hub = BroadcastHub::new(10, 16);
        let mut alive = hub.subscribe();
        let dead = hub.subscribe();
        let dead_id = dead.id().clone();
        drain(&mut alive);
        drop(dead);

        for n in 1..=3 {
            hub.submit(event(n), None);
        }

        let queued = drain(&mut alive);
        assert_eq!(new_log_seqs(&queued), vec![1, 2, 3]);
        assert_eq!(counts(&queued), vec![1]);
        assert!(!hub.is_subscribed(&dead_id));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn one_count_after_a_round_that_drops_several() {
        let hub = BroadcastHub::new(10, 16);
        let mut alive = hub.subscribe();
        let gone_a = hub.subscribe();
        let gone_b = hub.subscribe();
        let (id_a, id_b) = (gone_a.id().clone(), gone_b.id().clone());
        drain(&mut alive);
        drop(gone_a);
        drop(gone_b);

        hub.submit(event(1), None);

        let queued = drain(&mut alive);
        assert_eq!(queued.len(), 2);
        assert_eq!(new_log_seqs(&queued), vec![1]);
        assert_eq!(counts(&queued), vec![1]);
        assert!(!hub.is_subscribed(&id_a));
        assert!(!hub.is_subscribed(&id_b));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn slow_subscriber_is_dropped_without_blocking() {
        let hub = BroadcastHub::new(10, 4);
        // `slow` never drains: init + count(1) + count(2) + newLog(1) fills it.
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();
        drain(&mut fast);

        hub.submit(event(1), None);
        hub.submit(event(2), None);
        hub.submit(event(3), None);

        let queued = drain(&mut fast);
        assert_eq!(new_log_seqs(&queued), vec![1, 2, 3]);
        assert_eq!(counts(&queued), vec![1]);
        assert!(!hub.is_subscribed(slow.id()));

        // The slow side still holds what was queued before it was dropped.
        let backlog = drain(&mut slow);
        assert_eq!(backlog.len(), 4);
        assert_eq!(new_log_seqs(&backlog), vec![1]);
    }

    #[test]
    fn query_orders_and_filters() {
        let hub = BroadcastHub::new(10, 16);
        for n in 1..=4 {
            hub.submit(event(n), None);
        }

        let page = hub.query(LogOrder::NewestFirst, None);
        assert_eq!(seqs(&page.logs), vec![4, 3, 2, 1]);
        assert_eq!(page.total, 4);

        let page = hub.query(LogOrder::OldestFirst, Some(2));
        assert_eq!(seqs(&page.logs), vec![3, 4]);
        assert_eq!(page.total, 4);
    }

    #[test]
    fn concurrent_submits_are_linearized() {
        let hub = Arc::new(BroadcastHub::new(100, 1024));
        let mut sub = hub.subscribe();
        drain(&mut sub);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let hub = hub.clone();
                thread::spawn(move || {
                    for n in 0..50 {
                        hub.submit(event(t * 100 + n), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let delivered = new_log_seqs(&drain(&mut sub));
        assert_eq!(delivered, (1..=400).collect::<Vec<_>>());

        // The log holds exactly the last 100, in the same order.
        assert_eq!(seqs(&hub.snapshot()), (301..=400).collect::<Vec<_>>());
    }

    #[test]
    fn subscribing_during_submits_misses_and_repeats_nothing() {
        const EVENTS: u64 = 2000;
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 6;

        let hub = Arc::new(BroadcastHub::new(64, 4096));
        let progress = Arc::new(AtomicU64::new(0));

        let subscribers: Vec<_> = (0..THREADS)
            .map(|t| {
                let hub = hub.clone();
                let progress = progress.clone();
                thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|k| {
                            let threshold = (t * PER_THREAD + k) * 40;
                            while progress.load(Ordering::Acquire) < threshold {
                                thread::yield_now();
                            }
                            hub.subscribe()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let submitter = {
            let hub = hub.clone();
            let progress = progress.clone();
            thread::spawn(move || {
                for n in 0..EVENTS {
                    let submitted = hub.submit(event(n as u32), None);
                    progress.store(submitted.record.seq, Ordering::Release);
                }
            })
        };

        submitter.join().unwrap();
        let mut subs: Vec<Subscription> = subscribers
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(subs.len(), (THREADS * PER_THREAD) as usize);

        for sub in &mut subs {
            let queued = drain(sub);
            let last_in_init = match queued[0].as_ref() {
                ServerMessage::Init { logs, .. } => logs.last().map_or(0, |r| r.seq),
                other => panic!("expected init, got {other:?}"),
            };
            assert_eq!(
                new_log_seqs(&queued),
                (last_in_init + 1..=EVENTS).collect::<Vec<_>>(),
                "subscriber {} saw a gap or a repeat",
                sub.id()
            );
        }
    }

    #[test]
    fn stats_reflect_state() {
        let hub = BroadcastHub::new(2, 16);
        let _sub = hub.subscribe();
        for n in 1..=3 {
            hub.submit(event(n), None);
        }
        assert_eq!(
            hub.stats(),
            HubStats {
                logs: 2,
                capacity: 2,
                clients: 1
            }
        );
    }
}
