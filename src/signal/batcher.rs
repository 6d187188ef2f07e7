//! Scheduled push of triggered alerts
//!
//! Each run selects the alert-triggered events that still have error budget,
//! builds one signal per event and delivers them in a single call. Delivery
//! is at-least-once: failed events stay `AlertTriggered` with one more error
//! until they are either pushed or run out of budget.

use serde::Serialize;
use std::sync::Arc;

use super::{BuildError, Signal, SignalSink};
use crate::clock::Clock;
use crate::models::{Event, EventStatus, DURATION_KEY};
use crate::persistence::{BulkUpdate, EventStore, PushCursor};

/// Counters for one batcher run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub candidates: usize,
    pub pushed: usize,
    pub errors: usize,
}

pub struct SignalBatcher {
    store: Arc<dyn EventStore>,
    cursor: Arc<dyn PushCursor>,
    clock: Arc<dyn Clock>,
    /// Duration used when an event carries none
    default_duration: i64,
}

impl SignalBatcher {
    pub fn new(
        store: Arc<dyn EventStore>,
        cursor: Arc<dyn PushCursor>,
        clock: Arc<dyn Clock>,
        default_duration: i64,
    ) -> Self {
        SignalBatcher {
            store,
            cursor,
            clock,
            default_duration,
        }
    }

    /// Push up to `max_batch` pending alerts to `sink`
    ///
    /// Does nothing if the last successful push is less than
    /// `min_push_interval` seconds old. Never fails: storage and sink errors
    /// are logged and reflected in the counters.
    pub fn push_pending(
        &self,
        sink: &dyn SignalSink,
        max_batch: usize,
        max_error_count: u32,
        min_push_interval: i64,
    ) -> PushReport {
        let mut report = PushReport::default();

        let last_push = match self.cursor.last_push_timestamp() {
            Ok(timestamp) => timestamp,
            Err(e) => {
                log::error!("Could not read last push timestamp: {}", e);
                return report;
            }
        };
        if last_push + min_push_interval > self.clock.now() {
            log::debug!("Last push is too recent (delay {}s)", min_push_interval);
            return report;
        }

        let candidates = match self
            .store
            .find_pending(EventStatus::AlertTriggered, max_error_count)
        {
            Ok(events) => events,
            Err(e) => {
                log::error!("Could not load pending events: {}", e);
                return report;
            }
        };
        report.candidates = candidates.len();

        let mut signals = Vec::new();
        let mut included = Vec::new();

        for mut event in candidates.into_iter().take(max_batch) {
            let Some(id) = event.id else {
                continue;
            };

            match self.build_signal(sink, &event) {
                Ok(signal) => {
                    signals.push(signal);
                    included.push(id);
                }
                Err(e) => {
                    log::info!(
                        "Error while building signal for event {} ({} on {}): {}",
                        id,
                        event.ip,
                        event.scenario,
                        e
                    );
                    event.error_count += 1;
                    if let Err(e) = self.store.save(&event) {
                        log::error!("Could not record build error for event {}: {}", id, e);
                    }
                    report.errors += 1;
                }
            }
        }

        if signals.is_empty() {
            log::info!(
                "Signals push: {} candidates, {} pushed, {} errors",
                report.candidates,
                report.pushed,
                report.errors
            );
            return report;
        }

        match sink.push(&signals) {
            Ok(()) => {
                if let Err(e) = self.cursor.set_last_push_timestamp(self.clock.now()) {
                    log::error!("Could not store last push timestamp: {}", e);
                }
                if let Err(e) = self
                    .store
                    .bulk_update_by_ids(BulkUpdate::SetStatus(EventStatus::SignalPushed), &included)
                {
                    log::error!("Signals pushed but events {:?} not marked: {}", included, e);
                }
                report.pushed += included.len();
            }
            Err(e) => {
                log::error!("Error while pushing signals for events {:?}: {}", included, e);
                if let Err(e) = self
                    .store
                    .bulk_update_by_ids(BulkUpdate::IncrementErrorCount, &included)
                {
                    log::error!("Could not record push failure for {:?}: {}", included, e);
                }
                report.errors += included.len();
            }
        }

        log::info!(
            "Signals push: {} candidates, {} pushed, {} errors",
            report.candidates,
            report.pushed,
            report.errors
        );
        report
    }

    fn build_signal(&self, sink: &dyn SignalSink, event: &Event) -> Result<Signal, BuildError> {
        let duration = signal_duration(event, self.default_duration)?;
        sink.build_signal(&event.ip, &event.scenario, event.last_event_date, "", duration)
    }
}

/// `duration` from the event context, or `default` when absent
fn signal_duration(event: &Event, default: i64) -> Result<i64, BuildError> {
    match event.context.get(DURATION_KEY) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| BuildError::InvalidDuration(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::persistence::SqliteEventStore;
    use crate::signal::TransportError;
    use serde_json::json;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct MockSink {
        fail_push: bool,
        batches: Mutex<Vec<Vec<Signal>>>,
    }

    impl MockSink {
        fn failing() -> Self {
            MockSink {
                fail_push: true,
                ..Default::default()
            }
        }

        fn push_calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    impl SignalSink for MockSink {
        fn push(&self, signals: &[Signal]) -> Result<(), TransportError> {
            self.batches.lock().unwrap().push(signals.to_vec());
            if self.fail_push {
                Err(TransportError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        store: Arc<SqliteEventStore>,
        clock: Arc<MockClock>,
        batcher: SignalBatcher,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let clock = Arc::new(MockClock::new(NOW));
        let batcher = SignalBatcher::new(store.clone(), store.clone(), clock.clone(), 86400);
        Harness {
            store,
            clock,
            batcher,
        }
    }

    fn triggered(h: &Harness, ip: &str, errors: u32) -> i64 {
        let mut event = Event::new(ip, "crowdsec-page-scan", NOW - 100);
        event.status = EventStatus::AlertTriggered;
        event.count = 11;
        event.error_count = errors;
        h.store.save(&event).unwrap().id.unwrap()
    }

    fn load(h: &Harness, id: i64) -> Event {
        h.store.find_by_id(id).unwrap().unwrap()
    }

    #[test]
    fn test_push_success_reconciles_events() {
        let h = harness();
        let ids: Vec<_> = ["1.1.1.1", "2.2.2.2", "3.3.3.3"]
            .iter()
            .map(|ip| triggered(&h, ip, 0))
            .collect();
        let sink = MockSink::default();

        let report = h.batcher.push_pending(&sink, 250, 5, 10);

        assert_eq!(report, PushReport { candidates: 3, pushed: 3, errors: 0 });
        for id in ids {
            assert_eq!(load(&h, id).status, EventStatus::SignalPushed);
        }
        assert_eq!(sink.push_calls(), 1);
        assert_eq!(h.store.last_push_timestamp().unwrap(), NOW);
    }

    #[test]
    fn test_push_failure_increments_errors() {
        let h = harness();
        let ids: Vec<_> = ["1.1.1.1", "2.2.2.2", "3.3.3.3"]
            .iter()
            .map(|ip| triggered(&h, ip, 0))
            .collect();
        let sink = MockSink::failing();

        let report = h.batcher.push_pending(&sink, 250, 5, 10);

        assert_eq!(report, PushReport { candidates: 3, pushed: 0, errors: 3 });
        for &id in &ids {
            let event = load(&h, id);
            assert_eq!(event.status, EventStatus::AlertTriggered);
            assert_eq!(event.error_count, 1);
        }
        assert_eq!(h.store.last_push_timestamp().unwrap(), 0);

        // Not debounced after a failure
        let report = h.batcher.push_pending(&sink, 250, 5, 10);
        assert_eq!(report.errors, 3);
        assert_eq!(load(&h, ids[0]).error_count, 2);
    }

    #[test]
    fn test_debounce_between_runs() {
        let h = harness();
        triggered(&h, "1.1.1.1", 0);
        let sink = MockSink::default();

        let first = h.batcher.push_pending(&sink, 250, 5, 10);
        assert_eq!(first.pushed, 1);

        triggered(&h, "2.2.2.2", 0);
        h.clock.advance(9);
        let second = h.batcher.push_pending(&sink, 250, 5, 10);
        assert_eq!(second, PushReport::default());
        assert_eq!(sink.push_calls(), 1);

        h.clock.advance(1);
        let third = h.batcher.push_pending(&sink, 250, 5, 10);
        assert_eq!(third, PushReport { candidates: 1, pushed: 1, errors: 0 });
    }

    #[test]
    fn test_dead_letter_excludes_exhausted_events() {
        let h = harness();
        let exhausted = triggered(&h, "1.1.1.1", 5);
        let last_chance = triggered(&h, "2.2.2.2", 4);
        let sink = MockSink::default();

        let report = h.batcher.push_pending(&sink, 250, 5, 10);

        assert_eq!(report, PushReport { candidates: 1, pushed: 1, errors: 0 });
        assert_eq!(load(&h, exhausted).status, EventStatus::AlertTriggered);
        assert_eq!(load(&h, last_chance).status, EventStatus::SignalPushed);
    }

    #[test]
    fn test_failures_exhaust_error_budget() {
        let h = harness();
        let id = triggered(&h, "1.1.1.1", 0);
        let sink = MockSink::failing();

        for _ in 0..3 {
            h.batcher.push_pending(&sink, 250, 3, 10);
        }
        assert_eq!(load(&h, id).error_count, 3);

        let report = h.batcher.push_pending(&sink, 250, 3, 10);
        assert_eq!(report, PushReport::default());
        assert_eq!(sink.push_calls(), 3);
    }

    #[test]
    fn test_build_error_excludes_event() {
        let h = harness();
        triggered(&h, "1.1.1.1", 0);
        triggered(&h, "2.2.2.2", 0);

        let mut bad = Event::new("3.3.3.3", "crowdsec-page-scan", NOW - 100);
        bad.status = EventStatus::AlertTriggered;
        bad.context.insert(DURATION_KEY.to_string(), json!("forever"));
        let bad_id = h.store.save(&bad).unwrap().id.unwrap();

        let sink = MockSink::default();
        let report = h.batcher.push_pending(&sink, 250, 5, 10);

        assert_eq!(report, PushReport { candidates: 3, pushed: 2, errors: 1 });
        let bad = load(&h, bad_id);
        assert_eq!(bad.status, EventStatus::AlertTriggered);
        assert_eq!(bad.error_count, 1);
        assert_eq!(sink.batches.lock().unwrap()[0].len(), 2);
    }

    #[test]
    fn test_unparseable_ip_is_build_error() {
        let h = harness();
        let id = triggered(&h, "not-an-ip", 0);
        let sink = MockSink::default();

        let report = h.batcher.push_pending(&sink, 250, 5, 10);

        assert_eq!(report, PushReport { candidates: 1, pushed: 0, errors: 1 });
        assert_eq!(sink.push_calls(), 0);
        assert_eq!(load(&h, id).error_count, 1);
        assert_eq!(h.store.last_push_timestamp().unwrap(), 0);
    }

    #[test]
    fn test_max_batch_limits_push() {
        let h = harness();
        for i in 0..5 {
            triggered(&h, &format!("10.0.0.{}", i), 0);
        }
        let sink = MockSink::default();

        let report = h.batcher.push_pending(&sink, 2, 5, 10);
        assert_eq!(report, PushReport { candidates: 5, pushed: 2, errors: 0 });

        let remaining = h.store.find_pending(EventStatus::AlertTriggered, 5).unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn test_signal_fields_from_event() {
        let h = harness();
        triggered(&h, "1.1.1.1", 0);
        let mut custom = Event::new("2.2.2.2", "crowdsec-user-enum", NOW - 5);
        custom.status = EventStatus::AlertTriggered;
        custom.context.insert(DURATION_KEY.to_string(), json!(600));
        h.store.save(&custom).unwrap();

        let sink = MockSink::default();
        h.batcher.push_pending(&sink, 250, 5, 10);

        let batches = sink.batches.lock().unwrap();
        let signals = &batches[0];
        assert_eq!(signals[0].ip.to_string(), "1.1.1.1");
        assert_eq!(signals[0].duration, 86400);
        assert_eq!(signals[0].start_at.timestamp(), NOW - 100);
        assert_eq!(signals[1].scenario, "crowdsec-user-enum");
        assert_eq!(signals[1].duration, 600);
        assert!(signals[1].message.is_empty());
    }

    #[test]
    fn test_nothing_pending() {
        let h = harness();
        let sink = MockSink::default();

        assert_eq!(h.batcher.push_pending(&sink, 250, 5, 10), PushReport::default());
        assert_eq!(sink.push_calls(), 0);
        assert_eq!(h.store.last_push_timestamp().unwrap(), 0);
    }
}
