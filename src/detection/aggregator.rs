//! Event aggregation state machine
//!
//! For each occurrence the aggregator looks at the most recent event of the
//! (ip, scenario) pair and either starts a fresh cycle, suppresses it while
//! the previous alert is black-holed, or pours it into the leaky bucket.
//! Updates to a given pair are serialized by a per-key lock.

use chrono::DateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::bucket;
use super::scenario::ScenarioSpec;
use crate::alerting::{AlertNotifier, AlertTriggered};
use crate::clock::Clock;
use crate::models::{
    is_valid_scenario_name, AlertRequest, Event, EventContext, EventStatus, DURATION_KEY,
};
use crate::persistence::{EventStore, PersistenceError};

/// Black hole applied to externally queued alerts
pub const ALERT_BLACK_HOLE: i64 = 3600;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Scenario name '{0}' does not conform to the convention")]
    InvalidScenarioName(String),

    #[error("Last event date must be a timestamp integer")]
    InvalidTimestamp,

    #[error("Leak speed of scenario '{0}' must be strictly positive, got {1}")]
    InvalidLeakSpeed(String, i64),
}

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Invalid occurrence: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// What an occurrence did to the tracked state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new event was saved
    FreshCycle,
    /// The bucket of an existing event was updated
    Updated { alert_triggered: bool },
    /// The previous alert is still black-holed, nothing saved
    Suppressed,
    /// An alert for the pair is already waiting to be pushed
    AlreadyQueued,
}

impl RecordOutcome {
    pub fn is_recorded(self) -> bool {
        matches!(self, RecordOutcome::FreshCycle | RecordOutcome::Updated { .. })
    }
}

/// Last-event memo for one unit of request processing
///
/// Create one per request (or per replayed log line) and drop it afterwards.
#[derive(Debug, Default)]
pub struct RequestScope {
    last_events: HashMap<(String, String), Event>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ip: &str, scenario: &str) -> Option<&Event> {
        self.last_events.get(&(ip.to_string(), scenario.to_string()))
    }

    fn remember(&mut self, event: Event) {
        self.last_events
            .insert((event.ip.clone(), event.scenario.clone()), event);
    }

    pub fn len(&self) -> usize {
        self.last_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_events.is_empty()
    }
}

/// One mutex per (ip, scenario) currently being worked on
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn with_lock<T>(&self, ip: &str, scenario: &str, f: impl FnOnce() -> T) -> T {
        let key = (ip.to_string(), scenario.to_string());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        // Drop the entry once nobody else holds or waits on it
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        result
    }
}

pub struct EventAggregator {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn AlertNotifier>,
    /// Duration given to externally queued alerts
    default_duration: i64,
    locks: KeyedLocks,
}

impl EventAggregator {
    pub fn new(
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn AlertNotifier>,
        default_duration: i64,
    ) -> Self {
        EventAggregator {
            store,
            clock,
            notifier,
            default_duration,
            locks: KeyedLocks::default(),
        }
    }

    /// Record one occurrence of `scenario` for `ip`
    ///
    /// Returns true when a fresh event was created or an existing bucket was
    /// updated. Failures are logged, never propagated.
    pub fn record_occurrence(
        &self,
        scope: &mut RequestScope,
        scenario: &ScenarioSpec,
        ip: &str,
        context: EventContext,
    ) -> bool {
        match self.try_record_occurrence(scope, scenario, ip, context) {
            Ok(outcome) => outcome.is_recorded(),
            Err(AggregationError::Validation(e)) => {
                log::debug!("Occurrence rejected for {} on {}: {}", ip, scenario.name(), e);
                false
            }
            Err(e) => {
                log::error!("Failed to record occurrence for {} on {}: {}", ip, scenario.name(), e);
                false
            }
        }
    }

    pub fn try_record_occurrence(
        &self,
        scope: &mut RequestScope,
        scenario: &ScenarioSpec,
        ip: &str,
        context: EventContext,
    ) -> Result<RecordOutcome, AggregationError> {
        validate_occurrence(ip, scenario.name())?;
        validate_tunables(scenario)?;

        self.locks.with_lock(ip, scenario.name(), || -> Result<RecordOutcome, AggregationError> {
            let now = self.clock.now();

            match self.last_event(scope, ip, scenario.name())? {
                Some(event) if event.status.is_terminal() => {
                    if self.is_black_holed(&event, scenario.black_hole(), now) {
                        Ok(RecordOutcome::Suppressed)
                    } else {
                        self.start_cycle(scope, scenario, ip, context, now)?;
                        Ok(RecordOutcome::FreshCycle)
                    }
                }
                Some(mut event) => {
                    let alert_triggered = self.update_bucket(scenario, &mut event, context, now)?;
                    scope.remember(event);
                    Ok(RecordOutcome::Updated { alert_triggered })
                }
                None => {
                    self.start_cycle(scope, scenario, ip, context, now)?;
                    Ok(RecordOutcome::FreshCycle)
                }
            }
        })
    }

    /// Pour one occurrence into the bucket of a saved `Created` event
    ///
    /// Returns false without touching anything for any other event.
    pub fn apply_leaky_bucket_update(
        &self,
        scenario: &ScenarioSpec,
        event: &mut Event,
        context: EventContext,
    ) -> Result<bool, AggregationError> {
        validate_tunables(scenario)?;
        if !event.is_saved() || event.status != EventStatus::Created {
            return Ok(false);
        }

        let (ip, name) = (event.ip.clone(), event.scenario.clone());
        self.locks.with_lock(&ip, &name, || -> Result<bool, AggregationError> {
            let now = self.clock.now();
            self.update_bucket(scenario, event, context, now)?;
            Ok(true)
        })
    }

    /// Whether `event` is inside its black hole at `now`
    pub fn is_black_holed(&self, event: &Event, black_hole: i64, now: i64) -> bool {
        let result = bucket::is_black_holed(event, black_hole, now);
        if result {
            log::debug!(
                "Event {:?} is in black hole (last_event_date={}, time={}, black_hole={})",
                event.id,
                event.last_event_date,
                now,
                black_hole
            );
        }
        result
    }

    /// Queue an alert raised outside the scenario engine
    ///
    /// Returns true when an alert event was saved.
    pub fn ingest_alert(&self, scope: &mut RequestScope, alert: &AlertRequest) -> bool {
        match self.try_ingest_alert(scope, alert) {
            Ok(outcome) => outcome.is_recorded(),
            Err(AggregationError::Validation(e)) => {
                log::debug!("Error while adding triggered alert: {}", e);
                false
            }
            Err(e) => {
                log::error!("Error while adding alert to queue: {}", e);
                false
            }
        }
    }

    pub fn try_ingest_alert(
        &self,
        scope: &mut RequestScope,
        alert: &AlertRequest,
    ) -> Result<RecordOutcome, AggregationError> {
        let last_event_date = validate_alert(alert)?;
        let (ip, scenario) = (alert.ip.as_str(), alert.scenario.as_str());

        self.locks.with_lock(ip, scenario, || -> Result<RecordOutcome, AggregationError> {
            let now = self.clock.now();
            let date = last_event_date.unwrap_or(now);

            match self.last_event(scope, ip, scenario)? {
                None => {
                    self.save_alert_event(scope, ip, scenario, date)?;
                    Ok(RecordOutcome::FreshCycle)
                }
                Some(event) if event.status == EventStatus::AlertTriggered => {
                    log::debug!("Alert already in queue (event {:?})", event.id);
                    Ok(RecordOutcome::AlreadyQueued)
                }
                Some(event)
                    if event.status == EventStatus::SignalPushed
                        && !self.is_black_holed(&event, ALERT_BLACK_HOLE, now) =>
                {
                    self.save_alert_event(scope, ip, scenario, date)?;
                    Ok(RecordOutcome::FreshCycle)
                }
                Some(_) => Ok(RecordOutcome::Suppressed),
            }
        })
    }

    fn last_event(
        &self,
        scope: &mut RequestScope,
        ip: &str,
        scenario: &str,
    ) -> Result<Option<Event>, PersistenceError> {
        if let Some(event) = scope.get(ip, scenario) {
            return Ok(Some(event.clone()));
        }

        let found = self.store.find_most_recent(ip, scenario)?;
        if let Some(ref event) = found {
            scope.remember(event.clone());
        }
        Ok(found)
    }

    fn start_cycle(
        &self,
        scope: &mut RequestScope,
        scenario: &ScenarioSpec,
        ip: &str,
        context: EventContext,
        now: i64,
    ) -> Result<(), PersistenceError> {
        let mut event = Event::new(ip, scenario.name(), now);
        event
            .context
            .insert(DURATION_KEY.to_string(), scenario.duration().into());
        event.merge_context(context);

        let saved = self.store.save(&event)?;
        log::debug!("New event {:?} for {} on {}", saved.id, ip, scenario.name());
        scope.remember(saved);
        Ok(())
    }

    /// Decay, increment and persist; returns whether the alert fired
    fn update_bucket(
        &self,
        scenario: &ScenarioSpec,
        event: &mut Event,
        context: EventContext,
        now: i64,
    ) -> Result<bool, PersistenceError> {
        let leaked = bucket::leaking_bucket_count(
            now,
            event.count,
            event.last_event_date,
            scenario.leak_speed(),
        );
        event.count = leaked + 1;

        let alert_triggered = event.count > scenario.bucket_capacity();
        if alert_triggered {
            event.status = EventStatus::AlertTriggered;
        }
        event.last_event_date = now;
        event.merge_context(context);

        *event = self.store.save(event)?;

        if alert_triggered {
            log::info!(
                "Alert triggered for {} on {} (count {} > {})",
                event.ip,
                scenario.name(),
                event.count,
                scenario.bucket_capacity()
            );
            let duration = event
                .context
                .get(DURATION_KEY)
                .and_then(|v| v.as_i64())
                .unwrap_or(scenario.duration());
            self.notifier.notify(AlertTriggered {
                event: event.clone(),
                scenario: scenario.name().to_string(),
                duration,
            });
        }

        Ok(alert_triggered)
    }

    fn save_alert_event(
        &self,
        scope: &mut RequestScope,
        ip: &str,
        scenario: &str,
        last_event_date: i64,
    ) -> Result<(), PersistenceError> {
        let mut event = Event::new(ip, scenario, last_event_date);
        event.status = EventStatus::AlertTriggered;
        event
            .context
            .insert(DURATION_KEY.to_string(), self.default_duration.into());

        log::debug!("Triggered alert will be saved for {} on {}", ip, scenario);
        let saved = self.store.save(&event)?;
        scope.remember(saved);
        Ok(())
    }
}

fn validate_occurrence(ip: &str, scenario: &str) -> Result<(), ValidationError> {
    if ip.trim().is_empty() {
        return Err(ValidationError::MissingField("ip"));
    }
    if scenario.is_empty() {
        return Err(ValidationError::MissingField("scenario"));
    }
    if !is_valid_scenario_name(scenario) {
        return Err(ValidationError::InvalidScenarioName(scenario.to_string()));
    }
    Ok(())
}

fn validate_tunables(scenario: &ScenarioSpec) -> Result<(), ValidationError> {
    if scenario.leak_speed() <= 0 {
        return Err(ValidationError::InvalidLeakSpeed(
            scenario.name().to_string(),
            scenario.leak_speed(),
        ));
    }
    Ok(())
}

fn validate_alert(alert: &AlertRequest) -> Result<Option<i64>, ValidationError> {
    validate_occurrence(&alert.ip, &alert.scenario)?;

    match alert.last_event_date {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(ref value) => value
            .as_i64()
            .filter(|&ts| DateTime::from_timestamp(ts, 0).is_some())
            .map(Some)
            .ok_or(ValidationError::InvalidTimestamp),
    }
}
