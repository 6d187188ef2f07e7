//! Decisions derived from the persisted alert history

use std::sync::Arc;

use super::{Decision, RemediationError, RemediationSource};
use crate::clock::Clock;
use crate::models::{Event, DURATION_KEY};
use crate::persistence::EventStore;

/// Bans an address while one of its alerts is still within its duration
///
/// Survives restarts, unlike [`super::LocalDecisionCache`].
pub struct AlertHistorySource {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    scenarios: Vec<String>,
    default_duration: i64,
}

impl AlertHistorySource {
    pub fn new(
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        scenarios: Vec<String>,
        default_duration: i64,
    ) -> Self {
        AlertHistorySource {
            store,
            clock,
            scenarios,
            default_duration,
        }
    }

    fn ban_until(&self, event: &Event) -> Option<i64> {
        if !event.status.is_terminal() {
            return None;
        }
        let duration = event
            .context
            .get(DURATION_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or(self.default_duration);
        Some(event.last_event_date.saturating_add(duration))
    }
}

impl RemediationSource for AlertHistorySource {
    fn decision(&self, ip: &str) -> Result<Decision, RemediationError> {
        let now = self.clock.now();
        for scenario in &self.scenarios {
            if let Some(event) = self.store.find_most_recent(ip, scenario)? {
                if self.ban_until(&event).map_or(false, |until| until > now) {
                    return Ok(Decision::Ban);
                }
            }
        }
        Ok(Decision::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::models::EventStatus;
    use crate::persistence::SqliteEventStore;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn setup() -> (Arc<SqliteEventStore>, AlertHistorySource) {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let source = AlertHistorySource::new(
            store.clone(),
            Arc::new(MockClock::new(NOW)),
            vec!["crowdsec-page-scan".to_string()],
            3600,
        );
        (store, source)
    }

    #[test]
    fn test_no_history_is_unknown() {
        let (_, source) = setup();
        assert_eq!(source.decision("1.2.3.4").unwrap(), Decision::Unknown);
    }

    #[test]
    fn test_created_event_does_not_ban() {
        let (store, source) = setup();
        store
            .save(&Event::new("1.2.3.4", "crowdsec-page-scan", NOW - 10))
            .unwrap();
        assert_eq!(source.decision("1.2.3.4").unwrap(), Decision::Unknown);
    }

    #[test]
    fn test_recent_alert_bans_until_duration_elapses() {
        let (store, source) = setup();
        let mut event = Event::new("1.2.3.4", "crowdsec-page-scan", NOW - 500);
        event.status = EventStatus::SignalPushed;
        event.context.insert(DURATION_KEY.to_string(), json!(600));
        store.save(&event).unwrap();
        assert_eq!(source.decision("1.2.3.4").unwrap(), Decision::Ban);

        let mut old = Event::new("5.6.7.8", "crowdsec-page-scan", NOW - 700);
        old.status = EventStatus::AlertTriggered;
        old.context.insert(DURATION_KEY.to_string(), json!(600));
        store.save(&old).unwrap();
        assert_eq!(source.decision("5.6.7.8").unwrap(), Decision::Unknown);
    }

    #[test]
    fn test_default_duration_applies() {
        let (store, source) = setup();
        let mut event = Event::new("1.2.3.4", "crowdsec-page-scan", NOW - 3000);
        event.status = EventStatus::AlertTriggered;
        store.save(&event).unwrap();
        assert_eq!(source.decision("1.2.3.4").unwrap(), Decision::Ban);
    }

    #[test]
    fn test_unlisted_scenario_ignored() {
        let (store, source) = setup();
        let mut event = Event::new("1.2.3.4", "crowdsec-user-enum", NOW);
        event.status = EventStatus::AlertTriggered;
        store.save(&event).unwrap();
        assert_eq!(source.decision("1.2.3.4").unwrap(), Decision::Unknown);
    }

    #[test]
    fn test_huge_stored_date_does_not_overflow() {
        let (store, source) = setup();
        let mut event = Event::new("1.2.3.4", "crowdsec-page-scan", i64::MAX - 10);
        event.status = EventStatus::AlertTriggered;
        event.context.insert(DURATION_KEY.to_string(), json!(3600));
        store.save(&event).unwrap();
        assert_eq!(source.decision("1.2.3.4").unwrap(), Decision::Ban);
    }
}
