//! Request-path hook running the enabled scenarios over each exchange

use std::collections::HashSet;
use std::sync::Arc;

use super::aggregator::{EventAggregator, RequestScope};
use super::registry::ScenarioRegistry;
use crate::models::HttpExchange;

pub struct ScenarioEngine {
    registry: Arc<ScenarioRegistry>,
    aggregator: Arc<EventAggregator>,
    enabled: HashSet<String>,
}

impl ScenarioEngine {
    pub fn new(
        registry: Arc<ScenarioRegistry>,
        aggregator: Arc<EventAggregator>,
        enabled: &[String],
    ) -> Self {
        for name in enabled {
            if registry.get(name).is_none() {
                log::warn!("Enabled scenario '{}' is not registered", name);
            }
        }

        ScenarioEngine {
            registry,
            aggregator,
            enabled: enabled.iter().cloned().collect(),
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Run every enabled scenario against `exchange`
    ///
    /// Returns how many occurrences were recorded. Aggregation failures are
    /// logged by the aggregator and never reach the caller.
    pub fn process(&self, exchange: &HttpExchange) -> usize {
        let mut scope = RequestScope::new();
        let mut recorded = 0;

        for scenario in self.registry.iter() {
            if !self.is_enabled(scenario.name()) {
                continue;
            }
            let Some(occurrence) = scenario.detect(exchange) else {
                continue;
            };

            log::debug!("Scenario {} matched {}", scenario.name(), occurrence.ip);
            if self.aggregator.record_occurrence(
                &mut scope,
                scenario.spec(),
                &occurrence.ip,
                occurrence.context,
            ) {
                recorded += 1;
            }
        }

        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::NullNotifier;
    use crate::clock::MockClock;
    use crate::detection::scenario::{default_login_paths, PageScan, UserEnumeration};
    use crate::models::EventStatus;
    use crate::persistence::{EventStore, SqliteEventStore};

    fn exchange(method: &str, path: &str, status: u16) -> HttpExchange {
        HttpExchange {
            ip: "203.0.113.9".to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            authenticated: false,
            user_agent: Some("curl/8.0".to_string()),
        }
    }

    fn engine(enabled: &[&str]) -> (ScenarioEngine, Arc<SqliteEventStore>) {
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let aggregator = Arc::new(EventAggregator::new(
            store.clone(),
            Arc::new(MockClock::new(1_700_000_000)),
            Arc::new(NullNotifier),
            3600,
        ));
        let registry = Arc::new(ScenarioRegistry::with_builtin(default_login_paths()));
        let enabled: Vec<String> = enabled.iter().map(|s| s.to_string()).collect();
        (ScenarioEngine::new(registry, aggregator, &enabled), store)
    }

    #[test]
    fn test_page_scan_pipeline() {
        let (engine, store) = engine(&[PageScan::NAME, UserEnumeration::NAME]);

        for _ in 0..11 {
            assert_eq!(engine.process(&exchange("GET", "/phpmyadmin", 404)), 1);
        }

        let event = store
            .find_most_recent("203.0.113.9", PageScan::NAME)
            .unwrap()
            .unwrap();
        assert_eq!(event.count, 11);
        assert_eq!(event.status, EventStatus::AlertTriggered);
    }

    #[test]
    fn test_disabled_scenario_is_skipped() {
        let (engine, store) = engine(&[UserEnumeration::NAME]);

        assert_eq!(engine.process(&exchange("GET", "/missing", 404)), 0);
        assert!(store
            .find_most_recent("203.0.113.9", PageScan::NAME)
            .unwrap()
            .is_none());

        assert_eq!(engine.process(&exchange("POST", "/login", 401)), 1);
    }

    #[test]
    fn test_unmatched_exchange_records_nothing() {
        let (engine, _store) = engine(&[PageScan::NAME, UserEnumeration::NAME]);
        assert_eq!(engine.process(&exchange("GET", "/", 200)), 0);
        assert!(engine.is_enabled(PageScan::NAME));
        assert!(!engine.is_enabled("acme/other"));
    }
}
