use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Free-form data attached to an event (e.g. a `duration` override)
pub type EventContext = serde_json::Map<String, serde_json::Value>;

/// Naming convention every scenario must follow
pub const SCENARIO_NAME_PATTERN: &str = r"^[A-Za-z0-9_:/-]+$";

/// Context key carrying the alert duration in seconds
pub const DURATION_KEY: &str = "duration";

pub fn is_valid_scenario_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SCENARIO_NAME_PATTERN).expect("scenario pattern is valid"))
        .is_match(name)
}

/// Lifecycle position of a tracked event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Created,
    AlertTriggered,
    SignalPushed,
}

impl EventStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            EventStatus::Created => 0,
            EventStatus::AlertTriggered => 1,
            EventStatus::SignalPushed => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(EventStatus::Created),
            1 => Some(EventStatus::AlertTriggered),
            2 => Some(EventStatus::SignalPushed),
            _ => None,
        }
    }

    /// Alert already raised for this cycle
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::AlertTriggered | EventStatus::SignalPushed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Created => write!(f, "created"),
            EventStatus::AlertTriggered => write!(f, "alert_triggered"),
            EventStatus::SignalPushed => write!(f, "signal_pushed"),
        }
    }
}

/// Suspicious activity tracked for one (ip, scenario) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Storage id, `None` until persisted
    pub id: Option<i64>,
    pub ip: String,
    pub scenario: String,
    /// Current bucket fill level
    pub count: u32,
    pub status: EventStatus,
    /// Unix seconds of the most recent contributing occurrence
    pub last_event_date: i64,
    pub context: EventContext,
    /// Failed push attempts
    pub error_count: u32,
}

impl Event {
    /// A transient event starting a new cycle
    pub fn new(ip: &str, scenario: &str, last_event_date: i64) -> Self {
        Event {
            id: None,
            ip: ip.to_string(),
            scenario: scenario.to_string(),
            count: 1,
            status: EventStatus::Created,
            last_event_date,
            context: EventContext::new(),
            error_count: 0,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Merge `extra` over the existing context
    pub fn merge_context(&mut self, extra: EventContext) {
        for (key, value) in extra {
            self.context.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scenario_name_pattern() {
        assert!(is_valid_scenario_name("crowdsec-page-scan"));
        assert!(is_valid_scenario_name("magento2/user_enum"));
        assert!(is_valid_scenario_name("vendor:scan"));
        assert!(!is_valid_scenario_name(""));
        assert!(!is_valid_scenario_name("bad name"));
        assert!(!is_valid_scenario_name("drop;table"));
    }

    #[test]
    fn test_status_codes() {
        for status in [
            EventStatus::Created,
            EventStatus::AlertTriggered,
            EventStatus::SignalPushed,
        ] {
            assert_eq!(EventStatus::from_i64(status.as_i64()), Some(status));
        }
        assert_eq!(EventStatus::from_i64(9), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!EventStatus::Created.is_terminal());
        assert!(EventStatus::AlertTriggered.is_terminal());
        assert!(EventStatus::SignalPushed.is_terminal());
    }

    #[test]
    fn test_merge_context_overrides() {
        let mut event = Event::new("1.2.3.4", "crowdsec-page-scan", 1000);
        event.context.insert("duration".into(), json!(60));
        event.context.insert("path".into(), json!("/admin"));

        let mut extra = EventContext::new();
        extra.insert("duration".into(), json!(120));
        event.merge_context(extra);

        assert_eq!(event.context["duration"], json!(120));
        assert_eq!(event.context["path"], json!("/admin"));
        assert!(!event.is_saved());
    }
}
