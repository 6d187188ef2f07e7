use serde::{Deserialize, Serialize};

use super::event::EventContext;

/// One observed request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpExchange {
    pub ip: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Whether the request carried an authenticated identity
    pub authenticated: bool,
    pub user_agent: Option<String>,
}

/// A positive detection produced by a scenario
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub ip: String,
    pub context: EventContext,
}

impl Occurrence {
    pub fn for_ip(ip: &str) -> Self {
        Occurrence {
            ip: ip.to_string(),
            context: EventContext::new(),
        }
    }
}

/// Alert raised by some other component and queued for push as-is
///
/// `last_event_date` is kept as raw JSON so that a malformed (non-integer)
/// timestamp can be rejected instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRequest {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub last_event_date: Option<serde_json::Value>,
}
