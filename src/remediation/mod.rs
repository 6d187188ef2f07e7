//! Remediation lookup and request bouncing
//!
//! [`RemediationGate`] asks a [`RemediationSource`] what to do with an
//! address and renders the ban page when the answer is a ban.

pub mod history;

pub use history::AlertHistorySource;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::BounceConfig;
use crate::persistence::PersistenceError;

pub const BAN_STATUS_CODE: u16 = 403;
pub const DEFAULT_BAN_BODY: &str = "<div>IP banned by Leakwatch</div>";

#[derive(Error, Debug)]
pub enum RemediationError {
    #[error("Remediation source unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
}

/// Answer of a remediation source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ban,
    Allow,
    Unknown,
}

pub trait RemediationSource: Send + Sync {
    fn decision(&self, ip: &str) -> Result<Decision, RemediationError>;
}

/// What the gate tells the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Ban,
}

/// Response replacing the regular one for a banned client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanResponse {
    pub status: u16,
    pub body: String,
}

pub struct RemediationGate {
    source: Arc<dyn RemediationSource>,
    enabled: bool,
    ban_template: Option<String>,
}

impl RemediationGate {
    pub fn new(source: Arc<dyn RemediationSource>, config: &BounceConfig) -> Self {
        RemediationGate {
            source,
            enabled: config.enabled,
            ban_template: config.ban_template.clone(),
        }
    }

    /// Unknown decisions and lookup failures let the request through
    pub fn should_bounce(&self, ip: &str) -> GateDecision {
        if !self.enabled {
            return GateDecision::Allow;
        }

        match self.source.decision(ip) {
            Ok(Decision::Ban) => GateDecision::Ban,
            Ok(Decision::Allow) | Ok(Decision::Unknown) => GateDecision::Allow,
            Err(e) => {
                log::error!("Technical error while bouncing ip {}: {}", ip, e);
                GateDecision::Allow
            }
        }
    }

    /// The response to send instead of the regular one, if any
    pub fn bounce(&self, ip: &str) -> Option<BanResponse> {
        match self.should_bounce(ip) {
            GateDecision::Allow => None,
            GateDecision::Ban => Some(BanResponse {
                status: BAN_STATUS_CODE,
                body: self.render_ban_page(ip),
            }),
        }
    }

    /// Only a parsed address is substituted, so the body never carries raw client input
    fn render_ban_page(&self, ip: &str) -> String {
        let template = match self.ban_template.as_deref() {
            Some(template) if !template.trim().is_empty() => template,
            _ => return DEFAULT_BAN_BODY.to_string(),
        };
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => template.replace("{{ip}}", &addr.to_string()),
            Err(_) => template.replace("{{ip}}", ""),
        }
    }
}

/// Bans decided locally from triggered alerts, each with an expiry
pub struct LocalDecisionCache {
    clock: Arc<dyn Clock>,
    bans: Mutex<HashMap<String, i64>>,
}

impl LocalDecisionCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        LocalDecisionCache {
            clock,
            bans: Mutex::new(HashMap::new()),
        }
    }

    /// Ban `ip` for `duration` seconds from now, extending any current ban
    pub fn ban(&self, ip: &str, duration: i64) {
        let until = self.clock.now().saturating_add(duration);
        let mut bans = self.bans.lock().unwrap_or_else(|e| e.into_inner());
        let entry = bans.entry(ip.to_string()).or_insert(until);
        *entry = (*entry).max(until);
        log::info!("Local ban for {} until {}", ip, entry);
    }

    /// Forget every decision
    pub fn clear(&self) {
        self.bans.lock().unwrap_or_else(|e| e.into_inner()).clear();
        log::info!("Local decision cache cleared");
    }

    /// Drop expired bans; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut bans = self.bans.lock().unwrap_or_else(|e| e.into_inner());
        let before = bans.len();
        bans.retain(|_, until| *until > now);
        before - bans.len()
    }

    pub fn len(&self) -> usize {
        self.bans.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RemediationSource for LocalDecisionCache {
    fn decision(&self, ip: &str) -> Result<Decision, RemediationError> {
        let bans = self.bans.lock().unwrap_or_else(|e| e.into_inner());
        match bans.get(ip) {
            Some(&until) if until > self.clock.now() => Ok(Decision::Ban),
            _ => Ok(Decision::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    struct FixedSource(Result<Decision, String>);

    impl RemediationSource for FixedSource {
        fn decision(&self, _ip: &str) -> Result<Decision, RemediationError> {
            self.0.clone().map_err(RemediationError::Unavailable)
        }
    }

    fn gate(source: FixedSource, template: Option<&str>) -> RemediationGate {
        let config = BounceConfig {
            enabled: true,
            ban_template: template.map(|t| t.to_string()),
        };
        RemediationGate::new(Arc::new(source), &config)
    }

    #[test]
    fn test_decisions_map_to_gate() {
        assert_eq!(
            gate(FixedSource(Ok(Decision::Ban)), None).should_bounce("1.2.3.4"),
            GateDecision::Ban
        );
        assert_eq!(
            gate(FixedSource(Ok(Decision::Allow)), None).should_bounce("1.2.3.4"),
            GateDecision::Allow
        );
        assert_eq!(
            gate(FixedSource(Ok(Decision::Unknown)), None).should_bounce("1.2.3.4"),
            GateDecision::Allow
        );
    }

    #[test]
    fn test_source_error_allows() {
        let gate = gate(FixedSource(Err("timeout".to_string())), None);
        assert_eq!(gate.should_bounce("1.2.3.4"), GateDecision::Allow);
        assert!(gate.bounce("1.2.3.4").is_none());
    }

    #[test]
    fn test_disabled_gate_allows_everything() {
        let config = BounceConfig {
            enabled: false,
            ban_template: None,
        };
        let gate = RemediationGate::new(Arc::new(FixedSource(Ok(Decision::Ban))), &config);
        assert_eq!(gate.should_bounce("1.2.3.4"), GateDecision::Allow);
    }

    #[test]
    fn test_ban_page_rendering() {
        let templated = gate(
            FixedSource(Ok(Decision::Ban)),
            Some("<h1>Access denied for {{ip}}</h1>"),
        );
        let response = templated.bounce("1.2.3.4").unwrap();
        assert_eq!(response.status, 403);
        assert_eq!(response.body, "<h1>Access denied for 1.2.3.4</h1>");

        let fallback = gate(FixedSource(Ok(Decision::Ban)), Some("   "));
        assert_eq!(fallback.bounce("1.2.3.4").unwrap().body, DEFAULT_BAN_BODY);
    }

    #[test]
    fn test_ban_page_never_echoes_unparsed_input() {
        let templated = gate(FixedSource(Ok(Decision::Ban)), Some("<p>{{ip}}</p>"));
        let response = templated.bounce("<script>alert(1)</script>").unwrap();
        assert_eq!(response.body, "<p></p>");

        let response = templated.bounce("2001:db8::1").unwrap();
        assert_eq!(response.body, "<p>2001:db8::1</p>");
    }

    #[test]
    fn test_local_cache_expiry() {
        let clock = Arc::new(MockClock::new(1000));
        let cache = LocalDecisionCache::new(clock.clone());

        cache.ban("1.2.3.4", 60);
        assert_eq!(cache.decision("1.2.3.4").unwrap(), Decision::Ban);
        assert_eq!(cache.decision("5.6.7.8").unwrap(), Decision::Unknown);

        clock.advance(60);
        assert_eq!(cache.decision("1.2.3.4").unwrap(), Decision::Unknown);
        assert_eq!(cache.prune_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_local_cache_keeps_longest_ban() {
        let clock = Arc::new(MockClock::new(1000));
        let cache = LocalDecisionCache::new(clock.clone());

        cache.ban("1.2.3.4", 600);
        cache.ban("1.2.3.4", 10);
        clock.advance(100);
        assert_eq!(cache.decision("1.2.3.4").unwrap(), Decision::Ban);
    }

    #[test]
    fn test_local_cache_clear() {
        let clock = Arc::new(MockClock::new(1000));
        let cache = LocalDecisionCache::new(clock);
        cache.ban("1.2.3.4", 600);
        cache.ban("5.6.7.8", 600);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert_eq!(cache.decision("1.2.3.4").unwrap(), Decision::Unknown);
    }

    #[test]
    fn test_gate_over_local_cache() {
        let clock = Arc::new(MockClock::new(1000));
        let cache = Arc::new(LocalDecisionCache::new(clock));
        let config = BounceConfig {
            enabled: true,
            ban_template: None,
        };
        let gate = RemediationGate::new(cache.clone(), &config);

        assert!(gate.bounce("1.2.3.4").is_none());
        cache.ban("1.2.3.4", 60);
        assert_eq!(gate.bounce("1.2.3.4").unwrap().status, BAN_STATUS_CODE);
    }
}
