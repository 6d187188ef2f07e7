pub mod alerting;
pub mod clock;
pub mod config;
pub mod detection;
pub mod input;
pub mod models;
pub mod output;
pub mod persistence;
pub mod remediation;
pub mod signal;

// Re-export commonly used types
pub use alerting::{AlertDispatcher, AlertNotifier, AlertQueue, AlertTriggered};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use detection::{EventAggregator, ScenarioEngine, ScenarioRegistry, ScenarioSpec};
pub use models::{Event, EventStatus, HttpExchange};
pub use persistence::{EventStore, PushCursor, SqliteEventStore};
pub use remediation::{LocalDecisionCache, RemediationGate};
pub use signal::{PushReport, Signal, SignalBatcher, SignalSink};
