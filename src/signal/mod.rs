//! Outbound signals
//!
//! A signal describes one offending address for one scenario. Sinks turn
//! events into signals and deliver them to a collector in batches.

pub mod batcher;
pub mod http_sink;

pub use batcher::{PushReport, SignalBatcher};
pub use http_sink::HttpSignalSink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

use crate::models::is_valid_scenario_name;

/// A single event could not be turned into a signal
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuildError {
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    #[error("Invalid scenario name: {0}")]
    InvalidScenario(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// A whole batch could not be delivered
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collector rejected signals with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Offending address reported to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ip: IpAddr,
    pub scenario: String,
    /// Time of the last occurrence that made up the alert
    pub start_at: DateTime<Utc>,
    pub message: String,
    /// Suggested remediation duration in seconds
    pub duration: i64,
}

impl Signal {
    pub fn for_ip(
        ip: &str,
        scenario: &str,
        timestamp: i64,
        note: &str,
        duration: i64,
    ) -> Result<Self, BuildError> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| BuildError::InvalidIp(ip.to_string()))?;
        if !is_valid_scenario_name(scenario) {
            return Err(BuildError::InvalidScenario(scenario.to_string()));
        }
        if duration <= 0 {
            return Err(BuildError::InvalidDuration(duration.to_string()));
        }
        let start_at =
            DateTime::from_timestamp(timestamp, 0).ok_or(BuildError::InvalidTimestamp(timestamp))?;

        Ok(Signal {
            ip,
            scenario: scenario.to_string(),
            start_at,
            message: note.to_string(),
            duration,
        })
    }
}

/// Destination for signals
pub trait SignalSink: Send + Sync {
    fn build_signal(
        &self,
        ip: &str,
        scenario: &str,
        timestamp: i64,
        note: &str,
        duration: i64,
    ) -> Result<Signal, BuildError> {
        Signal::for_ip(ip, scenario, timestamp, note, duration)
    }

    /// Deliver a batch; any error means none of it is considered delivered
    fn push(&self, signals: &[Signal]) -> Result<(), TransportError>;
}
