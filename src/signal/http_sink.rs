//! JSON-over-HTTP signal sink
//!
//! Uses the blocking reqwest client: pushes run on the batcher thread, off
//! any async runtime.

use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Signal, SignalSink, TransportError};
use crate::config::SinkConfig;

#[derive(Serialize)]
struct SignalBatch<'a> {
    machine_id: &'a str,
    signals: &'a [Signal],
}

pub struct HttpSignalSink {
    client: Client,
    url: String,
    machine_id: String,
    api_key: Option<String>,
}

impl HttpSignalSink {
    pub fn new(
        url: &str,
        machine_id: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpSignalSink {
            client,
            url: url.to_string(),
            machine_id: machine_id.to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, TransportError> {
        let url = config.url.as_deref().unwrap_or_default();
        Self::new(
            url,
            &config.machine_id,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }
}

impl SignalSink for HttpSignalSink {
    fn push(&self, signals: &[Signal]) -> Result<(), TransportError> {
        let batch = SignalBatch {
            machine_id: &self.machine_id,
            signals,
        };

        let mut request = self.client.post(&self.url).json(&batch);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("Collector accepted {} signal(s)", signals.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = SinkConfig {
            kind: "http".to_string(),
            url: Some("http://127.0.0.1:9/signals".to_string()),
            machine_id: "web-01".to_string(),
            api_key: Some("secret".to_string()),
            timeout_seconds: 5,
            file_path: None,
            format: "jsonl".to_string(),
        };

        let sink = HttpSignalSink::from_config(&config).unwrap();
        assert_eq!(sink.url, "http://127.0.0.1:9/signals");
        assert_eq!(sink.machine_id, "web-01");
    }

    #[test]
    fn test_unreachable_collector_is_transport_error() {
        // Port 9 (discard) is not expected to accept HTTP on loopback
        let sink = HttpSignalSink::new(
            "http://127.0.0.1:9/signals",
            "web-01",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let signal = Signal::for_ip("1.2.3.4", "crowdsec-page-scan", 0, "", 60).unwrap();

        assert!(matches!(sink.push(&[signal]), Err(TransportError::Http(_))));
    }

    #[test]
    fn test_batch_payload_shape() {
        let signal = Signal::for_ip("1.2.3.4", "crowdsec-page-scan", 0, "", 60).unwrap();
        let signals = [signal];
        let batch = SignalBatch {
            machine_id: "web-01",
            signals: &signals,
        };

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["machine_id"], "web-01");
        assert_eq!(json["signals"][0]["scenario"], "crowdsec-page-scan");
    }
}
