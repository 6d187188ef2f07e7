//! Alert notification
//!
//! The aggregator publishes an [`AlertTriggered`] through the
//! [`AlertNotifier`] trait whenever a bucket overflows. The default
//! notifier is a bounded tokio channel drained by [`AlertDispatcher`],
//! which applies a local ban and forwards the alert to webhooks.

use crate::config::{AlertConfig, WebhookConfig};
use crate::models::Event;
use crate::remediation::LocalDecisionCache;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 100;

/// Errors that can occur during alert dispatch
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook {name} returned status {status}")]
    Status { name: String, status: u16 },
}

/// A bucket overflowed for some (ip, scenario)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertTriggered {
    pub event: Event,
    pub scenario: String,
    /// Seconds the offender should be remediated for
    pub duration: i64,
}

/// Receiver of triggered alerts
///
/// Implementations must not block: they are called inline on the request
/// path.
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, alert: AlertTriggered);
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl AlertNotifier for NullNotifier {
    fn notify(&self, alert: AlertTriggered) {
        log::debug!("Alert for {} on {} discarded", alert.event.ip, alert.scenario);
    }
}

/// Synchronous handle onto the alert channel
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<AlertTriggered>,
}

impl AlertQueue {
    pub fn new(tx: mpsc::Sender<AlertTriggered>) -> Self {
        AlertQueue { tx }
    }

    /// Create a queue and the receiver the dispatcher will drain
    pub fn channel() -> (Self, mpsc::Receiver<AlertTriggered>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (AlertQueue::new(tx), rx)
    }

}

impl AlertNotifier for AlertQueue {
    /// Non-blocking; a full or closed queue drops the alert with a warning
    fn notify(&self, alert: AlertTriggered) {
        if let Err(e) = self.tx.try_send(alert) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    log::warn!("Alert queue full, dropping alert");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Alert queue closed");
                }
            }
        }
    }
}

/// Consumer side of the alert channel
pub struct AlertDispatcher {
    config: AlertConfig,
    client: Client,
    local_bans: Option<Arc<LocalDecisionCache>>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig, local_bans: Option<Arc<LocalDecisionCache>>) -> Self {
        AlertDispatcher {
            config,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            local_bans,
        }
    }

    /// Drain the channel until every sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<AlertTriggered>) {
        log::info!("Alert dispatcher started");

        while let Some(alert) = rx.recv().await {
            if !self.config.enabled {
                continue;
            }

            log::info!(
                "Alert triggered: {} on {} (count {})",
                alert.event.ip,
                alert.scenario,
                alert.event.count
            );

            self.apply_local_ban(&alert);

            for webhook in &self.config.webhooks {
                if let Err(e) = self.send_webhook(webhook, &alert).await {
                    log::error!("Webhook {} failed: {}", webhook.name, e);
                }
            }
        }

        log::info!("Alert dispatcher stopped");
    }

    fn apply_local_ban(&self, alert: &AlertTriggered) {
        if !self.config.local_ban {
            return;
        }
        if let Some(ref bans) = self.local_bans {
            bans.ban(&alert.event.ip, alert.duration);
        }
    }

    async fn send_webhook(
        &self,
        config: &WebhookConfig,
        alert: &AlertTriggered,
    ) -> Result<(), AlertError> {
        let method = config.method.as_deref().unwrap_or("POST");

        let mut request = match method.to_uppercase().as_str() {
            "PUT" => self.client.put(&config.url),
            _ => self.client.post(&config.url),
        };

        if let Some(ref headers) = config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(alert).send().await?;

        if !response.status().is_success() {
            return Err(AlertError::Status {
                name: config.name.clone(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}
