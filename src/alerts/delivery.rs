//! Push delivery for alerts.
//!
//! Delivery runs on a dedicated worker thread fed by a channel so the
//! detection loop never waits on the network. A failed push is logged and
//! dropped; the alert stays in history with `sent = false`.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{ArgosError, Result};

use super::{Alert, AlertPriority};

/// What a push collaborator receives.
#[derive(Clone, Debug, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub priority: AlertPriority,
    pub tags: Vec<String>,
}

impl PushMessage {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            title: alert.title.clone(),
            body: alert.message.clone(),
            priority: alert.priority,
            tags: vec![alert.zone_type.as_str().to_string(), "argos".to_string()],
        }
    }
}

/// Push-notification collaborator.
pub trait AlertSink: Send {
    fn push(&mut self, message: &PushMessage) -> Result<()>;

    fn name(&self) -> &str;
}

/// Writes alerts to the log. Used when no push service is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn push(&mut self, message: &PushMessage) -> Result<()> {
        log::info!(
            "alert [{}] {}: {}",
            message.priority.as_str(),
            message.title,
            message.body
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Posts to an ntfy server: `POST {server}/{topic}` with the body as
/// plain text and Title/Priority/Tags headers.
#[cfg(feature = "notify-ntfy")]
pub struct NtfySink {
    url: String,
    agent: ureq::Agent,
}

#[cfg(feature = "notify-ntfy")]
impl NtfySink {
    pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

    pub fn new(server: &str, topic: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Self::REQUEST_TIMEOUT)
            .build();
        Self {
            url: format!("{}/{}", server.trim_end_matches('/'), topic),
            agent,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "notify-ntfy")]
impl AlertSink for NtfySink {
    fn push(&mut self, message: &PushMessage) -> Result<()> {
        let response = self
            .agent
            .post(&self.url)
            .set("Title", &message.title)
            .set("Priority", &message.priority.ntfy_level().to_string())
            .set("Tags", &message.tags.join(","))
            .send_string(&message.body)
            .map_err(|e| ArgosError::AlertDelivery(format!("POST {}: {}", self.url, e)))?;
        if response.status() != 200 {
            return Err(ArgosError::AlertDelivery(format!(
                "POST {} returned status {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ntfy"
    }
}

/// Background delivery worker.
///
/// Dropping the dispatcher closes the channel and waits for queued alerts
/// to drain.
pub struct AlertDispatcher {
    tx: Option<Sender<Alert>>,
    join: Option<JoinHandle<()>>,
}

impl AlertDispatcher {
    /// Start the worker. Successful pushes mark the matching alert in
    /// `history` as sent.
    pub fn spawn(
        mut sink: Box<dyn AlertSink>,
        history: Arc<Mutex<VecDeque<Alert>>>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Alert>();
        let sink_name = sink.name().to_string();
        let join = std::thread::Builder::new()
            .name(format!("alerts-{}", sink_name))
            .spawn(move || {
                for alert in rx {
                    match sink.push(&PushMessage::from_alert(&alert)) {
                        Ok(()) => {
                            mark_sent(&history, &alert.id);
                            log::debug!("alert {} delivered via {}", alert.id, sink.name());
                        }
                        Err(err) => log::warn!("alert {} not delivered: {}", alert.id, err),
                    }
                }
            })
            .map_err(|e| ArgosError::AlertDelivery(format!("spawn delivery worker: {}", e)))?;
        log::info!("alert delivery via {}", sink_name);
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
        })
    }

    /// Queue an alert. Returns false if the worker has stopped.
    pub fn submit(&self, alert: Alert) -> bool {
        match &self.tx {
            Some(tx) => tx.send(alert).is_ok(),
            None => false,
        }
    }

    /// Close the queue and wait for pending deliveries.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("alert delivery worker panicked");
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mark_sent(history: &Mutex<VecDeque<Alert>>, alert_id: &str) {
    let mut history = match history.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(alert) = history.iter_mut().rev().find(|a| a.id == alert_id) {
        alert.sent = true;
    }
}
