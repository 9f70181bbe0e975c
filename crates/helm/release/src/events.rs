//! Release event notification
//!
//! Events go to a local broadcast channel and, when configured, to an
//! external sink. Delivery never fails a pass.

use async_trait::async_trait;
use helm_types::{EventSeverity, ReleaseEvent, ReleaseIdentity};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum EventSinkError {
    #[error("event delivery failed: {0}")]
    Delivery(String),
}

/// External recipient of release events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &ReleaseEvent) -> Result<(), EventSinkError>;

    fn name(&self) -> &str;
}

/// Posts events as JSON to an external recorder
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: reqwest::Client,
    address: String,
}

impl HttpEventSink {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            address: address.into(),
        }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn emit(&self, event: &ReleaseEvent) -> Result<(), EventSinkError> {
        let response = self
            .client
            .post(&self.address)
            .json(event)
            .send()
            .await
            .map_err(|e| EventSinkError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EventSinkError::Delivery(format!(
                "{} responded with {}",
                self.address,
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

pub struct EventNotifier {
    event_tx: broadcast::Sender<ReleaseEvent>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { event_tx, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReleaseEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event, tagged with the artifact revision when known
    pub async fn notify(
        &self,
        subject: &ReleaseIdentity,
        revision: Option<&str>,
        severity: EventSeverity,
        message: impl Into<String>,
    ) {
        let event = ReleaseEvent::new(subject.clone(), severity, message).with_revision(revision);

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.emit(&event).await {
                warn!(
                    release = %subject,
                    sink = sink.name(),
                    error = %e,
                    "Failed to deliver event"
                );
            }
        }

        debug!(release = %subject, severity = ?severity, message = %event.message, "Release event");
        let _ = self.event_tx.send(event);
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}
