use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::probe::models::EvasionStrategy;

/// Notification sent to listeners when a probe resolves or a query runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ValidationEvent {
    /// A url was validated, or a query result (no url, no strategy).
    #[serde(rename_all = "camelCase")]
    ValidationSucceeded {
        valid_urls: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        valid_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        valid_strategy: Option<EvasionStrategy>,
    },
    /// A url failed validation.
    #[serde(rename_all = "camelCase")]
    ValidationFailed {
        invalid_urls: Vec<String>,
        invalid_url: String,
        invalid_strategy: EvasionStrategy,
    },
}

impl ValidationEvent {
    /// Converts the event to JSON, as printed by the CLI.
    pub fn as_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Destination for validation events.
pub trait MessageSink: Send + Sync {
    /// Delivers `event` to whoever is listening; never blocks, never fails.
    fn publish(&self, event: ValidationEvent);
}

/// In-process pub/sub over `kanal` channels.
///
/// Subscribers only see events published after they subscribed.
#[derive(Default)]
pub struct ChannelSink {
    subscribers: Mutex<Vec<kanal::Sender<ValidationEvent>>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener.
    pub fn subscribe(&self) -> kanal::Receiver<ValidationEvent> {
        let (sender, receiver) = kanal::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sender);
        receiver
    }
}

impl MessageSink for ChannelSink {
    fn publish(&self, event: ValidationEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Dropped receivers close their channel; forget them.
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Publishes validation events to a [`MessageSink`]. Holds no state.
#[derive(Clone)]
pub struct ResultBroadcaster {
    sink: Arc<dyn MessageSink>,
}

impl ResultBroadcaster {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Announces a newly validated url along with every valid url so far.
    pub fn publish_success(&self, all_valid: Vec<String>, url: &str, strategy: EvasionStrategy) {
        self.sink.publish(ValidationEvent::ValidationSucceeded {
            valid_urls: all_valid,
            valid_url: Some(url.to_string()),
            valid_strategy: Some(strategy),
        });
    }

    /// Announces a failed url along with every invalid url so far.
    pub fn publish_failure(&self, all_invalid: Vec<String>, url: &str, strategy: EvasionStrategy) {
        self.sink.publish(ValidationEvent::ValidationFailed {
            invalid_urls: all_invalid,
            invalid_url: url.to_string(),
            invalid_strategy: strategy,
        });
    }

    /// Answers a query with the current valid list.
    pub fn publish_query_result(&self, all_valid: Vec<String>) {
        self.sink.publish(ValidationEvent::ValidationSucceeded {
            valid_urls: all_valid,
            valid_url: None,
            valid_strategy: None,
        });
    }
}
