//! Auth Event Notifier
//! Mission: Tell the rest of the platform about successful logins and signups

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

pub const EVENT_USER_REGISTERED: &str = "USER_REGISTERED";
pub const EVENT_USER_LOGIN: &str = "USER_LOGIN";

/// Payload published after a successful register or login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    pub event_type: String,
    pub timestamp: i64, // epoch millis
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl AuthEvent {
    pub fn new(event_type: &str, user_id: String, email: String, first_name: String, last_name: String) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            user_id,
            email,
            first_name,
            last_name,
        }
    }
}

/// Best-effort event sink. Delivery failures are logged and swallowed; a dead
/// notifier must never fail a login.
#[async_trait]
pub trait AuthEventNotifier: Send + Sync {
    async fn publish(&self, event: AuthEvent);
}

/// Default sink when no webhook is configured: just trace the event.
pub struct LogNotifier;

#[async_trait]
impl AuthEventNotifier for LogNotifier {
    async fn publish(&self, event: AuthEvent) {
        debug!(
            event_type = %event.event_type,
            user_id = %event.user_id,
            "Auth event (no webhook configured)"
        );
    }
}

/// Posts events as JSON to a configured webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, url }
    }
}

#[async_trait]
impl AuthEventNotifier for WebhookNotifier {
    async fn publish(&self, event: AuthEvent) {
        match self.client.post(&self.url).json(&event).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    event_type = %event.event_type,
                    user_id = %event.user_id,
                    "Sent auth event"
                );
            }
            Ok(resp) => {
                warn!(
                    event_type = %event.event_type,
                    status = %resp.status(),
                    "Auth event webhook rejected the event"
                );
            }
            Err(e) => {
                warn!(
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to deliver auth event"
                );
            }
        }
    }
}
