use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use opsgate_core::config::NotificationsConfig;
use opsgate_core::notify::WorkflowNotification;
use opsgate_engine::{NotificationSink, SinkError};

/// Posts workflow notifications to the configured webhook as JSON. Delivery
/// is best effort: the engine has already committed the decision by the time
/// this runs, so failures surface as sink errors and nothing more.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    bearer_token: Option<SecretString>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, config: &NotificationsConfig) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
            bearer_token: config.bearer_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn publish(&self, notification: &WorkflowNotification) -> Result<(), SinkError> {
        let mut request =
            self.client.post(&self.webhook_url).timeout(self.timeout).json(notification);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| SinkError(format!("webhook request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError(format!("webhook endpoint returned {status}")));
        }

        debug!(
            workflow_id = %notification.workflow_id.0,
            status = status.as_u16(),
            "workflow notification delivered"
        );
        Ok(())
    }
}
