//! Webhook alert delivery

use crate::error::ServiceResult;
use heartbeat_core::{AlertTransport, DowntimeAlert};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// JSON body posted to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    /// Human readable summary, for chat-style receivers
    pub text: String,
    /// The alert itself, inlined
    #[serde(flatten)]
    pub alert: DowntimeAlert,
}

impl From<DowntimeAlert> for AlertPayload {
    fn from(alert: DowntimeAlert) -> Self {
        Self {
            text: alert.message(),
            alert,
        }
    }
}

/// Posts each alert to a webhook from a background task.
///
/// Delivery is attempted once; failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct WebhookAlerter {
    client: Client,
    url: String,
}

impl WebhookAlerter {
    /// Create an alerter posting to `url`
    pub fn new(url: impl Into<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Deliver one alert, waiting for the response
    pub async fn deliver(&self, alert: DowntimeAlert) -> ServiceResult<()> {
        let payload = AlertPayload::from(alert);
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        debug!("delivered alert: {}", payload.text);
        Ok(())
    }
}

impl AlertTransport for WebhookAlerter {
    fn notify(&self, alert: DowntimeAlert) {
        let alerter = self.clone();
        tokio::spawn(async move {
            let validator = alert.validator.clone();
            if let Err(e) = alerter.deliver(alert).await {
                warn!("alert for {} not delivered: {}", validator, e);
            }
        });
    }
}
