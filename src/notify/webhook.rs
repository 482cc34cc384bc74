//! Generic JSON webhook notification channel.
//!
//! Posts the alert as `{title, body, severity}` to a configured URL.

use async_trait::async_trait;

use super::{AlertChannel, AlertMessage, NotifyError};

pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(())
    }
}
