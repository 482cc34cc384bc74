//! Telegram bot notification channel.

use async_trait::async_trait;
use serde_json::json;

use super::{AlertChannel, AlertMessage, NotifyError};

pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format!("<b>{}</b>\n\n{}", message.title, message.body);

        self.client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(())
    }
}
