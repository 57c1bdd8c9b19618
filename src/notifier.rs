use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Duration;
use log::{debug, info};

use crate::log_store::LogRecord;
use crate::settings::NotifierConfig;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    recipient: &'a str,
    text: &'a str,
}

pub fn notification_text(record: &LogRecord) -> String {
    let mut text = format!("New email from {}\nSubject: {}\n\n{}", record.sender, record.subject, record.reply);
    if !record.attachments.is_empty() {
        text.push_str(&format!("\n\n{} attachment(s) saved", record.attachments.len()));
    }
    text
}

/// Forwards generated replies to a chat webhook; best effort, no retry.
pub enum Notifier {
    Disabled,
    Webhook {
        client: reqwest::Client,
        url: String,
        recipient: String,
    },
}

impl Notifier {
    pub fn from_config(config: &NotifierConfig, hosted: bool) -> Result<Self> {
        if !config.enabled || hosted {
            info!("-- chat notifications disabled");
            return Ok(Notifier::Disabled);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Notifier::Webhook {
            client,
            url: config.webhook_url.clone(),
            recipient: config.recipient.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Notifier::Webhook { .. })
    }

    pub async fn notify(&self, record: &LogRecord) -> Result<()> {
        match self {
            Notifier::Disabled => {
                debug!("Notification skipped for {}", record.subject);
                Ok(())
            }
            Notifier::Webhook { client, url, recipient } => {
                let text = notification_text(record);
                let response = client
                    .post(url)
                    .json(&ChatMessage { recipient, text: &text })
                    .send()
                    .await?;
                if !response.status().is_success() {
                    bail!("Chat webhook returned {}", response.status());
                }
                debug!("Notification sent for {}", record.subject);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> NotifierConfig {
        NotifierConfig {
            enabled: true,
            webhook_url: "http://127.0.0.1:9/hook".to_string(),
            recipient: "+10000000000".to_string(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn hosted_flag_disables_dispatch() {
        assert!(!Notifier::from_config(&enabled_config(), true).unwrap().is_enabled());
        assert!(Notifier::from_config(&enabled_config(), false).unwrap().is_enabled());
        assert!(!Notifier::from_config(&NotifierConfig::default(), false).unwrap().is_enabled());
    }

    #[test]
    fn text_mentions_attachments() {
        let record = LogRecord {
            sender: "a@x.com".into(),
            subject: "Docs".into(),
            reply: "thanks".into(),
            attachments: vec!["attachments/a.pdf".into()],
            ..Default::default()
        };
        let text = notification_text(&record);
        assert!(text.contains("a@x.com"));
        assert!(text.contains("1 attachment(s)"));
    }

    #[tokio::test]
    async fn disabled_notifier_is_a_no_op() {
        Notifier::Disabled.notify(&LogRecord::default()).await.unwrap();
    }
}
