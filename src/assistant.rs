pub mod classifier;
pub mod reply;

use anyhow::Result;

use crate::mail_reader::Message;
use crate::settings::{AssistantConfig, ReplyMode};
use classifier::HostedClassifier;

const CLASSIFIER_BODY_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub category: Option<String>,
    pub reply: String,
}

enum Categorizer {
    Snippet,
    Hosted(HostedClassifier),
}

/// Produces the category and reply text logged for each message.
pub struct Assistant {
    config: AssistantConfig,
    categorizer: Categorizer,
}

impl Assistant {
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let categorizer = match config.reply {
            ReplyMode::Snippet => Categorizer::Snippet,
            ReplyMode::Hosted => Categorizer::Hosted(HostedClassifier::new(config.classifier.clone())?),
        };
        Ok(Assistant {
            config: config.clone(),
            categorizer,
        })
    }

    pub fn snippet_reply(&self, message: &Message) -> String {
        let summary = reply::summarize(&message.content, self.config.snippet_len);
        reply::render_reply(&self.config.reply_template, &message.from, &message.subject, &summary)
    }

    pub async fn assess(&self, message: &Message) -> Result<Assessment> {
        let reply = self.snippet_reply(message);
        match &self.categorizer {
            Categorizer::Snippet => Ok(Assessment { category: None, reply }),
            Categorizer::Hosted(classifier) => {
                let text = format!(
                    "{} {}",
                    message.subject,
                    reply::head(&message.content, CLASSIFIER_BODY_CHARS)
                );
                let category = classifier.classify(&text).await?;
                Ok(Assessment {
                    reply: format!("[{}] {}", category, reply),
                    category: Some(category),
                })
            }
        }
    }
}
