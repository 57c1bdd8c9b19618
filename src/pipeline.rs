use anyhow::Result;
use serde::Serialize;
use log::{debug, info, warn};

use crate::app::App;
use crate::log_store::{now_timestamp, DedupKey, LogRecord};
use crate::mail_reader::{self, Message};

#[derive(Debug, Default, Serialize)]
pub struct ProcessReport {
    pub fetched: usize,
    pub records: Vec<LogRecord>,
    pub duplicates: usize,
    pub notify_failures: Vec<String>,
    pub errors: Vec<String>,
}

async fn build_record(app: &App, message: &Message, report: &mut ProcessReport) -> Result<LogRecord> {
    let saved = app.attachments.save_all(&message.attachments).await?;

    let (category, reply) = match app.assistant.assess(message).await {
        Ok(assessment) => (assessment.category, assessment.reply),
        Err(e) => {
            warn!("Classification failed for {}: {}", message.subject, e);
            report.errors.push(format!("{}: classification failed: {}", message.subject, e));
            (None, app.assistant.snippet_reply(message))
        }
    };

    Ok(LogRecord {
        timestamp: now_timestamp(),
        sender: message.from.clone(),
        subject: message.subject.clone(),
        reply,
        attachments: saved.iter().map(|p| p.display().to_string()).collect(),
        category,
        message_id: message.message_id.clone(),
        received: message.date.clone(),
    })
}

/// Turns fetched messages into log records, notifies, and saves them.
pub async fn process_messages(app: &App, messages: &[Message]) -> Result<ProcessReport> {
    let mut report = ProcessReport {
        fetched: messages.len(),
        ..Default::default()
    };

    // Already-logged messages are dropped before their attachments are written
    let mut known = app.log.known_keys().await?;
    let mut records = Vec::with_capacity(messages.len());
    for message in messages {
        let key = DedupKey::new(
            message.message_id.as_deref(),
            &message.from,
            &message.subject,
            message.date.as_deref(),
        );
        if !known.insert(key) {
            debug!("Skipping already logged {}", message.subject);
            report.duplicates += 1;
            continue;
        }
        match build_record(app, message, &mut report).await {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Could not process {}: {}", message.subject, e);
                report.errors.push(format!("{}: {}", message.subject, e));
            }
        }
    }

    let (outcome, added) = app.log.append(&records).await?;
    report.duplicates += outcome.duplicates;

    for record in &added {
        if let Err(e) = app.notifier.notify(record).await {
            warn!("Notification failed for {}: {}", record.subject, e);
            report.notify_failures.push(format!("{}: {}", record.subject, e));
        }
    }
    report.records = added;

    info!(
        "-- processed {} messages: {} logged, {} duplicates, {} errors",
        report.fetched,
        report.records.len(),
        report.duplicates,
        report.errors.len()
    );
    Ok(report)
}

pub async fn process_unread(app: &App) -> Result<ProcessReport> {
    let messages = mail_reader::fetch_unread(&app.config.imap, &app.credentials).await?;
    process_messages(app, &messages).await
}
