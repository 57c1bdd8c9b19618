use anyhow::Result;
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use serde::{Serialize, Deserialize};
use log::debug;

pub const NO_SUBJECT: &str = "(No Subject)";
pub const UNKNOWN_SENDER: &str = "(Unknown Sender)";
const FALLBACK_FILENAME: &str = "attachment.bin";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub subject: String,
    pub from: String,
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    #[serde(skip)]
    pub content: Vec<u8>,
}

fn attachment_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn is_attachment(part: &ParsedMail) -> bool {
    match part.get_content_disposition().disposition {
        DispositionType::Attachment => true,
        DispositionType::Inline => {
            !part.ctype.mimetype.starts_with("text/") && attachment_filename(part).is_some()
        }
        _ => false,
    }
}

fn walk_parts(
    part: &ParsedMail,
    is_root: bool,
    body: &mut String,
    attachments: &mut Vec<Attachment>,
) -> Result<()> {
    if is_attachment(part) {
        let content = part.get_body_raw()?;
        attachments.push(Attachment {
            filename: attachment_filename(part).unwrap_or_else(|| FALLBACK_FILENAME.to_string()),
            content_type: part.ctype.mimetype.clone(),
            size: content.len(),
            content,
        });
        return Ok(());
    }

    // A single-part message is its own body whatever its type
    if part.subparts.is_empty() {
        if is_root || part.ctype.mimetype == "text/plain" {
            body.push_str(&part.get_body()?);
        } else {
            debug!("Skipping {} part", part.ctype.mimetype);
        }
        return Ok(());
    }

    for subpart in &part.subparts {
        walk_parts(subpart, false, body, attachments)?;
    }
    Ok(())
}

/// Parses a raw RFC 822 message into the fields the dashboard keeps.
pub fn parse_message(raw: &[u8]) -> Result<Message> {
    let parsed_mail = parse_mail(raw)?;

    let subject = parsed_mail
        .headers
        .get_first_value("Subject")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());
    let from = parsed_mail
        .headers
        .get_first_value("From")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let date = parsed_mail.headers.get_first_value("Date");
    let message_id = parsed_mail
        .headers
        .get_first_value("Message-ID")
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let mut content = String::new();
    let mut attachments = Vec::new();
    walk_parts(&parsed_mail, true, &mut content, &mut attachments)?;

    Ok(Message {
        subject,
        from,
        date,
        message_id,
        content,
        attachments,
    })
}
