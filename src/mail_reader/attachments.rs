use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use regex::Regex;
use log::info;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::mail_reader::message::Attachment;

const UNNAMED: &str = "attachment.bin";

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).expect("valid regex"))
}

/// Reduces a sender-supplied filename to a single safe path component.
pub fn sanitize_filename(name: &str) -> String {
    // Keep only the last component of whatever path the sender supplied
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = unsafe_chars().replace_all(base, "_");
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        UNNAMED.to_string()
    } else {
        cleaned.to_string()
    }
}

fn numbered(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &name[..dot], n, &name[dot..]),
        _ => format!("{} ({})", name, n),
    }
}

/// Directory-backed storage for downloaded attachments.
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AttachmentStore { dir: dir.into() }
    }

    /// Writes the attachment, picking `name (n).ext` when `name.ext` is taken.
    pub async fn save(&self, attachment: &Attachment) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let name = sanitize_filename(&attachment.filename);

        let mut n = 0;
        loop {
            let candidate = if n == 0 { name.clone() } else { numbered(&name, n) };
            let path = self.dir.join(&candidate);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    file.write_all(&attachment.content).await?;
                    file.flush().await?;
                    info!("-- saved attachment {} ({} bytes)", path.display(), attachment.size);
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn save_all(&self, attachments: &[Attachment]) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            paths.push(self.save(attachment).await?);
        }
        Ok(paths)
    }
}
