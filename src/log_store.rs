use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use log::{debug, info};

/// One processed email, as persisted in the log file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub sender: String,
    pub subject: String,
    pub reply: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    MessageId(String),
    Fallback {
        sender: String,
        subject: String,
        received: Option<String>,
    },
}

impl DedupKey {
    /// Message-ID when the sender supplied one, else sender + subject + Date.
    pub fn new(message_id: Option<&str>, sender: &str, subject: &str, received: Option<&str>) -> Self {
        match message_id {
            Some(id) => DedupKey::MessageId(id.to_string()),
            None => DedupKey::Fallback {
                sender: sender.to_string(),
                subject: subject.to_string(),
                received: received.map(str::to_string),
            },
        }
    }
}

impl LogRecord {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            self.message_id.as_deref(),
            &self.sender,
            &self.subject,
            self.received.as_deref(),
        )
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub added: usize,
    pub duplicates: usize,
}

/// Flat JSON-array log. Saves are serialized and written via rename.
pub struct LogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<LogRecord>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data)
            .with_context(|| format!("Malformed log file {}", self.path.display()))
    }

    pub async fn known_keys(&self) -> Result<HashSet<DedupKey>> {
        Ok(self.load().await?.iter().map(LogRecord::dedup_key).collect())
    }

    /// Appends the records that are not already logged, returning what was kept.
    pub async fn append(&self, records: &[LogRecord]) -> Result<(AppendOutcome, Vec<LogRecord>)> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.load().await?;
        let mut seen: HashSet<DedupKey> = all.iter().map(LogRecord::dedup_key).collect();
        let mut outcome = AppendOutcome::default();
        let mut added = Vec::new();

        for record in records {
            if seen.insert(record.dedup_key()) {
                added.push(record.clone());
            } else {
                debug!("Already logged: {} / {}", record.sender, record.subject);
                outcome.duplicates += 1;
            }
        }
        outcome.added = added.len();

        if !added.is_empty() {
            all.extend(added.iter().cloned());
            self.write_all(&all).await?;
            info!("-- logged {} new records ({} total)", outcome.added, all.len());
        }
        Ok((outcome, added))
    }

    async fn write_all(&self, records: &[LogRecord]) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(records)?).await
    }
}

/// Writes `data` beside `path` and renames it over, so readers never see a partial file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(sender: &str, subject: &str, id: Option<&str>) -> LogRecord {
        LogRecord {
            timestamp: "2025-10-06T10:00:00Z".to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            reply: format!("re: {}", subject),
            attachments: vec!["attachments/a.pdf".to_string()],
            category: None,
            message_id: id.map(str::to_string),
            received: None,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("log.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_round_trip_through_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let written = vec![record("a@x.com", "Hello", Some("<1@x>")), record("b@x.com", "Ünïcode ✓", None)];

        let (outcome, _) = LogStore::new(&path).append(&written).await.unwrap();
        assert_eq!(outcome, AppendOutcome { added: 2, duplicates: 0 });

        let reloaded = LogStore::new(&path).load().await.unwrap();
        assert_eq!(reloaded, written);
    }

    #[tokio::test]
    async fn same_sender_and_subject_with_distinct_ids_are_both_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("log.json"));
        let (outcome, _) = store
            .append(&[record("a@x.com", "Invoice", Some("<1@x>")), record("a@x.com", "Invoice", Some("<2@x>"))])
            .await
            .unwrap();
        assert_eq!(outcome.added, 2);
    }

    #[tokio::test]
    async fn same_message_id_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("log.json"));
        store.append(&[record("a@x.com", "Invoice", Some("<1@x>"))]).await.unwrap();
        let (outcome, added) = store.append(&[record("a@x.com", "Invoice", Some("<1@x>"))]).await.unwrap();
        assert_eq!(outcome, AppendOutcome { added: 0, duplicates: 1 });
        assert!(added.is_empty());
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::new(dir.path().join("log.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let id = format!("<{}@x>", i);
                    store.append(&[record("a@x.com", "Same", Some(&id))]).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn known_keys_match_logged_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("log.json"));
        store.append(&[record("a@x.com", "Hello", Some("<1@x>")), record("b@x.com", "Hi", None)]).await.unwrap();

        let keys = store.known_keys().await.unwrap();
        assert!(keys.contains(&DedupKey::new(Some("<1@x>"), "other", "other", None)));
        assert!(keys.contains(&DedupKey::new(None, "b@x.com", "Hi", None)));
        assert!(!keys.contains(&DedupKey::new(None, "b@x.com", "Hi", Some("Mon, 6 Oct 2025"))));
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"[]").await.unwrap();
        write_atomic(&path, b"[1]").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"[1]");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(LogStore::new(&path).load().await.is_err());
    }
}
