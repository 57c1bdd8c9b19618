use serde::Deserialize;

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use backtrace::Backtrace;
use log::error;

pub const DEFAULT_SETTINGS_PATH: &str = "resources/settings.yaml";

pub const DEFAULT_LABELS: [&str; 7] = [
    "Work", "Finance", "Promotions", "Personal", "Urgent", "Education", "Newsletter",
];

// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    #[serde(default = "default_imap_server")]
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub from: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            server: default_smtp_server(),
            port: default_smtp_port(),
            from: None,
        }
    }
}

// Dashboard server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub log_file: PathBuf,
    pub attachments_dir: PathBuf,
    pub auth_file: PathBuf,
    pub templates: String,
    pub secret_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            log_file: PathBuf::from("email_log.json"),
            attachments_dir: PathBuf::from("attachments"),
            auth_file: PathBuf::from("auth.json"),
            templates: "templates/**/*.html".to_string(),
            secret_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    #[default]
    Snippet,
    Hosted,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssistantConfig {
    pub reply: ReplyMode,
    pub snippet_len: usize,
    pub reply_template: String,
    pub classifier: ClassifierConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        AssistantConfig {
            reply: ReplyMode::Snippet,
            snippet_len: 300,
            reply_template: "Hi {sender}, thanks for your email about \"{subject}\". Summary: {summary}"
                .to_string(),
            classifier: ClassifierConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub labels: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            api_url: String::new(),
            api_token: None,
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub recipient: String,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig {
            enabled: false,
            webhook_url: String::new(),
            recipient: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub default_pin: String,
    pub otp_ttl_secs: i64,
    pub session_ttl_secs: i64,
    pub recovery_email: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            default_pin: "1234".to_string(),
            otp_ttl_secs: 300,
            session_ttl_secs: 3600,
            recovery_email: None,
        }
    }
}

fn default_imap_server() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

impl Config {
    /// Address one-time passwords are sent from.
    pub fn smtp_from(&self) -> &str {
        self.smtp.from.as_deref().unwrap_or(&self.imap.username)
    }

    pub fn recovery_email(&self) -> &str {
        self.auth.recovery_email.as_deref().unwrap_or(&self.imap.username)
    }

    /// Overlays the hosted-secret environment variables onto the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(env_value);
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(email) = lookup("GMAIL_EMAIL") {
            self.imap.username = email;
        }
        if let Some(password) = lookup("GMAIL_APP_PASS") {
            self.imap.password = Some(password);
        }
        if let Some(pin) = lookup("APP_PIN") {
            self.auth.default_pin = pin;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.imap.username.trim().is_empty() {
            bail!("Gmail credentials missing: imap.username is empty");
        }
        if self.assistant.reply == ReplyMode::Hosted && self.assistant.classifier.api_url.trim().is_empty() {
            bail!("assistant.reply is 'hosted' but assistant.classifier.api_url is not set");
        }
        if self.notifier.enabled && self.notifier.webhook_url.trim().is_empty() {
            bail!("notifier is enabled but notifier.webhook_url is not set");
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// True when running in a hosted context where chat notifications must stay off.
pub fn is_hosted() -> bool {
    hosted_flag(env::var("SMARTDESK_HOSTED").ok().as_deref())
}

pub fn hosted_flag(value: Option<&str>) -> bool {
    match value {
        Some(value) => {
            let value = value.trim().to_lowercase();
            !value.is_empty() && value != "0" && value != "false"
        }
        None => false,
    }
}

pub fn parse_settings(yaml: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}

pub fn load_settings(path: &Path) -> Result<Config> {
    // Open the YAML file
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            error!("Error: {}", err);

            // Capture and print the backtrace
            let backtrace = Backtrace::new();
            error!("Backtrace:\n{:?}", backtrace);
            return Err(err).with_context(|| format!("Cannot find settings at {}", path.display()));
        }
    };

    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    let mut config: Config = match serde_yaml::from_reader(reader) {
        Ok(config) => config,
        Err(err) => {
            error!("Error: {}", err);

            let backtrace = Backtrace::new();
            error!("Backtrace:\n{:?}", backtrace);
            return Err(err).with_context(|| format!("Cannot deserialize settings at {}", path.display()));
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
