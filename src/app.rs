use anyhow::Result;

use crate::assistant::Assistant;
use crate::auth::{AuthStore, SessionStore};
use crate::log_store::LogStore;
use crate::mail_reader::attachments::AttachmentStore;
use crate::mail_reader::Credentials;
use crate::notifier::Notifier;
use crate::settings::{self, Config};

/// Everything a request handler or a one-shot run needs.
pub struct App {
    pub config: Config,
    pub credentials: Credentials,
    pub log: LogStore,
    pub attachments: AttachmentStore,
    pub assistant: Assistant,
    pub notifier: Notifier,
    pub auth: AuthStore,
    pub sessions: SessionStore,
}

impl App {
    pub async fn new(config: Config, credentials: Credentials) -> Result<Self> {
        let assistant = Assistant::from_config(&config.assistant)?;
        let notifier = Notifier::from_config(&config.notifier, settings::is_hosted())?;
        let auth = AuthStore::open(
            config.storage.auth_file.clone(),
            &config.auth.default_pin,
            config.auth.otp_ttl_secs,
        )
        .await?;

        Ok(App {
            log: LogStore::new(config.storage.log_file.clone()),
            attachments: AttachmentStore::new(config.storage.attachments_dir.clone()),
            sessions: SessionStore::new(config.auth.session_ttl_secs),
            assistant,
            notifier,
            auth,
            credentials,
            config,
        })
    }
}
