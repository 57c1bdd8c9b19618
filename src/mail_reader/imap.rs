use anyhow::Result;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::mail_reader::encryption::Credentials;
use crate::mail_reader::message::{parse_message, Message};
use crate::settings::ImapConfig;
use log::{info, warn};

type ImapStream = Compat<tokio_native_tls::TlsStream<TcpStream>>;
pub type ImapSession = Session<ImapStream>;

// Establish a TLS-encrypted connection to the IMAP server
async fn connect_to_server(server: &str, port: u16) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
    let imap_addr = (server, port);
    let tcp_stream = TcpStream::connect(imap_addr).await?;
    let tls = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
    let tls_stream = tls.connect(server, tcp_stream).await?;

    info!("-- connected to {}:{}", server, port);
    Ok(tls_stream)
}

// Login to the IMAP server and return an authenticated session
async fn login_to_server(
    client: Client<ImapStream>,
    username: &str,
    password: &str,
) -> Result<ImapSession> {
    let imap_session = client
        .login(username, password)
        .await
        .map_err(|e| e.0)?;

    info!("-- logged in as {}", username);
    Ok(imap_session)
}

pub async fn create_session(imap: &ImapConfig, credentials: &Credentials) -> Result<ImapSession> {
    let tls_stream = connect_to_server(&imap.server, imap.port).await?;
    let client = Client::new(tls_stream.compat());
    login_to_server(client, &credentials.username, &credentials.password).await
}

// Comma-joined UID set, sorted so messages come back oldest first
fn uid_set(uids: impl IntoIterator<Item = u32>) -> String {
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();
    uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",")
}

/// Fetches every unseen message in `mailbox`; fetching marks them seen.
pub async fn fetch_unseen(session: &mut ImapSession, mailbox: &str) -> Result<Vec<Message>> {
    session.select(mailbox).await?;
    info!("-- {} selected", mailbox);

    let uids = session.uid_search("UNSEEN").await?;
    if uids.is_empty() {
        info!("-- no unread messages in {}", mailbox);
        return Ok(Vec::new());
    }
    info!("-- {} unread messages in {}", uids.len(), mailbox);

    let messages_stream = session.uid_fetch(uid_set(uids), "RFC822").await?;
    let fetched: Vec<_> = messages_stream.try_collect().await?;

    let messages = fetched
        .iter()
        .filter_map(|fetch| {
            let Some(body) = fetch.body() else {
                warn!("Message {:?} came back without a body", fetch.uid);
                return None;
            };
            match parse_message(body) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Skipping unparseable message {:?}: {}", fetch.uid, e);
                    None
                }
            }
        })
        .collect();

    Ok(messages)
}

pub async fn fetch_unread(imap: &ImapConfig, credentials: &Credentials) -> Result<Vec<Message>> {
    let mut imap_session = create_session(imap, credentials).await?;
    let messages = fetch_unseen(&mut imap_session, &imap.mailbox).await;

    // Be nice to the server and log out
    if let Err(e) = imap_session.logout().await {
        warn!("IMAP logout failed: {}", e);
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_set_is_sorted_and_comma_joined() {
        assert_eq!(uid_set([42, 7, 19]), "7,19,42");
        assert_eq!(uid_set([5]), "5");
    }
}
