use anyhow::{anyhow, Result};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;

use crate::mail_reader::Credentials;
use crate::settings::Config;

pub const OTP_SUBJECT: &str = "SmartDesk PIN reset code";

pub fn otp_body(otp: &str, ttl_secs: i64) -> String {
    format!(
        "Your SmartDesk one-time password is {}.\n\nIt expires in {} minutes. If you did not ask to reset your PIN, ignore this email.\n",
        otp,
        (ttl_secs / 60).max(1)
    )
}

pub fn build_otp_message(from: &str, to: &str, otp: &str, ttl_secs: i64) -> Result<Message> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| anyhow!("Invalid from address '{}': {}", from, e))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| anyhow!("Invalid to address '{}': {}", to, e))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(OTP_SUBJECT)
        .body(otp_body(otp, ttl_secs))
        .map_err(|e| anyhow!("Failed to build email: {}", e))
}

/// Sends the one-time password to the recovery address over SMTP with TLS.
pub async fn send_otp(config: &Config, credentials: &Credentials, otp: &str) -> Result<()> {
    let to = config.recovery_email();
    let email = build_otp_message(config.smtp_from(), to, otp, config.auth.otp_ttl_secs)?;
    let creds = SmtpCredentials::new(credentials.username.clone(), credentials.password.clone());

    // Port 465 = implicit TLS, anything else = STARTTLS
    let mailer = if config.smtp.port == 465 {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp.server)?
            .port(config.smtp.port)
            .credentials(creds)
            .build()
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp.server)?
            .port(config.smtp.port)
            .credentials(creds)
            .build()
    };

    mailer.send(email).await?;
    info!("-- one-time password sent to {}", to);
    Ok(())
}
