//! Outgoing mail transport.
//!
//! The worker only needs "send this message, tell me if it failed". The SMTP
//! implementation builds a fresh `lettre` message per job over a pooled
//! STARTTLS relay connection; the transport's own timeout bounds each call.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use assetmail_common::config::AppConfig;
use assetmail_common::types::MailMessage;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build message: {0}")]
    Build(String),

    #[error("invalid email address: {0}")]
    Address(String),

    #[error("SMTP error: {0}")]
    Smtp(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message. The error text is stored on the job as `lastError`.
    async fn send(&self, message: &MailMessage) -> Result<(), TransportError>;
}

/// SMTP relay transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<(String, String)>,
        from: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let from = parse_mailbox(from)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| TransportError::Smtp(e.to_string()))?
            .port(port)
            .timeout(Some(timeout));
        if let Some((user, password)) = credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let from = config
            .sender()
            .ok_or_else(|| anyhow::anyhow!("SMTP_FROM or SMTP_USER is required to send mail"))?;
        let credentials = config.smtp_user.clone().zip(config.smtp_password.clone());

        let mailer = Self::new(
            &config.smtp_host,
            config.smtp_port,
            credentials,
            from,
            Duration::from_secs(config.smtp_timeout_secs),
        )?;

        tracing::info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            authenticated = config.smtp_user.is_some(),
            "SMTP transport configured"
        );
        Ok(mailer)
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), TransportError> {
        let email = build_email(&self.from, message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, TransportError> {
    raw.trim()
        .parse::<Mailbox>()
        .map_err(|e| TransportError::Address(format!("{}: {}", raw, e)))
}

/// Every address in a `,`/`;` separated list. At least one is required.
fn parse_mailbox_list(raw: &str) -> Result<Vec<Mailbox>, TransportError> {
    let mailboxes = raw
        .split([',', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_mailbox)
        .collect::<Result<Vec<_>, _>>()?;
    if mailboxes.is_empty() {
        return Err(TransportError::Address(format!("no recipient in '{}'", raw)));
    }
    Ok(mailboxes)
}

/// Translate a queued message into a `lettre` message.
pub fn build_email(from: &Mailbox, message: &MailMessage) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(message.subject.as_str());
    for mailbox in parse_mailbox_list(&message.to)? {
        builder = builder.to(mailbox);
    }
    for address in &message.bcc {
        builder = builder.bcc(parse_mailbox(address)?);
    }

    let result = match &message.text {
        Some(text) => builder.multipart(MultiPart::alternative_plain_html(
            text.clone(),
            message.html.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_HTML)
            .body(message.html.clone()),
    };
    result.map_err(|e| TransportError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> MailMessage {
        MailMessage {
            to: "a@x.com".to_string(),
            bcc: vec!["ops@x.com".to_string(), "team@x.com".to_string()],
            subject: "New master loan recorded".to_string(),
            html: "<p>hello</p>".to_string(),
            text: None,
        }
    }

    fn sender() -> Mailbox {
        parse_mailbox("Asset Desk <desk@x.com>").unwrap()
    }

    #[test]
    fn test_build_email_sets_envelope() {
        let email = build_email(&sender(), &message()).unwrap();
        let mut recipients: Vec<String> = email
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["a@x.com", "ops@x.com", "team@x.com"]);

        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: New master loan recorded"));
        assert!(raw.contains("text/html"));
        // bcc never appears in the headers
        assert!(!raw.contains("ops@x.com"));
    }

    #[test]
    fn test_build_email_rejects_bad_address() {
        let mut msg = message();
        msg.bcc.push("not an address".to_string());
        let err = build_email(&sender(), &msg).unwrap_err();
        assert!(matches!(err, TransportError::Address(_)));
        assert!(err.to_string().contains("not an address"));
    }

    #[test]
    fn test_build_email_accepts_several_to_addresses() {
        let mut msg = message();
        msg.to = "a@x.com, b@x.com; c@x.com".to_string();
        let email = build_email(&sender(), &msg).unwrap();
        let mut recipients: Vec<String> = email
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        recipients.sort();
        assert_eq!(
            recipients,
            vec!["a@x.com", "b@x.com", "c@x.com", "ops@x.com", "team@x.com"]
        );
    }

    #[test]
    fn test_build_email_rejects_empty_to() {
        let mut msg = message();
        msg.to = " ; ".to_string();
        let err = build_email(&sender(), &msg).unwrap_err();
        assert!(matches!(err, TransportError::Address(_)));
    }

    #[test]
    fn test_build_email_with_plain_text_is_multipart() {
        let mut msg = message();
        msg.text = Some("hello".to_string());
        let email = build_email(&sender(), &msg).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
    }
}
