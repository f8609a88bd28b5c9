//! Outbound email
//!
//! Handlers never send directly; they hand an [`Email`] to the task pool,
//! which calls the configured [`Notifier`]. Delivery failures are logged by
//! the pool and never reach the request.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail is not configured")]
    NotConfigured,

    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// STARTTLS SMTP relay
pub struct SmtpNotifier {
    sender: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let (Some(sender), Some(host)) = (&config.sender, &config.host) else {
            return Err(MailError::NotConfigured);
        };

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            sender: sender.parse()?,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())?;

        self.transport.send(message).await?;
        info!("[Mail] Sent {:?} to {}", email.subject, email.to);
        Ok(())
    }
}

/// Used when SMTP settings are missing; every send fails with `NotConfigured`.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _email: &Email) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

pub fn notifier_from_config(config: &SmtpConfig) -> Result<Arc<dyn Notifier>, MailError> {
    match SmtpNotifier::new(config) {
        Ok(notifier) => {
            info!("[Mail] SMTP relay {:?}:{}", config.host, config.port);
            Ok(Arc::new(notifier))
        }
        Err(MailError::NotConfigured) => {
            warn!("[Mail] SMTP_SENDER or SMTP_HOST unset; email notifications are disabled");
            Ok(Arc::new(DisabledNotifier))
        }
        Err(e) => Err(e),
    }
}

pub mod templates {
    use super::Email;

    fn escape(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
        out
    }

    pub fn session_started(to: &str, recipient: &str, starter: &str, session_id: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "New Mend Session Started 💬".to_string(),
            html: format!(
                "<h2>Hi {},</h2>\
                 <p><strong>{}</strong> has started a new Mend session with you.</p>\
                 <p>Please open the app to join and continue your conversation.</p>\
                 <p><i>Session ID:</i> <strong>{}</strong></p>\
                 <br/><p>With love,<br/>The Mend Team</p>",
                escape(recipient),
                escape(starter),
                escape(session_id)
            ),
        }
    }

    pub fn session_ended(to: &str, recipient: &str, partner: &str, session_id: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "Your Mend Session Has Ended 💜".to_string(),
            html: format!(
                "<h2>Hi {},</h2>\
                 <p>Your session with <strong>{}</strong> has just ended.</p>\
                 <p>You can review insights and reflections inside the app.</p>\
                 <p><i>Session ID:</i> <strong>{}</strong></p>\
                 <br/><p>With warmth,<br/>The Mend Team</p>",
                escape(recipient),
                escape(partner),
                escape(session_id)
            ),
        }
    }

    pub fn invite_received(to: &str, recipient: &str, inviter: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "You've been invited to Mend 💌".to_string(),
            html: format!(
                "<h2>Hi {},</h2>\
                 <p><strong>{}</strong> would like to pair with you on Mend.</p>\
                 <p>Open the app to accept the invite and start talking.</p>\
                 <br/><p>With love,<br/>The Mend Team</p>",
                escape(recipient),
                escape(inviter)
            ),
        }
    }
}
