//! Outgoing mail: a fluent message builder over a pluggable transport.
//!
//! condor ships only [`LogTransport`], which records messages through
//! `tracing`. Real delivery (SMTP, provider HTTP APIs) is provided by
//! implementing [`MailTransport`] and registering it with
//! [`AppBuilder::mail_transport`](crate::app::AppBuilder::mail_transport).

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail has no sender")]
    MissingSender,

    #[error("mail has no recipients")]
    MissingRecipients,

    #[error("mail has neither an HTML nor a plain text body")]
    MissingBody,

    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub name: String,
    pub address: String,
}

impl EmailAddress {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

impl From<&str> for EmailAddress {
    fn from(address: &str) -> Self {
        Self::new("", address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub path: PathBuf,
}

/// A fully assembled message, as handed to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub from: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub html_body: Option<String>,
    pub plain_text_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    fn check(&self) -> Result<(), MailError> {
        if self.from.is_none() {
            return Err(MailError::MissingSender);
        }
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(MailError::MissingRecipients);
        }
        if self.html_body.is_none() && self.plain_text_body.is_none() {
            return Err(MailError::MissingBody);
        }
        Ok(())
    }
}

/// Delivers assembled messages.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), MailError>;
}

/// Logs each message at info level instead of delivering it.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        let recipients: Vec<String> = message.to.iter().map(ToString::to_string).collect();
        tracing::info!(
            from = ?message.from.as_ref().map(ToString::to_string),
            to = ?recipients,
            cc = message.cc.len(),
            bcc = message.bcc.len(),
            attachments = message.attachments.len(),
            subject = %message.subject,
            "mail sent"
        );
        Ok(())
    }
}

/// Entry point for composing mail; cheap to clone.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    /// Starts a new, empty message.
    pub fn compose(&self) -> Mail {
        Mail {
            transport: Arc::clone(&self.transport),
            message: Message::default(),
        }
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer").finish_non_exhaustive()
    }
}

/// A message under construction.
///
/// ```no_run
/// # async fn demo(mailer: condor::mail::Mailer) -> Result<(), condor::mail::MailError> {
/// use condor::mail::EmailAddress;
///
/// mailer
///     .compose()
///     .from(EmailAddress::new("Shop", "shop@example.com"))
///     .to("ada@example.com")
///     .subject("Your receipt")
///     .plain_text_body("Thanks for your order.")
///     .send()
///     .await
/// # }
/// ```
#[must_use = "a mail does nothing until `send` is awaited"]
pub struct Mail {
    transport: Arc<dyn MailTransport>,
    message: Message,
}

impl Mail {
    pub fn from(mut self, address: impl Into<EmailAddress>) -> Self {
        self.message.from = Some(address.into());
        self
    }

    pub fn to(mut self, address: impl Into<EmailAddress>) -> Self {
        self.message.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<EmailAddress>) -> Self {
        self.message.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<EmailAddress>) -> Self {
        self.message.bcc.push(address.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.message.html_body = Some(body.into());
        self
    }

    pub fn plain_text_body(mut self, body: impl Into<String>) -> Self {
        self.message.plain_text_body = Some(body.into());
        self
    }

    pub fn attachment(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.message.attachments.push(Attachment {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Checks the message is deliverable and hands it to the transport.
    pub async fn send(self) -> Result<(), MailError> {
        self.message.check()?;
        self.transport.send(&self.message).await
    }
}
