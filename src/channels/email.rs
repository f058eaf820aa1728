//! Email configuration and outbound delivery over SMTP via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, MailError};

// ── Configuration ───────────────────────────────────────────────────

/// Email account configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Mailbox polling period. `0` disables the timer; polls then only
    /// happen on demand.
    pub poll_interval_secs: u64,
    pub mailbox: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    ///
    /// `EMAIL_USERNAME` and `EMAIL_PASSWORD` are required; everything else
    /// has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host =
            std::env::var("EMAIL_IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string());
        let imap_port = parse_env("EMAIL_IMAP_PORT", 993)?;

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));
        let smtp_port = parse_env("EMAIL_SMTP_PORT", 587)?;

        let username = std::env::var("EMAIL_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_USERNAME".into()))?;
        let password = std::env::var("EMAIL_PASSWORD")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_PASSWORD".into()))?;
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let poll_interval_secs = parse_env("EMAIL_POLL_INTERVAL_SECS", 60)?;
        let mailbox = std::env::var("EMAIL_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            poll_interval_secs,
            mailbox,
        })
    }
}

/// Parse an optional numeric env var, rejecting values that are set but bad.
pub(crate) fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    parse_setting(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_setting<T: std::str::FromStr>(
    key: &str,
    raw: Option<&str>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// Outbound plain-text email.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// SMTP delivery with account credentials.
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build(&self, to: &str, subject: &str, body: &str) -> Result<Message, MailError> {
        let from = self
            .config
            .from_address
            .parse()
            .map_err(|e| MailError::InvalidAddress {
                address: self.config.from_address.clone(),
                reason: format!("{e}"),
            })?;
        let to_mailbox = to.parse().map_err(|e| MailError::InvalidAddress {
            address: to.to_string(),
            reason: format!("{e}"),
        })?;

        Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailError::Build(e.to_string()))
    }

    /// Blocking send; run inside `spawn_blocking`.
    fn send_blocking(&self, email: &Message) -> Result<(), MailError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        // 465 is implicit TLS; anything else upgrades with STARTTLS.
        let builder = if self.config.smtp_port == 465 {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        };
        let transport = builder
            .map_err(|e| MailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        transport
            .send(email)
            .map_err(|e| MailError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let email = self.build(to, subject, body)?;
        let mailer = SmtpMailer::new(self.config.clone());

        tokio::task::spawn_blocking(move || mailer.send_blocking(&email))
            .await
            .map_err(|e| MailError::SendFailed(format!("send task failed: {e}")))??;

        tracing::info!(to, subject, "Email sent");
        Ok(())
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                result.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ───────────────────────────────────────────────────────────
