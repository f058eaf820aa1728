//! Email I/O: IMAP intake, message parsing, SMTP delivery.

pub mod email;
pub mod email_poller;
pub mod email_types;
pub mod imap;

pub use email::{EmailConfig, MailSender, SmtpMailer};
pub use email_poller::{MailboxWatcher, PollReport, spawn_email_poller};
pub use email_types::{Attachment, ParsedMessage, RawMessage, parse_message};
pub use imap::{ImapSession, ImapTransport, MailboxTransport};
