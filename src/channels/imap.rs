//! Raw IMAP4rev1 client over rustls.
//!
//! Only the handful of commands the watcher needs: LOGIN, SELECT,
//! UID SEARCH UNSEEN, UID FETCH BODY[] and LOGOUT. A non-peek `BODY[]`
//! fetch sets `\Seen` on the server as part of the same command.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;

use crate::channels::email::EmailConfig;
use crate::channels::email_types::RawMessage;
use crate::error::MailboxError;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of unseen messages.
///
/// Implementations push each fetched message into `tx` as soon as it has
/// been read, and return the number of messages delivered. A transport
/// error ends the poll; messages already sent stay sent.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn fetch_unseen(&self, tx: mpsc::Sender<RawMessage>) -> Result<usize, MailboxError>;
}

// ── Session ─────────────────────────────────────────────────────────

/// Tagged response to one command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged (`* ...`) lines, CRLF stripped.
    untagged: Vec<String>,
    /// Literal payloads in the order they arrived.
    literals: Vec<Vec<u8>>,
}

/// One IMAP conversation over any byte stream.
pub struct ImapSession<S> {
    stream: S,
    buf: Vec<u8>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a freshly connected stream and consume the server greeting.
    pub fn start(stream: S) -> Result<Self, MailboxError> {
        let mut session = Self {
            stream,
            buf: Vec::new(),
            next_tag: 1,
        };
        let greeting = session.read_line().map_err(MailboxError::Connection)?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(MailboxError::Connection(format!(
                "unexpected greeting: {greeting}"
            )));
        }
        Ok(session)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MailboxError> {
        self.command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .map_err(|e| MailboxError::Connection(format!("login failed: {e}")))?;
        Ok(())
    }

    /// Open `mailbox` read-write.
    pub fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        self.command(&format!("SELECT {}", quote(mailbox)))
            .map_err(|e| MailboxError::Connection(format!("select {mailbox} failed: {e}")))?;
        Ok(())
    }

    pub fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        let response = self.command("UID SEARCH UNSEEN").map_err(MailboxError::Search)?;
        let uids = response
            .untagged
            .iter()
            .filter_map(|line| line.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter_map(|n| n.parse().ok())
            .collect();
        Ok(uids)
    }

    /// Fetch the full message for `uid`, marking it seen.
    pub fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailboxError> {
        let response = self
            .command(&format!("UID FETCH {uid} BODY[]"))
            .map_err(|reason| MailboxError::Fetch { uid, reason })?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| MailboxError::Fetch {
                uid,
                reason: "no message body in response".into(),
            })
    }

    pub fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            tracing::debug!(error = %e, "IMAP logout did not complete cleanly");
        }
    }

    /// Send one tagged command and collect its response up to the tagged
    /// completion. `NO` and `BAD` completions are errors.
    fn command(&mut self, cmd: &str) -> Result<Response, String> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| e.to_string())?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;

            if let Some(status) = line.strip_prefix(&tag).and_then(|s| s.strip_prefix(' ')) {
                return if status.starts_with("OK") {
                    Ok(response)
                } else {
                    Err(status.to_string())
                };
            }

            if let Some(len) = literal_len(&line) {
                let payload = self.read_exact(len)?;
                response.literals.push(payload);
                // The rest of the untagged line follows the literal.
                let tail = self.read_line()?;
                response.untagged.push(format!("{line}{tail}"));
            } else {
                response.untagged.push(line);
            }
        }
    }

    fn fill(&mut self) -> Result<(), String> {
        let mut chunk = [0u8; 8192];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err("IMAP connection closed".into()),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Read one CRLF-terminated line, without the CRLF.
    fn read_line(&mut self) -> Result<String, String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = self.buf.drain(..pos + 2).take(pos).collect();
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            self.fill()?;
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, String> {
        while self.buf.len() < len {
            self.fill()?;
        }
        Ok(self.buf.drain(..len).collect())
    }
}

/// Byte count of a trailing `{n}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

// ── Transport ───────────────────────────────────────────────────────

/// IMAP over TLS, run on the blocking pool.
pub struct ImapTransport {
    config: EmailConfig,
}

impl ImapTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxTransport for ImapTransport {
    async fn fetch_unseen(&self, tx: mpsc::Sender<RawMessage>) -> Result<usize, MailboxError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let stream = connect_tls(&config)?;
            let mut session = ImapSession::start(stream)?;
            let result = stream_unseen(&mut session, &config, &tx);
            session.logout();
            result
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

fn stream_unseen<S: Read + Write>(
    session: &mut ImapSession<S>,
    config: &EmailConfig,
    tx: &mpsc::Sender<RawMessage>,
) -> Result<usize, MailboxError> {
    session.login(&config.username, config.password.expose_secret())?;
    session.select(&config.mailbox)?;

    let uids = session.search_unseen()?;
    tracing::debug!(count = uids.len(), mailbox = %config.mailbox, "Unseen messages");

    let mut delivered = 0;
    for uid in uids {
        let bytes = session.fetch(uid)?;
        if tx.blocking_send(RawMessage { uid, bytes }).is_err() {
            tracing::warn!(uid, "Message receiver dropped, ending fetch");
            break;
        }
        delivered += 1;
    }
    Ok(delivered)
}

fn connect_tls(
    config: &EmailConfig,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, MailboxError> {
    let conn_err = |e: &dyn std::fmt::Display| MailboxError::Connection(e.to_string());

    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
        .map_err(|e| conn_err(&e))?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| conn_err(&e))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name =
        ServerName::try_from(config.imap_host.clone()).map_err(|e| conn_err(&e))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| conn_err(&e))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

// ── Tests ───────────────────────────────────────────────────────────
