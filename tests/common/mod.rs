//! Shared fakes and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use inbox_assist::channels::{MailSender, MailboxTransport, RawMessage};
use inbox_assist::error::{LlmError, MailError, MailboxError};
use inbox_assist::llm::{
    CompletionRequest, CompletionResponse, GenerationSettings, LanguageModel, LlmProvider,
};
use inbox_assist::store::UsageLedger;

/// Maximum time any wait in a test is allowed before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── LLM ─────────────────────────────────────────────────────────────

/// Answers every prompt with a fixed reply and records the prompts.
pub struct RecordingLlm {
    reply: String,
    failures_left: AtomicUsize,
    delay: Duration,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn new(reply: &str) -> Arc<Self> {
        Self::failing_first(0, reply)
    }

    /// Fail the first `n` requests, then answer with `reply`.
    pub fn failing_first(n: usize, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            failures_left: AtomicUsize::new(n),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Take `delay` to answer each prompt. The prompt is recorded first.
    pub fn slow(delay: Duration, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            failures_left: AtomicUsize::new(0),
            delay,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for RecordingLlm {
    fn provider_name(&self) -> &str {
        "recording"
    }
    fn model_name(&self) -> &str {
        "recording-model"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (dec!(0.000001), dec!(0.000002))
    }
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LlmError::RequestFailed {
                provider: "recording".into(),
                reason: "scripted failure".into(),
            });
        }

        Ok(CompletionResponse {
            content: self.reply.clone(),
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

pub fn language_model<L: UsageLedger + 'static>(
    llm: Arc<RecordingLlm>,
    ledger: Arc<L>,
) -> Arc<LanguageModel> {
    Arc::new(LanguageModel::new(llm, ledger, GenerationSettings::default()))
}

// ── Mail ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `n` emails have been sent.
    pub async fn wait_for(&self, n: usize) -> Vec<SentMail> {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                let sent = self.sent();
                if sent.len() >= n {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("timed out waiting for outbound mail")
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Delivers a fixed batch, optionally failing after the first `fail_after`.
pub struct ScriptedTransport {
    messages: Vec<RawMessage>,
    fail_after: Option<usize>,
}

impl ScriptedTransport {
    pub fn new(raw: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            messages: raw
                .into_iter()
                .enumerate()
                .map(|(i, bytes)| RawMessage {
                    uid: i as u32 + 1,
                    bytes,
                })
                .collect(),
            fail_after: None,
        })
    }

    pub fn failing_after(raw: Vec<Vec<u8>>, n: usize) -> Arc<Self> {
        let mut transport = Arc::try_unwrap(Self::new(raw)).ok().unwrap();
        transport.fail_after = Some(n);
        Arc::new(transport)
    }
}

#[async_trait]
impl MailboxTransport for ScriptedTransport {
    async fn fetch_unseen(&self, tx: mpsc::Sender<RawMessage>) -> Result<usize, MailboxError> {
        for (i, message) in self.messages.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(MailboxError::Fetch {
                    uid: message.uid,
                    reason: "connection reset".into(),
                });
            }
            if tx.send(message.clone()).await.is_err() {
                return Ok(i);
            }
        }
        Ok(self.messages.len())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

mod pdf;

pub use pdf::single_line_pdf;

/// Plain-text email.
pub fn text_email(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: assistant@example.com\r\nSubject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}

/// Multipart email with one text body and 7bit attachments.
pub fn email_with_attachments(
    from: &str,
    subject: &str,
    body: &str,
    attachments: &[(&str, &str, &[u8])],
) -> Vec<u8> {
    let mut raw = format!(
        "From: {from}\r\nTo: assistant@example.com\r\nSubject: {subject}\r\n\
         MIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"BOUNDARY\"\r\n\r\n\
         --BOUNDARY\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
    .into_bytes();
    for (content_type, filename, bytes) in attachments {
        raw.extend_from_slice(
            format!(
                "--BOUNDARY\r\nContent-Type: {content_type}; name=\"{filename}\"\r\n\
                 Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n"
            )
            .as_bytes(),
        );
        raw.extend_from_slice(bytes);
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"--BOUNDARY--\r\n");
    raw
}
