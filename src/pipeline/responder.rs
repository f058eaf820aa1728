//! Response pipeline: sender → user, body + attachments → text,
//! text → model → reply.

use std::sync::Arc;

use crate::channels::{MailSender, ParsedMessage};
use crate::error::PipelineError;
use crate::extract::{DocumentExtractor, Extraction};
use crate::llm::LanguageModel;
use crate::store::UserStore;

/// Appended to every generated reply.
pub const DEFAULT_SIGNATURE: &str = "\n\n---\nBest regards,\nAllChat";

/// Usage-accounting purpose for email replies.
const PURPOSE: &str = "email_reply";

/// Turns one parsed message into at most one reply.
pub struct ResponsePipeline {
    users: Arc<dyn UserStore>,
    lm: Arc<LanguageModel>,
    mailer: Arc<dyn MailSender>,
    extractor: DocumentExtractor,
    signature: String,
}

impl ResponsePipeline {
    pub fn new(
        users: Arc<dyn UserStore>,
        lm: Arc<LanguageModel>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            users,
            lm,
            mailer,
            extractor: DocumentExtractor::new(),
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Process one message end to end.
    ///
    /// `Ok(())` means a reply was sent. Every error is terminal for this
    /// message only; the caller logs it and moves on.
    pub async fn handle(&self, message: ParsedMessage) -> Result<(), PipelineError> {
        let user = self
            .users
            .find_by_email(&message.sender)
            .await?
            .ok_or_else(|| PipelineError::UserNotFound {
                email: message.sender.clone(),
            })?;

        let text = self.extracted_text(&message).await;
        let prompt = format!("{}\n{}", message.subject, text);

        let reply = self
            .lm
            .generate(&prompt, &user.id, PURPOSE)
            .await?
            .ok_or_else(|| PipelineError::EmptyModelResponse {
                email: message.sender.clone(),
            })?;

        let subject = format!("RE: {}", message.subject);
        let body = format!("{reply}{}", self.signature);
        self.mailer.send(&message.sender, &subject, &body).await?;

        tracing::info!(
            user_id = %user.id,
            to = %message.sender,
            subject = %subject,
            "Reply sent"
        );
        Ok(())
    }

    /// Body text followed by each attachment's text, blank-line separated.
    /// Attachments that fail or are unsupported contribute nothing.
    pub async fn extracted_text(&self, message: &ParsedMessage) -> String {
        let mut text = message.body_text.clone();

        for (index, attachment) in message.attachments.iter().enumerate() {
            let extractor = self.extractor;
            let owned = attachment.clone();
            let outcome =
                tokio::task::spawn_blocking(move || extractor.extract(&owned)).await;

            match outcome {
                Ok(Ok(Extraction::Text(extracted))) if !extracted.trim().is_empty() => {
                    text.push_str("\n\n");
                    text.push_str(&extracted);
                }
                Ok(Ok(Extraction::Text(_))) => {
                    tracing::debug!(
                        index,
                        content_type = %attachment.content_type,
                        "Attachment has no text"
                    );
                }
                Ok(Ok(Extraction::Skipped { reason })) => {
                    tracing::warn!(
                        index,
                        filename = attachment.filename.as_deref().unwrap_or(""),
                        %reason,
                        "Skipping attachment"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        index,
                        content_type = %attachment.content_type,
                        error = %e,
                        "Attachment extraction failed"
                    );
                }
                Err(e) => {
                    tracing::error!(index, error = %e, "Extraction task failed");
                }
            }
        }

        text
    }
}
