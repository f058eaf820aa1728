//! Metered text generation, shared by the email pipeline and the recurring
//! action scheduler.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::LlmError;
use crate::llm::costs::call_cost;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::{LlmCallRecord, UsageLedger};

/// Fixed generation settings shared by every submission.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Language-model backend with per-user usage accounting.
pub struct LanguageModel {
    provider: Arc<dyn LlmProvider>,
    ledger: Arc<dyn UsageLedger>,
    settings: GenerationSettings,
}

impl LanguageModel {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        ledger: Arc<dyn UsageLedger>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            ledger,
            settings,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Submit `prompt` on behalf of `user_id`.
    ///
    /// Returns `Ok(None)` when the model answers with empty text. Every
    /// answered submission is charged to the user, empty or not.
    pub async fn generate(
        &self,
        prompt: &str,
        user_id: &str,
        purpose: &str,
    ) -> Result<Option<String>, LlmError> {
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);

        let response = self.provider.complete(request).await?;

        let record = LlmCallRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            provider: self.provider.provider_name().to_string(),
            model: self.provider.model_name().to_string(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost: call_cost(
                self.provider.cost_per_token(),
                response.input_tokens,
                response.output_tokens,
            ),
            purpose: purpose.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record_llm_call(&record).await {
            tracing::error!(user_id, error = %e, "Failed to record LLM usage");
        }

        tracing::debug!(
            user_id,
            purpose,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "LLM call complete"
        );

        let content = response.content.trim();
        if content.is_empty() {
            Ok(None)
        } else {
            Ok(Some(content.to_string()))
        }
    }
}
