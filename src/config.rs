//! Configuration types.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::channels::email::{EmailConfig, parse_env};
use crate::error::ConfigError;
use crate::llm::{DEFAULT_MODEL, GenerationSettings, LlmBackend, LlmConfig};
use crate::pipeline::DEFAULT_SIGNATURE;
use crate::scheduler::{DEFAULT_DAILY_CRON, DEFAULT_HOURLY_CRON};

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub email: EmailConfig,
    pub llm: LlmConfig,
    pub generation: GenerationSettings,
    /// Appended to every email reply.
    pub signature: String,
    pub hourly_cron: String,
    pub daily_cron: String,
    pub db_path: PathBuf,
    /// HTTP control surface port.
    pub port: u16,
    /// Daily-rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("INBOX_ASSIST_LLM_BACKEND") {
            Ok(raw) => raw.parse::<LlmBackend>().map_err(|message| ConfigError::InvalidValue {
                key: "INBOX_ASSIST_LLM_BACKEND".into(),
                message,
            })?,
            Err(_) => LlmBackend::Anthropic,
        };
        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = std::env::var(key_var)
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.into()))?;
        let model =
            std::env::var("INBOX_ASSIST_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let defaults = GenerationSettings::default();
        let generation = GenerationSettings {
            temperature: parse_env("INBOX_ASSIST_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_env("INBOX_ASSIST_MAX_TOKENS", defaults.max_tokens)?,
        };

        Ok(Self {
            email: EmailConfig::from_env()?,
            llm: LlmConfig {
                backend,
                api_key,
                model,
            },
            generation,
            signature: std::env::var("INBOX_ASSIST_SIGNATURE")
                .unwrap_or_else(|_| DEFAULT_SIGNATURE.to_string()),
            hourly_cron: std::env::var("INBOX_ASSIST_HOURLY_CRON")
                .unwrap_or_else(|_| DEFAULT_HOURLY_CRON.to_string()),
            daily_cron: std::env::var("INBOX_ASSIST_DAILY_CRON")
                .unwrap_or_else(|_| DEFAULT_DAILY_CRON.to_string()),
            db_path: std::env::var("INBOX_ASSIST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/inbox-assist.db")),
            port: parse_env("INBOX_ASSIST_PORT", 8080)?,
            log_dir: std::env::var("INBOX_ASSIST_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

