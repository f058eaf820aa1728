//! Error types for Inbox Assist.
//!
//! Every failure is scoped to the smallest unit that caused it: one
//! attachment, one message, one scheduler tick, or one mailbox poll.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mailbox transport errors. Each one aborts the current poll only.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to mailbox: {0}")]
    Connection(String),

    #[error("Mailbox search failed: {0}")]
    Search(String),

    #[error("Failed to fetch message {uid}: {reason}")]
    Fetch { uid: u32, reason: String },

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

/// Raw message could not be turned into a `ParsedMessage`.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Message is empty")]
    Empty,

    #[error("Message is not valid RFC 5322")]
    Malformed,

    #[error("Message has no sender address")]
    MissingSender,
}

/// A recognized document type whose bytes could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Failed to read PDF: {0}")]
    Pdf(String),

    #[error("Failed to read archive: {0}")]
    Archive(String),

    #[error("Document part {part} is missing")]
    MissingPart { part: String },

    #[error("Unrecognized {format} layout: {reason}")]
    Format { format: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),
}

/// Terminal outcomes of the response pipeline for one message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No user registered for {email}")]
    UserNotFound { email: String },

    #[error("Model returned no text for {email}")]
    EmptyModelResponse { email: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Reply delivery failed: {0}")]
    Delivery(#[from] MailError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Recurring action scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("User {user_id} not found")]
    UserNotFound { user_id: String },

    #[error("Unknown schedule {0:?}, expected \"hourly\" or \"daily\"")]
    InvalidCadence(String),

    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Failure of a single scheduler tick. Logged and skipped; never fatal to the job.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("User {user_id} no longer exists")]
    UserGone { user_id: String },

    #[error("Model returned no text")]
    EmptyModelResponse,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to persist result: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Failed to email result: {0}")]
    Delivery(#[from] MailError),
}
