//! Storage collaborators: user lookup/persistence and LLM usage accounting.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// A registered user.
///
/// `info` is an append-only history: entries are added, never overwritten
/// or removed, by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            info: BTreeMap::new(),
        }
    }

    /// Add a history entry. Returns `false` (and leaves the existing value
    /// untouched) if the key is already present.
    pub fn append_info(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        match self.info.entry(key.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value.into());
                true
            }
        }
    }

    /// History entries whose key starts with `prefix`, in key order.
    pub fn info_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
        self.info.iter().filter(move |(k, _)| k.starts_with(prefix))
    }
}

/// One usage-accounting charge for a language-model submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub id: Uuid,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
}

/// User lookup and persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by email address (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    /// Find a user by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError>;

    /// Insert or update a user. History entries already stored are kept as-is.
    async fn save(&self, user: &User) -> Result<(), DatabaseError>;
}

/// Append-only ledger of language-model charges.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record_llm_call(&self, record: &LlmCallRecord) -> Result<(), DatabaseError>;
}
