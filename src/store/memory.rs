//! In-memory store, used by tests and when no database path is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::store::traits::{LlmCallRecord, UsageLedger, User, UserStore};

/// `UserStore` + `UsageLedger` kept in process memory.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    llm_calls: RwLock<Vec<LlmCallRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `users`.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let map = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: RwLock::new(map),
            llm_calls: RwLock::new(Vec::new()),
        }
    }

    /// All recorded charges, oldest first.
    pub async fn llm_calls(&self) -> Vec<LlmCallRecord> {
        self.llm_calls.read().await.clone()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn save(&self, user: &User) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let stored = users
            .entry(user.id.clone())
            .or_insert_with(|| User::new(user.id.clone(), user.email.clone()));
        stored.email = user.email.clone();
        for (key, value) in &user.info {
            stored.append_info(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl UsageLedger for MemoryStore {
    async fn record_llm_call(&self, record: &LlmCallRecord) -> Result<(), DatabaseError> {
        self.llm_calls.write().await.push(record.clone());
        Ok(())
    }
}
