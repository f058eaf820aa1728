//! libSQL backend: async `UserStore` and `UsageLedger` implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{LlmCallRecord, UsageLedger, User, UserStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use,
/// but a transaction on it is connection-wide: a second `BEGIN` while one
/// is open fails, and any statement issued meanwhile joins the open
/// transaction. Every write therefore goes through `write_lock`.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Load the history entries of one user.
    async fn load_info(&self, user_id: &str) -> Result<BTreeMap<String, String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT key, value FROM user_info WHERE user_id = ?1 ORDER BY key",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_info: {e}")))?;

        let mut info = BTreeMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_info: {e}")))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            let value: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            info.insert(key, value);
        }
        Ok(info)
    }

    /// Run a single-row user lookup and attach its history.
    async fn find_user(
        &self,
        sql: &str,
        arg: &str,
        op: &str,
    ) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![arg])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
        let email: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
        let info = self.load_info(&id).await?;
        Ok(Some(User { id, email, info }))
    }

    /// Usage charges recorded for a user, oldest first.
    pub async fn llm_calls_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<LlmCallRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, provider, model, input_tokens, output_tokens, cost, purpose, created_at
                 FROM llm_calls WHERE user_id = ?1 ORDER BY created_at ASC",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("llm_calls_for_user: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("llm_calls_for_user: {e}")))?
        {
            records.push(
                row_to_llm_call(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(records)
    }
}

/// Map a libsql Row to an `LlmCallRecord`.
fn row_to_llm_call(row: &libsql::Row) -> Result<LlmCallRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let input_tokens: i64 = row.get(4)?;
    let output_tokens: i64 = row.get(5)?;
    let cost_str: String = row.get(6)?;
    let created_str: String = row.get(8)?;

    Ok(LlmCallRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        user_id: row.get(1)?,
        provider: row.get(2)?,
        model: row.get(3)?,
        input_tokens: u32::try_from(input_tokens).unwrap_or(0),
        output_tokens: u32::try_from(output_tokens).unwrap_or(0),
        cost: Decimal::from_str(&cost_str).unwrap_or(Decimal::ZERO),
        purpose: row.get::<String>(7).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    })
}

#[async_trait]
impl UserStore for LibSqlBackend {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        self.find_user(
            "SELECT id, email FROM users WHERE email = ?1 COLLATE NOCASE",
            email,
            "find_by_email",
        )
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        self.find_user("SELECT id, email FROM users WHERE id = ?1", id, "find_by_id")
            .await
    }

    async fn save(&self, user: &User) -> Result<(), DatabaseError> {
        let _write = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("save: begin: {e}")))?;

        tx.execute(
            "INSERT INTO users (id, email) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET email = excluded.email",
            params![user.id.as_str(), user.email.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save user: {e}")))?;

        // History is append-only: existing keys are left untouched.
        for (key, value) in &user.info {
            tx.execute(
                "INSERT OR IGNORE INTO user_info (user_id, key, value) VALUES (?1, ?2, ?3)",
                params![user.id.as_str(), key.as_str(), value.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save user_info: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("save: commit: {e}")))?;

        debug!(user_id = %user.id, entries = user.info.len(), "User saved");
        Ok(())
    }
}

#[async_trait]
impl UsageLedger for LibSqlBackend {
    async fn record_llm_call(&self, record: &LlmCallRecord) -> Result<(), DatabaseError> {
        let _write = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO llm_calls (id, user_id, provider, model, input_tokens, output_tokens,
                    cost, purpose, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.user_id.as_str(),
                    record.provider.as_str(),
                    record.model.as_str(),
                    i64::from(record.input_tokens),
                    i64::from(record.output_tokens),
                    record.cost.to_string(),
                    record.purpose.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_llm_call: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn save_and_find_by_email() {
        let db = test_db().await;
        db.save(&User::new("42", "alice@example.com")).await.unwrap();

        let user = db.find_by_email("ALICE@example.com").await.unwrap().unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.email, "alice@example.com");
        assert!(user.info.is_empty());
    }

    #[tokio::test]
    async fn find_by_id_not_found() {
        let db = test_db().await;
        assert!(db.find_by_id("nope").await.unwrap().is_none());
        assert!(db.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_append_only() {
        let db = test_db().await;
        let mut user = User::new("42", "alice@example.com");
        user.append_info("daily_action_1", "summarize");
        db.save(&user).await.unwrap();

        let mut stale = User::new("42", "alice@example.com");
        stale.append_info("daily_action_1", "overwritten?");
        stale.append_info("daily_result_1", "summary");
        db.save(&stale).await.unwrap();

        let user = db.find_by_id("42").await.unwrap().unwrap();
        assert_eq!(user.info.len(), 2);
        assert_eq!(user.info["daily_action_1"], "summarize");
        assert_eq!(user.info["daily_result_1"], "summary");
    }

    #[tokio::test]
    async fn save_updates_email() {
        let db = test_db().await;
        db.save(&User::new("1", "old@example.com")).await.unwrap();
        db.save(&User::new("1", "new@example.com")).await.unwrap();

        assert!(db.find_by_email("old@example.com").await.unwrap().is_none());
        assert!(db.find_by_email("new@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn record_and_list_llm_calls() {
        let db = test_db().await;
        let record = LlmCallRecord {
            id: Uuid::new_v4(),
            user_id: "42".into(),
            provider: "anthropic".into(),
            model: "claude-3-haiku-20240307".into(),
            input_tokens: 120,
            output_tokens: 40,
            cost: dec!(0.00008),
            purpose: "email_reply".into(),
            created_at: Utc::now(),
        };
        db.record_llm_call(&record).await.unwrap();

        let calls = db.llm_calls_for_user("42").await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, record.id);
        assert_eq!(calls[0].cost, dec!(0.00008));
        assert_eq!(calls[0].input_tokens, 120);
        assert_eq!(calls[0].purpose, "email_reply");

        assert!(db.llm_calls_for_user("7").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_saves_all_commit() {
        let db = Arc::new(test_db().await);
        for i in 0..32 {
            db.save(&User::new(&i.to_string(), &format!("user{i}@example.com")))
                .await
                .unwrap();
        }

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let db = Arc::clone(&db);
            tasks.spawn(async move {
                let id = i.to_string();
                let mut user = db.find_by_id(&id).await?.unwrap();
                user.append_info(format!("hourly_action_{i}"), "ping");
                user.append_info(format!("hourly_result_{i}"), "pong");
                db.save(&user).await?;
                db.record_llm_call(&LlmCallRecord {
                    id: Uuid::new_v4(),
                    user_id: id,
                    provider: "anthropic".into(),
                    model: "claude-3-haiku-20240307".into(),
                    input_tokens: 1,
                    output_tokens: 1,
                    cost: dec!(0.000001),
                    purpose: "scheduled_action".into(),
                    created_at: Utc::now(),
                })
                .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        for i in 0..32 {
            let user = db.find_by_id(&i.to_string()).await.unwrap().unwrap();
            assert_eq!(user.info.len(), 2, "user {i}");
            assert_eq!(db.llm_calls_for_user(&i.to_string()).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn local_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inbox.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.save(&User::new("9", "carol@example.com")).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.find_by_id("9").await.unwrap().is_some());
    }
}
