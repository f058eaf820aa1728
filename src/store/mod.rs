//! Persistence layer: users, their action history, and LLM usage charges.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{LlmCallRecord, UsageLedger, User, UserStore};
