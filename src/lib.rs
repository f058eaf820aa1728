//! Inbox Assist: answers inbound email with a language model and runs
//! recurring per-user actions on a timer.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod scheduler;
pub mod store;
