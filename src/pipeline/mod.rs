//! Inbound email processing.
//!
//! Each fetched message flows through:
//! 1. `parse_message()`: raw bytes → `ParsedMessage`
//! 2. `ResponsePipeline::handle()`: sender lookup, attachment extraction,
//!    one metered model call, one reply
//!
//! Messages are independent; a failure anywhere ends that message only.

pub mod responder;

pub use responder::{DEFAULT_SIGNATURE, ResponsePipeline};
