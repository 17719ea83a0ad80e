//! Shared building blocks for the Plinth script runtime.
//!
//! Pure types and logic with no I/O: the error taxonomy, the tagged script
//! value model, cron expression parsing, and source naming rules. Everything
//! here is consumed by both the runtime and the API server.

pub mod cron;
pub mod error;
pub mod source;
pub mod types;
pub mod value;
