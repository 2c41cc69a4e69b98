//! Provider-agnostic model client for the Hermes agent server.
//!
//! One wire shape (OpenRouter-style chat completions) covers every
//! configured tier; models that cannot honor native tool schemas get them
//! embedded in the system prompt and parsed back out of the response text.

pub mod client;
pub mod sanitize;
pub mod textcall;
pub mod traits;

pub use client::{ChatOutcome, ModelClient, ModelError};
pub use traits::ChatProvider;
