//! Conversation persistence — one JSON file per conversation.

pub mod store;

pub use store::{Conversation, ConversationStore, ConversationSummary};
