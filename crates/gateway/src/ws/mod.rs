//! Real-time observer channel: frame vocabulary, connection manager and
//! the chat endpoint.

pub mod chat;
pub mod frames;
pub mod manager;
