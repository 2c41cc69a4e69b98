//! Per-conversation isolated execution sessions on the Docker Engine API.

pub mod manager;

pub use manager::{OutputChunk, SandboxManager};
