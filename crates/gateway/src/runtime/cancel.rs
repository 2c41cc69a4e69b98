//! Per-conversation cancellation tokens.
//!
//! Each synchronous run registers a [`CancelToken`]; a `cancel` frame from
//! any observer of the conversation sets it. The orchestrator and
//! long-running tools poll the same token.

use std::collections::HashMap;

use parking_lot::Mutex;

use hermes_domain::progress::CancelToken;

pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token for a conversation's run.
    pub fn register(&self, conversation_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(conversation_id.to_string(), token.clone());
        token
    }

    /// Signal cancellation. Returns true when a run was registered.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.tokens.lock().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a run completes. Idempotent.
    pub fn remove(&self, conversation_id: &str) {
        self.tokens.lock().remove(conversation_id);
    }

    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.tokens.lock().contains_key(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove_lifecycle() {
        let map = CancelMap::new();
        let token = map.register("conv");
        assert!(map.is_running("conv"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("conv"));
        assert!(token.is_cancelled());

        map.remove("conv");
        assert!(!map.is_running("conv"));
        assert!(!map.cancel("conv"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("conv");
        map.remove("conv");
        map.remove("conv");
        assert!(!map.is_running("conv"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("conv");
        let new = map.register("conv");
        map.cancel("conv");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }
}
