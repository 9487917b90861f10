//! Identity sources.
//!
//! The orchestrator reads the identity exactly once per session; these
//! adapters only answer "who is syncing right now".

use crate::domain::Identity;
use crate::ports::IdentitySource;
use std::sync::Mutex;

/// Identity fixed at startup (from configuration). `set` exists for UI-driven
/// profile switches; sessions already running keep the identity they captured.
pub struct StaticIdentitySource {
    identity: Mutex<Option<Identity>>,
}

impl StaticIdentitySource {
    pub fn new(identity: Option<String>) -> Self {
        Self {
            identity: Mutex::new(identity.filter(|s| !s.is_empty()).map(Identity)),
        }
    }

    pub fn set(&self, identity: Option<String>) {
        if let Ok(mut guard) = self.identity.lock() {
            *guard = identity.filter(|s| !s.is_empty()).map(Identity);
        }
    }
}

impl IdentitySource for StaticIdentitySource {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.lock().ok().and_then(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identity_is_none() {
        assert!(StaticIdentitySource::new(Some(String::new()))
            .current_identity()
            .is_none());
        assert!(StaticIdentitySource::new(None).current_identity().is_none());
    }

    #[test]
    fn set_replaces_identity() {
        let source = StaticIdentitySource::new(Some("user-a".into()));
        assert_eq!(source.current_identity().unwrap().as_str(), "user-a");
        source.set(Some("user-b".into()));
        assert_eq!(source.current_identity().unwrap().as_str(), "user-b");
    }
}
