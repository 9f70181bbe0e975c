//! Identifiers for release resources

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaced identity of a release resource.
///
/// The same identity always maps to the same lock key, so every controller
/// replica contends on one primitive per release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseIdentity {
    pub namespace: String,
    pub name: String,
}

impl ReleaseIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a sibling resource in the same namespace
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }

    /// Key used by release locks. Resource names never contain `_`.
    pub fn lock_key(&self) -> String {
        format!("{}_{}", self.name, self.namespace)
    }
}

impl fmt::Display for ReleaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = ReleaseIdentity::new("apps", "podinfo");
        assert_eq!(id.to_string(), "apps/podinfo");
    }

    #[test]
    fn test_lock_key_is_stable() {
        let a = ReleaseIdentity::new("apps", "podinfo");
        let b = ReleaseIdentity::new("apps".to_string(), "podinfo".to_string());
        assert_eq!(a.lock_key(), "podinfo_apps");
        assert_eq!(a.lock_key(), b.lock_key());
    }

    #[test]
    fn test_lock_keys_do_not_collide_across_namespaces() {
        let a = ReleaseIdentity::new("c", "a-b");
        let b = ReleaseIdentity::new("b-c", "a");
        assert_ne!(a.lock_key(), b.lock_key());
    }

    #[test]
    fn test_sibling_shares_namespace() {
        let id = ReleaseIdentity::new("apps", "frontend");
        assert_eq!(id.sibling("db"), ReleaseIdentity::new("apps", "db"));
    }
}
