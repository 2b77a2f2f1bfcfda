use std::collections::BTreeSet;

use serde::Serialize;
use tracing::error;

use crate::model::UserId;
use crate::storage::{AuthStore, StoreResult};

/// Deduplicated permission names, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, name: &str) -> bool { self.0.contains(name) }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Permissions held by a session. `Unavailable` is what a failed resolution
/// produces; it denies everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "permissions", rename_all = "snake_case")]
pub enum Grants {
    Resolved(PermissionSet),
    Unavailable,
}

impl Grants {
    pub fn has(&self, name: &str) -> bool {
        match self {
            Grants::Resolved(set) => set.contains(name),
            Grants::Unavailable => false,
        }
    }

    /// Stops at the first held name.
    pub fn has_any(&self, names: &[&str]) -> bool {
        match self {
            Grants::Resolved(set) => names.iter().any(|n| set.contains(n)),
            Grants::Unavailable => false,
        }
    }

    /// Stops at the first missing name. An empty list is satisfied only when
    /// the grants were actually resolved.
    pub fn has_all(&self, names: &[&str]) -> bool {
        match self {
            Grants::Resolved(set) => names.iter().all(|n| set.contains(n)),
            Grants::Unavailable => false,
        }
    }

    pub fn is_resolved(&self) -> bool { matches!(self, Grants::Resolved(_)) }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Grants::Resolved(set) => set.iter().collect(),
            Grants::Unavailable => Vec::new(),
        }
    }
}

/// Union of every permission reachable through any of the user's roles, via
/// the store's single user→role→permission join.
pub async fn resolve_permissions(store: &dyn AuthStore, user_id: UserId) -> StoreResult<PermissionSet> {
    let perms = store.permissions_for_user(user_id).await?;
    Ok(PermissionSet::from_names(perms.into_iter().map(|p| p.name)))
}

/// Fail-closed resolution: a storage error is logged and yields `Grants::Unavailable`.
pub async fn grants_for(store: &dyn AuthStore, user_id: UserId) -> Grants {
    match resolve_permissions(store, user_id).await {
        Ok(set) => Grants::Resolved(set),
        Err(e) => {
            error!(target: "storage", user_id, "resolve_permissions failed; denying all permissions: {}", e);
            Grants::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(names: &[&str]) -> Grants { Grants::Resolved(PermissionSet::from_names(names.iter().copied())) }

    #[test]
    fn union_checks() {
        let g = grants(&["a", "b", "c"]);
        assert!(g.has("b"));
        assert!(g.has_all(&["a", "c"]));
        assert!(!g.has_all(&["a", "d"]));
        assert!(g.has_any(&["d", "c"]));
        assert!(!g.has_any(&["d", "e"]));
    }

    #[test]
    fn empty_lists() {
        let g = grants(&["a"]);
        assert!(g.has_all(&[]));
        assert!(!g.has_any(&[]));
        assert!(!Grants::Unavailable.has_all(&[]));
    }

    #[test]
    fn unavailable_denies_everything() {
        let g = Grants::Unavailable;
        assert!(!g.has("a"));
        assert!(!g.has_any(&["a"]));
        assert!(!g.has_all(&["a"]));
        assert!(g.names().is_empty());
    }

    #[test]
    fn set_is_sorted_and_deduplicated() {
        let s = PermissionSet::from_names(["b", "a", "b"]);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(s.len(), 2);
    }
}
