//! Typed records for users, roles and permissions.
//!
//! `User` is the storage-side record and carries the password hash. Everything
//! that leaves the credential store (sessions, responses, logs) uses
//! `PublicUser`, which has no hash field at all.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type RoleId = i64;
pub type PermissionId = i64;

/// Role name that the admin-only guards check for.
pub const ROLE_ADMIN: &str = "admin";
/// Role every newly registered account receives.
pub const ROLE_USER: &str = "user";

const DEFAULT_CATEGORY: &str = "other";
const CATEGORY_SEPARATOR: char = '.';

#[derive(Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// Keep the hash out of debug output and therefore out of logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("password_hash", &"<redacted>")
            .field("is_active", &self.is_active)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when registering an account. The password is plaintext here
/// and is hashed by the credential store before it reaches storage.
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub is_active: bool,
}

/// Row handed to the storage backend on insert.
#[derive(Debug, Clone)]
pub struct NewUserRow {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub is_active: bool,
}

/// Profile changes. `password: None` (or an empty string) keeps the current hash.
#[derive(Clone, Default)]
pub struct UserChanges {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserRowUpdate {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Permission {
    pub fn category(&self) -> &str { permission_category(&self.name) }
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
}

/// Display grouping key: the part of `students.create` before the first dot.
/// Has no authorization meaning.
pub fn permission_category(name: &str) -> &str {
    match name.split_once(CATEGORY_SEPARATOR) {
        Some((prefix, _)) if !prefix.is_empty() => prefix,
        _ => DEFAULT_CATEGORY,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PermissionGroup {
    pub category: String,
    pub permissions: Vec<Permission>,
}

/// Group permissions by category, categories in name order, members kept in
/// input order.
pub fn group_by_category(perms: Vec<Permission>) -> Vec<PermissionGroup> {
    let mut groups: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
    for p in perms {
        groups.entry(p.category().to_string()).or_default().push(p);
    }
    groups
        .into_iter()
        .map(|(category, permissions)| PermissionGroup { category, permissions })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(id: i64, name: &str) -> Permission {
        Permission { id, name: name.into(), display_name: name.into(), description: None }
    }

    #[test]
    fn category_is_prefix_before_first_dot() {
        assert_eq!(permission_category("students.create"), "students");
        assert_eq!(permission_category("reports.export.csv"), "reports");
        assert_eq!(permission_category("dashboard"), "other");
        assert_eq!(permission_category(".hidden"), "other");
    }

    #[test]
    fn grouping_is_ordered_by_category() {
        let groups = group_by_category(vec![
            perm(1, "users.view"),
            perm(2, "students.create"),
            perm(3, "students.view"),
            perm(4, "misc"),
        ]);
        let cats: Vec<&str> = groups.iter().map(|g| g.category.as_str()).collect();
        assert_eq!(cats, vec!["other", "students", "users"]);
        assert_eq!(groups[1].permissions.len(), 2);
    }

    #[test]
    fn debug_output_redacts_hash() {
        let now = Utc::now();
        let u = User {
            id: 1,
            username: "alice".into(),
            email: "alice@x.com".into(),
            full_name: "Alice".into(),
            password_hash: "$argon2id$secret".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let dbg = format!("{u:?}");
        assert!(!dbg.contains("argon2id"));
        assert_eq!(u.to_public().username, "alice");
    }
}
