use serde::Serialize;

use crate::model::{PublicUser, Role, UserId, ROLE_ADMIN};

use super::authorizer::Grants;

/// Who an authenticated session belongs to. Holds the scrubbed user record
/// together with the roles and permissions resolved at login; the set is not
/// re-read from storage while the session lives, unless it was unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    pub user: PublicUser,
    pub roles: Vec<Role>,
    pub grants: Grants,
}

impl SessionIdentity {
    pub fn user_id(&self) -> UserId { self.user.id }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }

    pub fn is_admin(&self) -> bool { self.has_role(ROLE_ADMIN) }

    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }

    /// Full name, falling back to the username when it is blank.
    pub fn display_name(&self) -> &str {
        let full = self.user.full_name.trim();
        if full.is_empty() { &self.user.username } else { full }
    }
}
