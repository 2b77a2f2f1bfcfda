//!
//! registrar storage seam
//! ----------------------
//! `AuthStore` is the relational interface the credential store, the role graph
//! and the authorization evaluator talk to. Two backends implement it:
//!
//! - `MemoryStore`: lock-guarded tables with unique indexes, used by tests and
//!   by the server when no database URL is configured.
//! - `PgStore`: tokio-postgres with parameterized statements and real transactions.
//!
//! All methods return "not found" as `Ok(None)` rather than an error.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    NewPermission, NewUserRow, Permission, PermissionId, Role, RoleId, User, UserId, UserRowUpdate,
};

mod memory;
mod postgres;
pub mod bootstrap;

pub use memory::{Fault, MemoryStore};
pub use postgres::PgStore;

/// Column protected by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    RoleName,
    PermissionName,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
            UniqueField::RoleName => "role name",
            UniqueField::PermissionName => "permission name",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {}", .0.as_str())]
    Unique(UniqueField),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("injected fault: {0:?}")]
    Injected(Fault),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an idempotent role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Inserted,
    AlreadyAssigned,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // --- users ---
    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Insert and return the new id. Uniqueness is enforced by the store.
    async fn insert_user(&self, row: NewUserRow) -> StoreResult<UserId>;
    /// Returns false when no row has that id.
    async fn update_user(&self, id: UserId, row: UserRowUpdate) -> StoreResult<bool>;
    async fn set_user_active(&self, id: UserId, active: bool) -> StoreResult<bool>;
    /// All users, newest first.
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    // --- role / permission catalog ---
    async fn insert_role(&self, name: &str) -> StoreResult<RoleId>;
    async fn find_role_by_id(&self, id: RoleId) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;
    /// Ordered by name.
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    async fn insert_permission(&self, perm: NewPermission) -> StoreResult<PermissionId>;
    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;
    /// Ordered by name.
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;
    /// Ordered by name.
    async fn permissions_for_role(&self, role_id: RoleId) -> StoreResult<Vec<Permission>>;

    // --- joins ---
    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<Assignment>;
    /// Roles held by a user, ordered by name.
    async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<Role>>;
    /// Distinct permissions reachable through any of the user's roles, resolved
    /// with a single user→role→permission join, ordered by name.
    async fn permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Permission>>;
    /// Atomically replace the role's grants with `permission_ids`.
    async fn replace_role_permissions(&self, role_id: RoleId, permission_ids: &[PermissionId]) -> StoreResult<()>;
}
