use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::{Assignment, AuthStore, StoreError, StoreResult, UniqueField};
use crate::model::{
    NewPermission, NewUserRow, Permission, PermissionId, Role, RoleId, User, UserId, UserRowUpdate,
};

/// Failure points a test can arm on a `MemoryStore`. An armed fault stays armed
/// until `clear_fault` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `permissions_for_user` fails.
    PermissionResolution,
    /// `roles_for_user` fails.
    RoleResolution,
    /// User lookups fail.
    UserLookup,
    /// `replace_role_permissions` fails after the old grants were removed and
    /// before the new ones are written.
    AfterRolePermissionDelete,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    user_roles: BTreeSet<(UserId, RoleId)>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
    next_user_id: UserId,
    next_role_id: RoleId,
    next_permission_id: PermissionId,
}

impl Tables {
    fn username_taken(&self, username: &str, except: Option<UserId>) -> bool {
        self.users.values().any(|u| u.username == username && Some(u.id) != except)
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users.values().any(|u| u.email == email && Some(u.id) != except)
    }

    fn permissions_sorted<'a>(&'a self, ids: impl Iterator<Item = &'a PermissionId>) -> Vec<Permission> {
        let mut out: Vec<Permission> = ids.filter_map(|id| self.permissions.get(id).cloned()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out.dedup_by(|a, b| a.id == b.id);
        out
    }
}

/// In-process backend. All tables sit behind one `RwLock`, so every write is
/// a single critical section and readers never observe a partial update.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: Mutex<HashSet<Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn inject_fault(&self, fault: Fault) { self.faults.lock().insert(fault); }

    pub fn clear_fault(&self, fault: Fault) { self.faults.lock().remove(&fault); }

    fn trip(&self, fault: Fault) -> StoreResult<()> {
        if self.faults.lock().contains(&fault) {
            return Err(StoreError::Injected(fault));
        }
        Ok(())
    }

    /// Number of (user, role) rows for the pair. Used by tests to check idempotency.
    pub fn user_role_rows(&self, user_id: UserId, role_id: RoleId) -> usize {
        self.tables.read().user_roles.iter().filter(|(u, r)| *u == user_id && *r == role_id).count()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.trip(Fault::UserLookup)?;
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.trip(Fault::UserLookup)?;
        Ok(self.tables.read().users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.trip(Fault::UserLookup)?;
        Ok(self.tables.read().users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, row: NewUserRow) -> StoreResult<UserId> {
        let mut t = self.tables.write();
        if t.username_taken(&row.username, None) {
            return Err(StoreError::Unique(UniqueField::Username));
        }
        if t.email_taken(&row.email, None) {
            return Err(StoreError::Unique(UniqueField::Email));
        }
        t.next_user_id += 1;
        let id = t.next_user_id;
        let now = Utc::now();
        t.users.insert(id, User {
            id,
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            password_hash: row.password_hash,
            is_active: row.is_active,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_user(&self, id: UserId, row: UserRowUpdate) -> StoreResult<bool> {
        let mut t = self.tables.write();
        if !t.users.contains_key(&id) {
            return Ok(false);
        }
        if t.username_taken(&row.username, Some(id)) {
            return Err(StoreError::Unique(UniqueField::Username));
        }
        if t.email_taken(&row.email, Some(id)) {
            return Err(StoreError::Unique(UniqueField::Email));
        }
        let Some(user) = t.users.get_mut(&id) else { return Ok(false); };
        user.username = row.username;
        user.email = row.email;
        user.full_name = row.full_name;
        if let Some(hash) = row.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_user_active(&self, id: UserId, active: bool) -> StoreResult<bool> {
        let mut t = self.tables.write();
        match t.users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.tables.read().users.values().rev().cloned().collect())
    }

    async fn insert_role(&self, name: &str) -> StoreResult<RoleId> {
        let mut t = self.tables.write();
        if t.roles.values().any(|r| r.name == name) {
            return Err(StoreError::Unique(UniqueField::RoleName));
        }
        t.next_role_id += 1;
        let id = t.next_role_id;
        t.roles.insert(id, Role { id, name: name.to_string() });
        Ok(id)
    }

    async fn find_role_by_id(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.tables.read().roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self.tables.read().roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.tables.read().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn insert_permission(&self, perm: NewPermission) -> StoreResult<PermissionId> {
        let mut t = self.tables.write();
        if t.permissions.values().any(|p| p.name == perm.name) {
            return Err(StoreError::Unique(UniqueField::PermissionName));
        }
        t.next_permission_id += 1;
        let id = t.next_permission_id;
        t.permissions.insert(id, Permission {
            id,
            name: perm.name,
            display_name: perm.display_name,
            description: perm.description,
        });
        Ok(id)
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        Ok(self.tables.read().permissions.values().find(|p| p.name == name).cloned())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let t = self.tables.read();
        Ok(t.permissions_sorted(t.permissions.keys()))
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        let t = self.tables.read();
        let ids = t.role_permissions.iter().filter(|(r, _)| *r == role_id).map(|(_, p)| p);
        Ok(t.permissions_sorted(ids))
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<Assignment> {
        let mut t = self.tables.write();
        if !t.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        if t.user_roles.insert((user_id, role_id)) {
            Ok(Assignment::Inserted)
        } else {
            Ok(Assignment::AlreadyAssigned)
        }
    }

    async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<Role>> {
        self.trip(Fault::RoleResolution)?;
        let t = self.tables.read();
        let mut roles: Vec<Role> = t
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| t.roles.get(r).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Permission>> {
        self.trip(Fault::PermissionResolution)?;
        let t = self.tables.read();
        let role_ids: BTreeSet<RoleId> = t.user_roles.iter().filter(|(u, _)| *u == user_id).map(|(_, r)| *r).collect();
        let perm_ids: BTreeSet<PermissionId> = t
            .role_permissions
            .iter()
            .filter(|(r, _)| role_ids.contains(r))
            .map(|(_, p)| *p)
            .collect();
        Ok(t.permissions_sorted(perm_ids.iter()))
    }

    async fn replace_role_permissions(&self, role_id: RoleId, permission_ids: &[PermissionId]) -> StoreResult<()> {
        let mut t = self.tables.write();
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        // Work on a copy; the live table is only replaced once every step succeeded.
        let mut staged = t.role_permissions.clone();
        staged.retain(|(r, _)| *r != role_id);
        self.trip(Fault::AfterRolePermissionDelete)?;
        for pid in permission_ids {
            if !t.permissions.contains_key(pid) {
                return Err(StoreError::NotFound(format!("permission {pid}")));
            }
            staged.insert((role_id, *pid));
        }
        t.role_permissions = staged;
        Ok(())
    }
}
