//! Role/permission graph: the persisted user↔role and role↔permission relations.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::model::{group_by_category, Permission, PermissionGroup, PermissionId, Role, RoleId, UserId};
use crate::storage::{Assignment, AuthStore, StoreResult};

#[derive(Clone)]
pub struct RoleGraph {
    store: Arc<dyn AuthStore>,
}

impl RoleGraph {
    pub fn new(store: Arc<dyn AuthStore>) -> Self { Self { store } }

    pub async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        self.store.find_role_by_name(name).await
    }

    pub async fn all_roles(&self) -> StoreResult<Vec<Role>> {
        self.store.list_roles().await
    }

    /// Whole catalog, ordered by name.
    pub async fn all_permissions(&self) -> StoreResult<Vec<Permission>> {
        self.store.list_permissions().await
    }

    /// Catalog grouped by the prefix before the first dot. Display only.
    pub async fn grouped_permissions(&self) -> StoreResult<Vec<PermissionGroup>> {
        Ok(group_by_category(self.store.list_permissions().await?))
    }

    pub async fn permissions_for_role(&self, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        self.store.permissions_for_role(role_id).await
    }

    pub async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<Role>> {
        self.store.roles_for_user(user_id).await
    }

    /// Idempotent. A repeated assignment reports `AlreadyAssigned` instead of failing.
    pub async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<Assignment> {
        let outcome = self.store.assign_role(user_id, role_id).await?;
        match outcome {
            Assignment::Inserted => info!(target: "auth", user_id, role_id, "role assigned"),
            Assignment::AlreadyAssigned => debug!(target: "auth", user_id, role_id, "role already assigned"),
        }
        Ok(outcome)
    }

    /// Replace the role's grants in one transaction. On failure the previous
    /// grants are left untouched.
    pub async fn sync_role_permissions(&self, role_id: RoleId, permission_ids: &[PermissionId]) -> StoreResult<()> {
        match self.store.replace_role_permissions(role_id, permission_ids).await {
            Ok(()) => {
                info!(target: "auth", role_id, grants = permission_ids.len(), "role permissions synced");
                Ok(())
            }
            Err(e) => {
                error!(target: "storage", role_id, "sync_role_permissions failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewPermission;
    use crate::storage::{Fault, MemoryStore, StoreError};

    async fn seeded() -> (Arc<MemoryStore>, RoleGraph, RoleId, Vec<PermissionId>) {
        let mem = Arc::new(MemoryStore::new());
        let role = mem.insert_role("editor").await.unwrap();
        let mut ids = Vec::new();
        for name in ["students.view", "students.edit", "reports.view", "misc"] {
            ids.push(
                mem.insert_permission(NewPermission { name: name.into(), display_name: name.into(), description: None })
                    .await
                    .unwrap(),
            );
        }
        let graph = RoleGraph::new(mem.clone());
        (mem, graph, role, ids)
    }

    #[tokio::test]
    async fn sync_replaces_grants() {
        let (_mem, graph, role, ids) = seeded().await;
        graph.sync_role_permissions(role, &ids[..2]).await.unwrap();
        graph.sync_role_permissions(role, &ids[1..3]).await.unwrap();
        let names: Vec<String> = graph.permissions_for_role(role).await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["reports.view".to_string(), "students.edit".to_string()]);
    }

    #[tokio::test]
    async fn failed_sync_keeps_previous_grants() {
        let (mem, graph, role, ids) = seeded().await;
        graph.sync_role_permissions(role, &ids[..2]).await.unwrap();
        let before = graph.permissions_for_role(role).await.unwrap();

        mem.inject_fault(Fault::AfterRolePermissionDelete);
        let err = graph.sync_role_permissions(role, &ids[2..]).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(Fault::AfterRolePermissionDelete)));
        mem.clear_fault(Fault::AfterRolePermissionDelete);

        assert_eq!(graph.permissions_for_role(role).await.unwrap(), before);
    }

    #[tokio::test]
    async fn grouped_catalog_uses_prefix() {
        let (_mem, graph, _role, _ids) = seeded().await;
        let groups = graph.grouped_permissions().await.unwrap();
        let cats: Vec<&str> = groups.iter().map(|g| g.category.as_str()).collect();
        assert_eq!(cats, vec!["other", "reports", "students"]);
    }
}
