//! First-run seeding: the role/permission catalog and a default administrator.
//! Both steps are idempotent and run on every startup.

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{AuthStore, StoreResult};
use crate::model::{NewPermission, NewUserRow, ROLE_ADMIN, ROLE_USER};

/// (name, display name, description)
pub const DEFAULT_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("roles.manage", "Manage roles", "Change which permissions each role grants"),
    ("students.create", "Create students", "Add new student records"),
    ("students.delete", "Delete students", "Remove student records"),
    ("students.edit", "Edit students", "Modify existing student records"),
    ("students.view", "View students", "List and view student records"),
    ("users.register", "Register users", "Create new user accounts"),
];

/// Grants applied to a role when the role is first created. Later edits made
/// through the admin endpoints are never overwritten.
pub const DEFAULT_ROLE_GRANTS: &[(&str, &[&str])] = &[
    (ROLE_ADMIN, &["roles.manage", "students.create", "students.delete", "students.edit", "students.view", "users.register"]),
    (ROLE_USER, &["students.view"]),
];

/// Credentials for the administrator created on first run.
#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: Option<String>,
}

pub async fn ensure_catalog(store: &dyn AuthStore) -> StoreResult<()> {
    let mut created = 0usize;
    for (name, display_name, description) in DEFAULT_PERMISSIONS {
        if store.find_permission_by_name(name).await?.is_none() {
            store
                .insert_permission(NewPermission {
                    name: name.to_string(),
                    display_name: display_name.to_string(),
                    description: Some(description.to_string()),
                })
                .await?;
            created += 1;
        }
    }
    for (role_name, grants) in DEFAULT_ROLE_GRANTS {
        if store.find_role_by_name(role_name).await?.is_some() {
            continue;
        }
        let role_id = store.insert_role(role_name).await?;
        let mut ids = Vec::with_capacity(grants.len());
        for g in grants.iter() {
            if let Some(p) = store.find_permission_by_name(g).await? {
                ids.push(p.id);
            }
        }
        store.replace_role_permissions(role_id, &ids).await?;
        info!(target: "startup", role = *role_name, grants = ids.len(), "seeded role");
    }
    if created > 0 {
        info!(target: "startup", created, "seeded permission catalog");
    }
    Ok(())
}

/// Create the administrator account when it does not exist yet. Without a
/// configured password nothing is created. Returns true when an account was created.
pub async fn ensure_default_admin(store: &dyn AuthStore, seed: &AdminSeed) -> Result<bool> {
    if store.find_user_by_username(&seed.username).await?.is_some() {
        return Ok(false);
    }
    let Some(password) = seed.password.as_deref().filter(|p| !p.is_empty()) else {
        warn!(
            target: "startup",
            "no administrator '{}' exists and no admin password is configured; set REGISTRAR_ADMIN_PASSWORD to create one",
            seed.username
        );
        return Ok(false);
    };
    let hash = crate::security::hash_password(password)?;
    let id = store
        .insert_user(NewUserRow {
            username: seed.username.clone(),
            email: seed.email.clone(),
            full_name: seed.full_name.clone(),
            password_hash: hash,
            is_active: true,
        })
        .await
        .with_context(|| format!("While creating default admin '{}'", seed.username))?;
    let role = store
        .find_role_by_name(ROLE_ADMIN)
        .await?
        .context("admin role missing; run ensure_catalog first")?;
    store.assign_role(id, role.id).await?;
    info!(target: "startup", user_id = id, username = %seed.username, "created default administrator");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn catalog_seeding_is_idempotent() {
        let store = MemoryStore::new();
        ensure_catalog(&store).await.unwrap();
        ensure_catalog(&store).await.unwrap();
        assert_eq!(store.list_permissions().await.unwrap().len(), DEFAULT_PERMISSIONS.len());
        let user = store.find_role_by_name(ROLE_USER).await.unwrap().unwrap();
        let names: Vec<String> = store.permissions_for_role(user.id).await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["students.view".to_string()]);
    }

    #[tokio::test]
    async fn reseeding_keeps_edited_grants() {
        let store = MemoryStore::new();
        ensure_catalog(&store).await.unwrap();
        let user = store.find_role_by_name(ROLE_USER).await.unwrap().unwrap();
        store.replace_role_permissions(user.id, &[]).await.unwrap();
        ensure_catalog(&store).await.unwrap();
        assert!(store.permissions_for_role(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_requires_password() {
        let store = MemoryStore::new();
        ensure_catalog(&store).await.unwrap();
        let mut seed = AdminSeed { username: "admin".into(), email: "admin@localhost.localdomain".into(), full_name: "Administrator".into(), password: None };
        assert!(!ensure_default_admin(&store, &seed).await.unwrap());
        seed.password = Some("changeme".into());
        assert!(ensure_default_admin(&store, &seed).await.unwrap());
        assert!(!ensure_default_admin(&store, &seed).await.unwrap());
        let admin = store.find_user_by_username("admin").await.unwrap().unwrap();
        let roles = store.roles_for_user(admin.id).await.unwrap();
        assert_eq!(roles[0].name, ROLE_ADMIN);
    }
}
