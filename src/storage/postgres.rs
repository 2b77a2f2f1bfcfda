use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use super::{Assignment, AuthStore, StoreError, StoreResult, UniqueField};
use crate::model::{
    NewPermission, NewUserRow, Permission, PermissionId, Role, RoleId, User, UserId, UserRowUpdate,
};

const SCHEMA_DDL: &str = include_str!("../../scripts/ddl/001_security.sql");

const USER_COLUMNS: &str = "id, username, email, password, full_name, is_active, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "p.id, p.name, p.display_name, p.description";

/// Postgres backend. One client connection guarded by an async mutex; the
/// admin tool this serves is low-traffic.
pub struct PgStore {
    client: Mutex<Client>,
}

impl PgStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(target: "storage", "postgres connection error: {}", e);
            }
        });
        info!(target: "storage", "connected to postgres");
        Ok(Self { client: Mutex::new(client) })
    }

    /// Create tables if they do not exist. Safe to run on every startup.
    pub async fn install_schema(&self) -> StoreResult<()> {
        self.client.lock().await.batch_execute(SCHEMA_DDL).await?;
        Ok(())
    }
}

fn map_pg(err: tokio_postgres::Error) -> StoreError {
    if let Some(db) = err.as_db_error() {
        if *db.code() == SqlState::UNIQUE_VIOLATION {
            let field = match db.constraint() {
                Some("users_username_key") => Some(UniqueField::Username),
                Some("users_email_key") => Some(UniqueField::Email),
                Some("roles_name_key") => Some(UniqueField::RoleName),
                Some("permissions_name_key") => Some(UniqueField::PermissionName),
                _ => None,
            };
            if let Some(f) = field {
                return StoreError::Unique(f);
            }
        }
        if *db.code() == SqlState::FOREIGN_KEY_VIOLATION {
            return StoreError::NotFound(db.constraint().unwrap_or("referenced row").to_string());
        }
    }
    StoreError::Postgres(err)
}

fn user_from_row(row: &Row) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password")?,
        full_name: row.try_get("full_name")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &Row) -> StoreResult<Role> {
    Ok(Role { id: row.try_get("id")?, name: row.try_get("name")? })
}

fn permission_from_row(row: &Row) -> StoreResult<Permission> {
    Ok(Permission {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
    })
}

impl PgStore {
    async fn one_user(&self, sql: &str, param: &(dyn tokio_postgres::types::ToSql + Sync)) -> StoreResult<Option<User>> {
        let client = self.client.lock().await;
        let row = client.query_opt(sql, &[param]).await.map_err(map_pg)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn permissions(&self, sql: &str, param: &(dyn tokio_postgres::types::ToSql + Sync)) -> StoreResult<Vec<Permission>> {
        let client = self.client.lock().await;
        let rows = client.query(sql, &[param]).await.map_err(map_pg)?;
        rows.iter().map(permission_from_row).collect()
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.one_user(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"), &id).await
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.one_user(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"), &username).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.one_user(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"), &email).await
    }

    async fn insert_user(&self, row: NewUserRow) -> StoreResult<UserId> {
        let client = self.client.lock().await;
        let r = client
            .query_one(
                "INSERT INTO users (username, email, password, full_name, is_active) VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[&row.username, &row.email, &row.password_hash, &row.full_name, &row.is_active],
            )
            .await
            .map_err(map_pg)?;
        Ok(r.try_get("id")?)
    }

    async fn update_user(&self, id: UserId, row: UserRowUpdate) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let n = match &row.password_hash {
            Some(hash) => client
                .execute(
                    "UPDATE users SET username = $1, email = $2, full_name = $3, password = $4, updated_at = now() WHERE id = $5",
                    &[&row.username, &row.email, &row.full_name, hash, &id],
                )
                .await,
            None => client
                .execute(
                    "UPDATE users SET username = $1, email = $2, full_name = $3, updated_at = now() WHERE id = $4",
                    &[&row.username, &row.email, &row.full_name, &id],
                )
                .await,
        }
        .map_err(map_pg)?;
        Ok(n > 0)
    }

    async fn set_user_active(&self, id: UserId, active: bool) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let n = client
            .execute("UPDATE users SET is_active = $1, updated_at = now() WHERE id = $2", &[&active, &id])
            .await
            .map_err(map_pg)?;
        Ok(n > 0)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let client = self.client.lock().await;
        let rows = client
            .query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id DESC"), &[])
            .await
            .map_err(map_pg)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn insert_role(&self, name: &str) -> StoreResult<RoleId> {
        let client = self.client.lock().await;
        let r = client
            .query_one("INSERT INTO roles (name) VALUES ($1) RETURNING id", &[&name])
            .await
            .map_err(map_pg)?;
        Ok(r.try_get("id")?)
    }

    async fn find_role_by_id(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let client = self.client.lock().await;
        let row = client.query_opt("SELECT id, name FROM roles WHERE id = $1", &[&id]).await.map_err(map_pg)?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let client = self.client.lock().await;
        let row = client.query_opt("SELECT id, name FROM roles WHERE name = $1", &[&name]).await.map_err(map_pg)?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let client = self.client.lock().await;
        let rows = client.query("SELECT id, name FROM roles ORDER BY name ASC", &[]).await.map_err(map_pg)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn insert_permission(&self, perm: NewPermission) -> StoreResult<PermissionId> {
        let client = self.client.lock().await;
        let r = client
            .query_one(
                "INSERT INTO permissions (name, display_name, description) VALUES ($1, $2, $3) RETURNING id",
                &[&perm.name, &perm.display_name, &perm.description],
            )
            .await
            .map_err(map_pg)?;
        Ok(r.try_get("id")?)
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.name = $1"), &[&name])
            .await
            .map_err(map_pg)?;
        row.as_ref().map(permission_from_row).transpose()
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let client = self.client.lock().await;
        let rows = client
            .query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions p ORDER BY p.name ASC"), &[])
            .await
            .map_err(map_pg)?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p \
             INNER JOIN role_permission rp ON p.id = rp.permission_id \
             WHERE rp.role_id = $1 ORDER BY p.name ASC"
        );
        self.permissions(&sql, &role_id).await
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<Assignment> {
        let client = self.client.lock().await;
        let n = client
            .execute(
                "INSERT INTO role_user (user_id, role_id) VALUES ($1, $2) ON CONFLICT (user_id, role_id) DO NOTHING",
                &[&user_id, &role_id],
            )
            .await
            .map_err(map_pg)?;
        Ok(if n == 0 { Assignment::AlreadyAssigned } else { Assignment::Inserted })
    }

    async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<Role>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT r.id, r.name FROM roles r \
                 INNER JOIN role_user ru ON r.id = ru.role_id \
                 WHERE ru.user_id = $1 ORDER BY r.name ASC",
                &[&user_id],
            )
            .await
            .map_err(map_pg)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Permission>> {
        let sql = format!(
            "SELECT DISTINCT {PERMISSION_COLUMNS} FROM permissions p \
             INNER JOIN role_permission rp ON p.id = rp.permission_id \
             INNER JOIN role_user ru ON rp.role_id = ru.role_id \
             WHERE ru.user_id = $1 ORDER BY p.name ASC"
        );
        self.permissions(&sql, &user_id).await
    }

    async fn replace_role_permissions(&self, role_id: RoleId, permission_ids: &[PermissionId]) -> StoreResult<()> {
        let mut client = self.client.lock().await;
        // Dropping `tx` without commit rolls back.
        let tx = client.transaction().await.map_err(map_pg)?;
        if tx.query_opt("SELECT id FROM roles WHERE id = $1 FOR UPDATE", &[&role_id]).await.map_err(map_pg)?.is_none() {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        tx.execute("DELETE FROM role_permission WHERE role_id = $1", &[&role_id]).await.map_err(map_pg)?;
        let insert = tx
            .prepare("INSERT INTO role_permission (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .await
            .map_err(map_pg)?;
        for pid in permission_ids {
            tx.execute(&insert, &[&role_id, pid]).await.map_err(map_pg)?;
        }
        tx.commit().await.map_err(map_pg)?;
        Ok(())
    }
}
