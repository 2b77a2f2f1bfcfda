//! Credential store: user records, password hashing and verification.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{NewUser, NewUserRow, PublicUser, User, UserChanges, UserId, UserRowUpdate};
use crate::security;
use crate::storage::{AuthStore, StoreError, UniqueField};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{} is already taken", .0.as_str())]
    Taken(UniqueField),
    #[error("user {0} not found")]
    NotFound(UserId),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CredentialError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unique(field) => CredentialError::Taken(field),
            other => CredentialError::Store(other),
        }
    }
}

/// Why an authentication attempt failed. Only used for server-side logging;
/// callers of `authenticate` see a plain `None` for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    UnknownIdentifier,
    WrongPassword,
    Inactive,
}

#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn AuthStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn AuthStore>) -> Self { Self { store } }

    pub async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.store.find_user_by_id(id).await
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.store.find_user_by_username(username).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.store.find_user_by_email(email).await
    }

    pub async fn all(&self) -> Result<Vec<PublicUser>, StoreError> {
        Ok(self.store.list_users().await?.iter().map(User::to_public).collect())
    }

    /// Hash the password and insert the user.
    pub async fn create(&self, new: NewUser) -> Result<UserId, CredentialError> {
        let password_hash = security::hash_password(&new.password).map_err(|e| CredentialError::Hash(e.to_string()))?;
        let id = self
            .store
            .insert_user(NewUserRow {
                username: new.username,
                email: new.email,
                full_name: new.full_name,
                password_hash,
                is_active: new.is_active,
            })
            .await?;
        Ok(id)
    }

    /// Update profile fields. The hash changes only when a non-empty password is supplied.
    pub async fn update(&self, id: UserId, changes: UserChanges) -> Result<(), CredentialError> {
        let password_hash = match changes.password.as_deref().filter(|p| !p.is_empty()) {
            Some(pw) => Some(security::hash_password(pw).map_err(|e| CredentialError::Hash(e.to_string()))?),
            None => None,
        };
        let updated = self
            .store
            .update_user(id, UserRowUpdate {
                username: changes.username,
                email: changes.email,
                full_name: changes.full_name,
                password_hash,
            })
            .await?;
        if !updated {
            return Err(CredentialError::NotFound(id));
        }
        Ok(())
    }

    pub async fn set_active(&self, id: UserId, active: bool) -> Result<(), CredentialError> {
        if !self.store.set_user_active(id, active).await? {
            return Err(CredentialError::NotFound(id));
        }
        Ok(())
    }

    /// Resolve `identifier` as a username, then as an email, and verify the
    /// password. Returns the public view of the user only for a matching
    /// password on an active account; every other case is `Ok(None)`.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> Result<Option<PublicUser>, StoreError> {
        let user = match self.store.find_user_by_username(identifier).await? {
            Some(u) => Some(u),
            None => self.store.find_user_by_email(identifier).await?,
        };
        let verdict = match &user {
            None => Err(Rejection::UnknownIdentifier),
            Some(u) if !security::verify_password(&u.password_hash, password) => Err(Rejection::WrongPassword),
            Some(u) if !u.is_active => Err(Rejection::Inactive),
            Some(u) => Ok(u.to_public()),
        };
        match verdict {
            Ok(public) => {
                debug!(target: "auth", user_id = public.id, "credentials verified");
                Ok(Some(public))
            }
            Err(reason) => {
                info!(target: "auth.audit", identifier = %identifier, "authentication failed");
                debug!(target: "auth", identifier = %identifier, ?reason, "authentication rejection detail");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn new_user(username: &str, email: &str, password: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            full_name: format!("{username} test"),
            password: password.into(),
            is_active: true,
        }
    }

    fn creds() -> CredentialStore { CredentialStore::new(Arc::new(MemoryStore::new())) }

    #[tokio::test]
    async fn authenticate_by_username_and_email() {
        let c = creds();
        let id = c.create(new_user("alice", "alice@x.com", "secret1")).await.unwrap();
        let by_name = c.authenticate("alice", "secret1").await.unwrap().unwrap();
        assert_eq!(by_name.id, id);
        let by_mail = c.authenticate("alice@x.com", "secret1").await.unwrap().unwrap();
        assert_eq!(by_mail.id, id);
    }

    #[tokio::test]
    async fn every_failure_looks_the_same() {
        let c = creds();
        let id = c.create(new_user("alice", "alice@x.com", "secret1")).await.unwrap();
        assert!(c.authenticate("alice", "secret1x").await.unwrap().is_none());
        assert!(c.authenticate("nobody", "secret1").await.unwrap().is_none());
        c.set_active(id, false).await.unwrap();
        assert!(c.authenticate("alice", "secret1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_hash_differs_per_user_with_same_password() {
        let c = creds();
        let a = c.create(new_user("a1", "a1@x.com", "same-pass")).await.unwrap();
        let b = c.create(new_user("b1", "b1@x.com", "same-pass")).await.unwrap();
        let ha = c.find_by_id(a).await.unwrap().unwrap().password_hash;
        let hb = c.find_by_id(b).await.unwrap().unwrap().password_hash;
        assert_ne!(ha, hb);
        assert!(security::verify_password(&ha, "same-pass"));
        assert!(security::verify_password(&hb, "same-pass"));
    }

    #[tokio::test]
    async fn duplicate_create_is_a_distinct_error() {
        let c = creds();
        c.create(new_user("alice", "alice@x.com", "secret1")).await.unwrap();
        let err = c.create(new_user("alice", "other@x.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, CredentialError::Taken(UniqueField::Username)));
        let err = c.create(new_user("alice2", "alice@x.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, CredentialError::Taken(UniqueField::Email)));
    }

    #[tokio::test]
    async fn update_changes_password_only_when_supplied() {
        let c = creds();
        let id = c.create(new_user("alice", "alice@x.com", "secret1")).await.unwrap();
        let keep = UserChanges { username: "alice".into(), email: "alice@y.com".into(), full_name: "Alice Y".into(), password: Some(String::new()) };
        c.update(id, keep).await.unwrap();
        assert!(c.authenticate("alice@y.com", "secret1").await.unwrap().is_some());

        let change = UserChanges { username: "alice".into(), email: "alice@y.com".into(), full_name: "Alice Y".into(), password: Some("newpass".into()) };
        c.update(id, change).await.unwrap();
        assert!(c.authenticate("alice", "secret1").await.unwrap().is_none());
        assert!(c.authenticate("alice", "newpass").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_unknown_user() {
        let c = creds();
        let err = c.update(77, UserChanges { username: "x".into(), email: "x@x.com".into(), full_name: "x".into(), password: None }).await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(77)));
    }
}
