use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::CredentialStore;
use crate::error::{AppError, AppResult};
use crate::model::{NewUser, PublicUser, UserChanges, UserId, ROLE_USER};
use crate::roles::RoleGraph;
use crate::storage::{AuthStore, StoreResult};
use crate::validation::{Rule, ValidationErrors, Validator};

use super::authorizer::grants_for;
use super::principal::SessionIdentity;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 6;
/// Column widths of `users.email` and `users.full_name`.
pub const MAX_EMAIL_LENGTH: usize = 255;
pub const MAX_FULL_NAME_LENGTH: usize = 100;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

/// Result of a profile update.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub user: PublicUser,
    pub password_changed: bool,
}

/// Ties the credential store, the role graph and permission resolution
/// together into the login, registration and profile flows.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    credentials: CredentialStore,
    roles: RoleGraph,
}

impl AuthService {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self {
            credentials: CredentialStore::new(store.clone()),
            roles: RoleGraph::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &dyn AuthStore { self.store.as_ref() }

    pub fn credentials(&self) -> &CredentialStore { &self.credentials }

    pub fn roles(&self) -> &RoleGraph { &self.roles }

    /// `Ok(None)` covers unknown identifier, wrong password and inactive account alike.
    pub async fn login(&self, req: &LoginRequest) -> StoreResult<Option<SessionIdentity>> {
        let Some(user) = self.credentials.authenticate(&req.identifier, &req.password).await? else {
            return Ok(None);
        };
        Ok(Some(self.identity_for(user).await?))
    }

    /// Load roles and permissions for an authenticated user. Permission
    /// resolution fails closed; a role lookup failure is returned.
    pub async fn identity_for(&self, user: PublicUser) -> StoreResult<SessionIdentity> {
        let roles = self.roles.roles_for_user(user.id).await?;
        let grants = grants_for(self.store.as_ref(), user.id).await;
        Ok(SessionIdentity { user, roles, grants })
    }

    /// Retry permission resolution for an identity whose grants were
    /// unavailable. Returns true when the identity changed.
    pub async fn refresh_grants(&self, identity: &mut SessionIdentity) -> bool {
        if identity.grants.is_resolved() {
            return false;
        }
        let grants = grants_for(self.store.as_ref(), identity.user_id()).await;
        if !grants.is_resolved() {
            return false;
        }
        info!(target: "auth", user_id = identity.user_id(), "permissions resolved after earlier outage");
        identity.grants = grants;
        true
    }

    /// Admin registration. The new account gets the default `user` role.
    pub async fn register(&self, input: &BTreeMap<String, String>) -> AppResult<PublicUser> {
        let data = Validator::new(input)
            .rule_msg("username", Rule::Required, "Username is required")
            .rule("username", Rule::MinLength(MIN_USERNAME_LENGTH))
            .rule("username", Rule::MaxLength(MAX_USERNAME_LENGTH))
            .rule_msg("email", Rule::Required, "Email is required")
            .rule_msg("email", Rule::Email, "Email address is not valid")
            .rule("email", Rule::MaxLength(MAX_EMAIL_LENGTH))
            .rule_msg("full_name", Rule::Required, "Full name is required")
            .rule("full_name", Rule::MaxLength(MAX_FULL_NAME_LENGTH))
            .rule_msg("password", Rule::Required, "Password is required")
            .rule("password", Rule::MinLength(MIN_PASSWORD_LENGTH))
            .rule_msg("password_confirmation", Rule::Required, "Please confirm the password")
            .rule_msg("password_confirmation", Rule::Matches("password"), "Passwords do not match")
            .validate()?;

        let username = &data["username"];
        let email = &data["email"];
        let mut errors = ValidationErrors::default();
        if self.credentials.find_by_username(username).await?.is_some() {
            errors.add("username", "This username is already taken");
        }
        if self.credentials.find_by_email(email).await?.is_some() {
            errors.add("email", "This email is already registered");
        }
        if !errors.is_empty() {
            return Err(AppError::validation(errors));
        }

        let id = self
            .credentials
            .create(NewUser {
                username: username.clone(),
                email: email.clone(),
                full_name: data["full_name"].clone(),
                password: raw_password(input, "password"),
                is_active: true,
            })
            .await?;

        match self.roles.find_role_by_name(ROLE_USER).await? {
            Some(role) => {
                self.roles.assign_role(id, role.id).await?;
            }
            None => warn!(target: "auth", user_id = id, "default role '{}' missing; user has no roles", ROLE_USER),
        }

        let user = self
            .credentials
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::internal("user_missing", "registered user vanished"))?;
        Ok(user.to_public())
    }

    /// Update the caller's own profile. The password changes only when a new
    /// one is supplied.
    pub async fn update_profile(&self, user_id: UserId, input: &BTreeMap<String, String>) -> AppResult<ProfileUpdate> {
        let data = Validator::new(input)
            .rule_msg("username", Rule::Required, "Username is required")
            .rule("username", Rule::MinLength(MIN_USERNAME_LENGTH))
            .rule("username", Rule::MaxLength(MAX_USERNAME_LENGTH))
            .rule_msg("email", Rule::Required, "Email is required")
            .rule_msg("email", Rule::Email, "Email address is not valid")
            .rule("email", Rule::MaxLength(MAX_EMAIL_LENGTH))
            .rule_msg("full_name", Rule::Required, "Full name is required")
            .rule("full_name", Rule::MaxLength(MAX_FULL_NAME_LENGTH))
            .rule("password", Rule::MinLength(MIN_PASSWORD_LENGTH))
            .rule_msg("password", Rule::Matches("password_confirmation"), "Passwords do not match")
            .validate()?;

        let mut errors = ValidationErrors::default();
        if let Some(other) = self.credentials.find_by_username(&data["username"]).await? {
            if other.id != user_id {
                errors.add("username", "This username is already taken");
            }
        }
        if let Some(other) = self.credentials.find_by_email(&data["email"]).await? {
            if other.id != user_id {
                errors.add("email", "This email is already registered");
            }
        }
        if !errors.is_empty() {
            return Err(AppError::validation(errors));
        }

        let password = raw_password(input, "password");
        let password_changed = !password.trim().is_empty();
        self.credentials
            .update(user_id, UserChanges {
                username: data["username"].clone(),
                email: data["email"].clone(),
                full_name: data["full_name"].clone(),
                password: password_changed.then_some(password),
            })
            .await?;

        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user_not_found".to_string(), format!("user {user_id} not found")))?;
        info!(target: "auth", user_id, password_changed, "profile updated");
        Ok(ProfileUpdate { user: user.to_public(), password_changed })
    }
}

/// Passwords are used as typed; only the validator sees them trimmed.
fn raw_password(input: &BTreeMap<String, String>, field: &str) -> String {
    input.get(field).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::bootstrap::ensure_catalog;
    use crate::storage::{Fault, MemoryStore};

    fn form(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn alice() -> BTreeMap<String, String> {
        form(&[
            ("username", "alice"),
            ("email", "alice@x.com"),
            ("full_name", "Alice Doe"),
            ("password", "secret1"),
            ("password_confirmation", "secret1"),
        ])
    }

    async fn service() -> (Arc<MemoryStore>, AuthService) {
        let mem = Arc::new(MemoryStore::new());
        ensure_catalog(mem.as_ref()).await.unwrap();
        (mem.clone(), AuthService::new(mem))
    }

    #[tokio::test]
    async fn register_then_login_resolves_default_role() {
        let (_mem, svc) = service().await;
        svc.register(&alice()).await.unwrap();
        let ident = svc
            .login(&LoginRequest { identifier: "alice".into(), password: "secret1".into() })
            .await
            .unwrap()
            .unwrap();
        assert!(ident.has_role(ROLE_USER));
        assert!(ident.grants.has("students.view"));
        assert!(!ident.grants.has("students.delete"));
    }

    #[tokio::test]
    async fn register_reports_duplicates_per_field() {
        let (_mem, svc) = service().await;
        svc.register(&alice()).await.unwrap();
        let err = svc.register(&alice()).await.unwrap_err();
        match err {
            AppError::Validation { fields, .. } => {
                assert!(fields.contains_key("username"));
                assert!(fields.contains_key("email"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (_mem, svc) = service().await;
        let mut bad = alice();
        bad.insert("username".into(), "al".into());
        bad.insert("email".into(), "not-an-email".into());
        bad.insert("password_confirmation".into(), "other".into());
        let AppError::Validation { fields, .. } = svc.register(&bad).await.unwrap_err() else { panic!("expected validation") };
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password_confirmation"));
    }

    #[tokio::test]
    async fn wrong_password_gives_no_identity() {
        let (_mem, svc) = service().await;
        svc.register(&alice()).await.unwrap();
        let out = svc.login(&LoginRequest { identifier: "alice".into(), password: "secret1x".into() }).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn permission_outage_fails_closed_at_login() {
        let (mem, svc) = service().await;
        svc.register(&alice()).await.unwrap();
        mem.inject_fault(Fault::PermissionResolution);
        let ident = svc
            .login(&LoginRequest { identifier: "alice".into(), password: "secret1".into() })
            .await
            .unwrap()
            .unwrap();
        assert!(!ident.grants.is_resolved());
        assert!(!ident.grants.has("students.view"));
    }

    #[tokio::test]
    async fn unavailable_grants_resolve_once_store_recovers() {
        let (mem, svc) = service().await;
        svc.register(&alice()).await.unwrap();
        mem.inject_fault(Fault::PermissionResolution);
        let mut ident = svc
            .login(&LoginRequest { identifier: "alice".into(), password: "secret1".into() })
            .await
            .unwrap()
            .unwrap();
        assert!(!svc.refresh_grants(&mut ident).await);
        assert!(!ident.grants.is_resolved());

        mem.clear_fault(Fault::PermissionResolution);
        assert!(svc.refresh_grants(&mut ident).await);
        assert!(ident.grants.has("students.view"));
        assert!(!svc.refresh_grants(&mut ident).await);
    }

    #[tokio::test]
    async fn overlong_email_and_name_are_field_errors() {
        let (_mem, svc) = service().await;
        let mut long = alice();
        long.insert("email".into(), format!("{}@x.com", "a".repeat(250)));
        long.insert("full_name".into(), "n".repeat(MAX_FULL_NAME_LENGTH + 1));
        let AppError::Validation { fields, .. } = svc.register(&long).await.unwrap_err() else { panic!("expected validation") };
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("full_name"));

        let user = svc.register(&alice()).await.unwrap();
        let err = svc
            .update_profile(user.id, &form(&[("username", "alice"), ("email", "alice@x.com"), ("full_name", &"n".repeat(101))]))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 422);
    }

    #[tokio::test]
    async fn profile_update_keeps_password_when_blank() {
        let (_mem, svc) = service().await;
        let user = svc.register(&alice()).await.unwrap();
        let out = svc
            .update_profile(user.id, &form(&[("username", "alice"), ("email", "alice@y.com"), ("full_name", "Alice Y"), ("password", "")]))
            .await
            .unwrap();
        assert!(!out.password_changed);
        assert_eq!(out.user.email, "alice@y.com");
        assert!(svc.credentials().authenticate("alice", "secret1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn profile_update_rejects_taken_email() {
        let (_mem, svc) = service().await;
        let user = svc.register(&alice()).await.unwrap();
        let mut bob = alice();
        bob.insert("username".into(), "bob".into());
        bob.insert("email".into(), "bob@x.com".into());
        svc.register(&bob).await.unwrap();
        let err = svc
            .update_profile(user.id, &form(&[("username", "alice"), ("email", "bob@x.com"), ("full_name", "Alice")]))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 422);
    }
}
