use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{debug, info};

use crate::csrf::{self, CsrfGuard};
use crate::error::AppError;

use super::principal::SessionIdentity;
use super::session::{Lifecycle, Notice, NoticeKind, SessionHandle, SessionId};

pub const LOGIN_PATH: &str = "/login";
pub const LANDING_PATH: &str = "/";

const MSG_LOGIN_REQUIRED: &str = "Please sign in to access this page.";
const MSG_ROLE_REQUIRED: &str = "You do not have access to this section.";
const MSG_PERMISSION_DENIED: &str = "You do not have permission to perform this action.";
const MSG_PERMISSIONS_DENIED: &str = "You do not have the required permissions.";
const DEFAULT_DISPLAY_NAME: &str = "User";

/// A guard said no. The notice has already been queued in the session; the
/// response is a redirect and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub location: &'static str,
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response { Redirect::to(self.location).into_response() }
}

/// Per-request handle on the caller's session: identity, permission checks,
/// CSRF token and flash notices. Installed by the session middleware.
#[derive(Clone)]
pub struct RequestContext {
    session: SessionHandle,
    csrf: CsrfGuard,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::internal("session_layer_missing", "request has no session context"))
    }
}

impl RequestContext {
    pub fn new(session: SessionHandle, csrf: CsrfGuard) -> Self { Self { session, csrf } }

    pub fn session_id(&self) -> Option<SessionId> { self.session.lock().id.clone() }

    // --- identity ---

    pub fn check(&self) -> bool { self.session.lock().data.identity.is_some() }

    pub fn current(&self) -> Option<SessionIdentity> { self.session.lock().data.identity.clone() }

    pub fn display_name(&self) -> String {
        match &self.session.lock().data.identity {
            Some(ident) => ident.display_name().to_string(),
            None => DEFAULT_DISPLAY_NAME.to_string(),
        }
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.session.lock().data.identity.as_ref().is_some_and(|i| i.has_role(name))
    }

    pub fn is_admin(&self) -> bool {
        self.session.lock().data.identity.as_ref().is_some_and(|i| i.is_admin())
    }

    // --- permission checks; anonymous callers hold nothing ---

    pub fn can(&self, permission: &str) -> bool {
        self.session.lock().data.identity.as_ref().is_some_and(|i| i.grants.has(permission))
    }

    pub fn cannot(&self, permission: &str) -> bool { !self.can(permission) }

    pub fn can_any(&self, permissions: &[&str]) -> bool {
        self.session.lock().data.identity.as_ref().is_some_and(|i| i.grants.has_any(permissions))
    }

    pub fn can_all(&self, permissions: &[&str]) -> bool {
        self.session.lock().data.identity.as_ref().is_some_and(|i| i.grants.has_all(permissions))
    }

    // --- session transitions ---

    /// Enter the authenticated state. The session id is replaced when the
    /// response is written.
    pub fn login(&self, identity: SessionIdentity) {
        let mut st = self.session.lock();
        info!(target: "auth", user_id = identity.user_id(), username = %identity.user.username, "login");
        st.data.identity = Some(identity);
        st.lifecycle = Lifecycle::Regenerate;
    }

    /// Drop everything held for this client, CSRF token included. Anything
    /// written after this (a flash notice) lands in a brand-new session.
    pub fn logout(&self) {
        let mut st = self.session.lock();
        if let Some(ident) = st.data.identity.as_ref() {
            info!(target: "auth", user_id = ident.user_id(), username = %ident.user.username, "logout");
        }
        st.data = Default::default();
        st.lifecycle = Lifecycle::Destroy;
    }

    /// Replace the stored identity without touching the session id.
    pub fn refresh_identity(&self, identity: SessionIdentity) {
        self.session.lock().data.identity = Some(identity);
    }

    // --- flash ---

    pub fn flash(&self, kind: NoticeKind, message: impl Into<String>) {
        self.session.lock().data.flash.push(Notice::new(kind, message));
    }

    pub fn take_flash(&self) -> Vec<Notice> { std::mem::take(&mut self.session.lock().data.flash) }

    // --- csrf ---

    pub fn csrf_token(&self) -> anyhow::Result<String> {
        let mut st = self.session.lock();
        self.csrf.issue_or_reuse(&mut st.data.csrf)
    }

    /// `<input type="hidden" name="csrf_token" ...>` for the current token.
    pub fn csrf_field(&self) -> anyhow::Result<String> { Ok(csrf::hidden_field(&self.csrf_token()?)) }

    pub fn validate_csrf(&self, supplied: Option<&str>) -> bool {
        let mut st = self.session.lock();
        self.csrf.validate(&mut st.data.csrf, supplied)
    }

    // --- guards ---

    fn deny(&self, location: &'static str, kind: NoticeKind, message: &str) -> Denial {
        self.flash(kind, message);
        Denial { location }
    }

    fn deny_anonymous(&self) -> Denial {
        debug!(target: "auth", "anonymous request to protected page");
        self.deny(LOGIN_PATH, NoticeKind::Warning, MSG_LOGIN_REQUIRED)
    }

    pub fn require_authenticated(&self) -> Result<SessionIdentity, Denial> {
        self.current().ok_or_else(|| self.deny_anonymous())
    }

    /// Pages only meant for signed-out visitors send signed-in users home.
    pub fn require_guest(&self) -> Result<(), Denial> {
        if self.check() { Err(Denial { location: LANDING_PATH }) } else { Ok(()) }
    }

    pub fn require_role(&self, role: &str) -> Result<SessionIdentity, Denial> {
        let ident = self.require_authenticated()?;
        if ident.has_role(role) {
            return Ok(ident);
        }
        info!(target: "auth", user_id = ident.user_id(), role, "role check denied");
        Err(self.deny(LANDING_PATH, NoticeKind::Danger, MSG_ROLE_REQUIRED))
    }

    pub fn require_permission(&self, permission: &str) -> Result<SessionIdentity, Denial> {
        let ident = self.require_authenticated()?;
        if ident.grants.has(permission) {
            return Ok(ident);
        }
        info!(target: "auth", user_id = ident.user_id(), permission, "permission check denied");
        Err(self.deny(LANDING_PATH, NoticeKind::Danger, MSG_PERMISSION_DENIED))
    }

    pub fn require_any_permission(&self, permissions: &[&str]) -> Result<SessionIdentity, Denial> {
        let ident = self.require_authenticated()?;
        if ident.grants.has_any(permissions) {
            return Ok(ident);
        }
        info!(target: "auth", user_id = ident.user_id(), ?permissions, "permission check denied");
        Err(self.deny(LANDING_PATH, NoticeKind::Danger, MSG_PERMISSION_DENIED))
    }

    pub fn require_all_permissions(&self, permissions: &[&str]) -> Result<SessionIdentity, Denial> {
        let ident = self.require_authenticated()?;
        if ident.grants.has_all(permissions) {
            return Ok(ident);
        }
        info!(target: "auth", user_id = ident.user_id(), ?permissions, "permission check denied");
        Err(self.deny(LANDING_PATH, NoticeKind::Danger, MSG_PERMISSIONS_DENIED))
    }
}
