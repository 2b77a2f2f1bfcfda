//! Identity and session handling: who is calling, what they may do, and the
//! server-side session that carries it between requests.

mod principal;
mod authorizer;
mod provider;
mod request_context;
pub mod session;

pub use principal::SessionIdentity;
pub use authorizer::{grants_for, resolve_permissions, Grants, PermissionSet};
pub use provider::{AuthService, LoginRequest, ProfileUpdate, MAX_USERNAME_LENGTH, MIN_PASSWORD_LENGTH, MIN_USERNAME_LENGTH};
pub use request_context::{Denial, RequestContext, LANDING_PATH, LOGIN_PATH};
pub use session::{Notice, NoticeKind, SessionData, SessionStore};
