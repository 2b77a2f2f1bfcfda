//!
//! registrar HTTP server
//! ---------------------
//! Axum router for the authentication and role administration pages.
//!
//! Responsibilities:
//! - Server-side sessions keyed by an HttpOnly cookie (`middleware::session_layer`).
//! - CSRF enforcement on every mutating request before any handler runs
//!   (`middleware::csrf_layer`).
//! - Login/logout, admin registration, profile update and role permission sync.
//! - Startup: storage selection, catalog seeding, default admin, session sweeper.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::csrf::CsrfGuard;
use crate::identity::{AuthService, SessionStore};
use crate::storage::{bootstrap, AuthStore, MemoryStore, PgStore};

pub mod form;
pub mod handlers;
pub mod middleware;
pub mod views;

pub const SESSION_COOKIE: &str = "registrar_session";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub sessions: SessionStore,
    pub csrf: CsrfGuard,
    /// Adds `Secure` to the session cookie. Off only for plain-HTTP development and tests.
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn AuthStore>, config: &Config) -> Self {
        Self {
            auth: AuthService::new(store),
            sessions: SessionStore::new(config.session_ttl),
            csrf: CsrfGuard::new(config.csrf_lifetime),
            cookie_secure: config.cookie_secure,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::landing))
        .route("/csrf", get(handlers::csrf_token))
        .route("/login", get(handlers::show_login).post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/register", get(handlers::show_register).post(handlers::register))
        .route("/profile", get(handlers::show_profile).post(handlers::update_profile))
        .route(
            "/admin/roles/{role}/permissions",
            get(handlers::show_role_permissions).post(handlers::sync_role_permissions),
        )
        // outermost layer runs first: session, then csrf, then the handler
        .layer(from_fn(middleware::csrf_layer))
        .layer(from_fn_with_state(state.clone(), middleware::session_layer))
        .with_state(state)
}

pub(crate) fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie")?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some((k, v)) = p.split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

pub(crate) fn set_session_cookie(sid: &str, secure: bool, ttl: Duration) -> Result<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        SESSION_COOKIE,
        sid,
        ttl.as_secs(),
        secure
    ))
    .context("session id is not a valid header value")
}

pub(crate) fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("registrar_session=deleted; Max-Age=0; HttpOnly; SameSite=Lax; Path=/; Secure")
    } else {
        HeaderValue::from_static("registrar_session=deleted; Max-Age=0; HttpOnly; SameSite=Lax; Path=/")
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn AuthStore>> {
    match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url).await.context("While connecting to postgres")?;
            pg.install_schema().await.context("While installing schema")?;
            Ok(Arc::new(pg))
        }
        None => {
            warn!(target: "startup", "REGISTRAR_DATABASE_URL not set; using the in-memory store (data is lost on exit)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn spawn_session_sweeper(sessions: SessionStore) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            let removed = sessions.sweep();
            if removed > 0 {
                debug!(target: "session", removed, "session_sweep");
            }
        }
    });
}

/// Serve the router on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Open storage, seed it, and serve until the process is stopped.
pub async fn run(config: Config) -> Result<()> {
    info!(target: "startup", "config: {:?}", config);
    let store = open_store(&config).await?;
    bootstrap::ensure_catalog(store.as_ref()).await.context("While seeding roles and permissions")?;
    bootstrap::ensure_default_admin(store.as_ref(), &config.admin)
        .await
        .with_context(|| format!("While ensuring default admin '{}'", config.admin.username))?;

    let state = AppState::new(store, &config);
    spawn_session_sweeper(state.sessions.clone());

    let addr = config.socket_addr()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await.with_context(|| format!("While binding {addr}"))?;
    serve(listener, state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_round_trip() {
        let v = set_session_cookie("abc", true, Duration::from_secs(60)).unwrap();
        let s = v.to_str().unwrap();
        assert!(s.starts_with("registrar_session=abc;"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("SameSite=Lax"));
        assert!(s.ends_with("Secure"));
        assert!(!set_session_cookie("abc", false, Duration::from_secs(60)).unwrap().to_str().unwrap().contains("Secure"));

        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("theme=dark; registrar_session=xyz"));
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("xyz"));
        assert_eq!(parse_cookie(&headers, "missing"), None);
    }
}
