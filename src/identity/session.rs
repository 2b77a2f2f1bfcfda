use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::csrf::CsrfToken;
use crate::model::UserId;
use crate::security;
use crate::tprintln;

use super::principal::SessionIdentity;

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Info,
    Warning,
    Danger,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Success => "success",
            NoticeKind::Info => "info",
            NoticeKind::Warning => "warning",
            NoticeKind::Danger => "danger",
        }
    }
}

/// One-shot message shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Everything kept server-side for one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub identity: Option<SessionIdentity>,
    pub csrf: Option<CsrfToken>,
    pub flash: Vec<Notice>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.csrf.is_none() && self.flash.is_empty()
    }

    /// Apply the changes one request made (`base` as loaded, `current` as left)
    /// without discarding what concurrent requests on the same session wrote.
    /// Notices are merged: ones the request consumed are removed, ones it
    /// queued are appended.
    fn apply_changes(&mut self, base: &SessionData, current: SessionData) {
        if current.identity != base.identity {
            self.identity = current.identity;
        }
        if current.csrf != base.csrf {
            self.csrf = current.csrf;
        }
        if current.flash != base.flash {
            let consumed: Vec<&Notice> = base.flash.iter().filter(|n| !current.flash.contains(n)).collect();
            self.flash.retain(|n| !consumed.contains(&n));
            self.flash.extend(current.flash.into_iter().filter(|n| !base.flash.contains(n)));
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    data: SessionData,
    last_seen: Instant,
}

impl SessionEntry {
    fn user_id(&self) -> Option<UserId> { self.data.identity.as_ref().map(|i| i.user_id()) }
}

/// Server-side session map keyed by the cookie value. Sessions expire after
/// `ttl` without a request.
#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self { Self::new(Duration::from_secs(2 * 60 * 60)) }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Fetch a live session and refresh its idle timer. An expired entry is
    /// dropped and reported as missing.
    pub fn load(&self, id: &str) -> Option<SessionData> {
        let now = Instant::now();
        let mut map = self.entries.write();
        let expired = match map.get_mut(id) {
            None => return None,
            Some(ent) if now.duration_since(ent.last_seen) > self.ttl => true,
            Some(ent) => {
                ent.last_seen = now;
                return Some(ent.data.clone());
            }
        };
        if expired {
            map.remove(id);
            debug!(target: "session", "session expired on lookup");
        }
        None
    }

    /// Store `data` under a fresh random id.
    pub fn create(&self, data: SessionData) -> anyhow::Result<SessionId> {
        let id = security::random_id()?;
        self.entries.write().insert(id.clone(), SessionEntry { data, last_seen: Instant::now() });
        tprintln!("session.create sid={}", id);
        Ok(id)
    }

    /// Write back what a request changed relative to `base`, the data it
    /// loaded. Fields the request left alone keep whatever is stored now.
    /// Returns false when the session no longer exists (expired, destroyed or
    /// revoked meanwhile); it is not recreated.
    pub fn merge(&self, id: &str, base: &SessionData, current: SessionData) -> bool {
        match self.entries.write().get_mut(id) {
            Some(ent) => {
                ent.data.apply_changes(base, current);
                ent.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn destroy(&self, id: &str) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        tprintln!("session.destroy sid={} removed={}", id, removed);
        removed
    }

    /// Drop every session authenticated as `user_id`, except `keep`.
    pub fn revoke_user(&self, user_id: UserId, keep: Option<&str>) -> usize {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|sid, ent| ent.user_id() != Some(user_id) || Some(sid.as_str()) == keep);
        let count = before - map.len();
        debug!(target: "session", user_id, count, "revoked sessions");
        count
    }

    /// Remove idle sessions. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, ent| now.duration_since(ent.last_seen) <= self.ttl);
        before - map.len()
    }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}

/// What should happen to the session id when the request finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Keep,
    /// New id, same data (privilege change).
    Regenerate,
    /// Old session removed; any data written afterwards starts a new one.
    Destroy,
}

/// Per-request view of the session, shared between the middleware and the handler.
#[derive(Debug)]
pub struct SessionState {
    pub id: Option<SessionId>,
    /// Snapshot taken when the request loaded the session.
    pub loaded: SessionData,
    pub data: SessionData,
    pub lifecycle: Lifecycle,
}

pub type SessionHandle = Arc<Mutex<SessionState>>;

pub fn new_handle(id: Option<SessionId>, data: SessionData) -> SessionHandle {
    Arc::new(Mutex::new(SessionState { id, loaded: data.clone(), data, lifecycle: Lifecycle::Keep }))
}
