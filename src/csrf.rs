//! Per-session anti-forgery tokens.
//!
//! A token lives in the session (`Option<CsrfToken>`), independent of who is
//! logged in. It is reused until it is older than the guard's lifetime; an
//! expired token is purged the moment validation notices it, and the next
//! `issue_or_reuse` mints a fresh one.

use std::time::Duration;

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::security;

/// Form field carrying the token on mutating submissions.
pub const CSRF_FIELD: &str = "csrf_token";
/// Header accepted from non-form clients.
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct CsrfGuard {
    lifetime: chrono::Duration,
}

impl Default for CsrfGuard {
    fn default() -> Self { Self::new(DEFAULT_LIFETIME) }
}

impl CsrfGuard {
    pub fn new(lifetime: Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::seconds(3600));
        Self { lifetime }
    }

    pub fn lifetime(&self) -> chrono::Duration { self.lifetime }

    fn is_expired(&self, token: &CsrfToken, now: DateTime<Utc>) -> bool {
        now - token.issued_at > self.lifetime
    }

    /// Return the stored token, minting a new one when it is missing or expired.
    pub fn issue_or_reuse(&self, slot: &mut Option<CsrfToken>) -> anyhow::Result<String> {
        self.issue_or_reuse_at(slot, Utc::now())
    }

    pub fn issue_or_reuse_at(&self, slot: &mut Option<CsrfToken>, now: DateTime<Utc>) -> anyhow::Result<String> {
        if let Some(tok) = slot.as_ref() {
            if !self.is_expired(tok, now) {
                return Ok(tok.value.clone());
            }
        }
        let value = security::random_hex(TOKEN_BYTES)?;
        *slot = Some(CsrfToken { value: value.clone(), issued_at: now });
        debug!(target: "csrf", "issued token");
        Ok(value)
    }

    pub fn validate(&self, slot: &mut Option<CsrfToken>, supplied: Option<&str>) -> bool {
        self.validate_at(slot, supplied, Utc::now())
    }

    pub fn validate_at(&self, slot: &mut Option<CsrfToken>, supplied: Option<&str>, now: DateTime<Utc>) -> bool {
        let Some(stored) = slot.as_ref() else {
            debug!(target: "csrf", "no token in session");
            return false;
        };
        if self.is_expired(stored, now) {
            debug!(target: "csrf", issued_at = %stored.issued_at, "token expired; purged");
            *slot = None;
            return false;
        }
        let Some(supplied) = supplied else {
            debug!(target: "csrf", "request carried no token");
            return false;
        };
        let ok = security::constant_time_eq(&stored.value, supplied);
        if !ok {
            debug!(target: "csrf", "token mismatch");
        }
        ok
    }
}

/// Only mutating methods are checked; GET, HEAD and OPTIONS always pass.
pub fn requires_validation(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

pub fn hidden_field(token: &str) -> String {
    format!(r#"<input type="hidden" name="{}" value="{}">"#, CSRF_FIELD, html_escape(token))
}

pub(crate) fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars_and_reused() {
        let guard = CsrfGuard::default();
        let mut slot = None;
        let a = guard.issue_or_reuse(&mut slot).unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        let b = guard.issue_or_reuse(&mut slot).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_token_validates() {
        let guard = CsrfGuard::default();
        let mut slot = None;
        let tok = guard.issue_or_reuse(&mut slot).unwrap();
        assert!(guard.validate(&mut slot, Some(&tok)));
        assert!(!guard.validate(&mut slot, Some("deadbeef")));
        assert!(!guard.validate(&mut slot, None));
    }

    #[test]
    fn missing_token_fails() {
        let guard = CsrfGuard::default();
        let mut slot = None;
        assert!(!guard.validate(&mut slot, Some("anything")));
    }

    #[test]
    fn expired_token_is_purged_and_replaced() {
        let guard = CsrfGuard::new(Duration::from_secs(60));
        let t0 = Utc::now();
        let mut slot = None;
        let tok = guard.issue_or_reuse_at(&mut slot, t0).unwrap();

        // exactly at the lifetime boundary the token is still good
        assert!(guard.validate_at(&mut slot, Some(&tok), t0 + chrono::Duration::seconds(60)));

        let later = t0 + chrono::Duration::seconds(61);
        assert!(!guard.validate_at(&mut slot, Some(&tok), later));
        assert!(slot.is_none());
        let fresh = guard.issue_or_reuse_at(&mut slot, later).unwrap();
        assert_ne!(tok, fresh);
    }

    #[test]
    fn only_mutating_methods_are_checked() {
        assert!(requires_validation(&Method::POST));
        assert!(requires_validation(&Method::PUT));
        assert!(requires_validation(&Method::PATCH));
        assert!(requires_validation(&Method::DELETE));
        assert!(!requires_validation(&Method::GET));
        assert!(!requires_validation(&Method::HEAD));
        assert!(!requires_validation(&Method::OPTIONS));
    }

    #[test]
    fn hidden_field_markup() {
        assert_eq!(hidden_field("ab\"c"), r#"<input type="hidden" name="csrf_token" value="ab&quot;c">"#);
    }
}
