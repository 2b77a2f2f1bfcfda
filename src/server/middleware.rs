use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;

use super::form::{FormData, MAX_FORM_BYTES};
use super::{clear_session_cookie, parse_cookie, set_session_cookie, AppState, SESSION_COOKIE};
use crate::csrf::{self, CSRF_FIELD, CSRF_HEADER};
use crate::error::AppError;
use crate::identity::session::{new_handle, Lifecycle, SessionHandle};
use crate::identity::{RequestContext, SessionData};

/// Load the caller's session, expose it to the rest of the stack as a
/// `RequestContext`, and write it back (plus any cookie change) afterwards.
pub async fn session_layer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("request", %request_id, method = %req.method(), path = %req.uri().path());

    let presented = parse_cookie(req.headers(), SESSION_COOKIE);
    let loaded = presented.as_deref().and_then(|sid| state.sessions.load(sid).map(|data| (sid.to_string(), data)));
    let handle = match loaded {
        Some((sid, data)) => new_handle(Some(sid), data),
        None => new_handle(None, SessionData::default()),
    };
    retry_unavailable_grants(&state, &handle).instrument(span.clone()).await;
    req.extensions_mut().insert(RequestContext::new(handle.clone(), state.csrf));

    let mut resp = next.run(req).instrument(span).await;
    if let Err(e) = persist(&state, &handle, presented.is_some(), &mut resp) {
        error!(target: "session", "failed to persist session: {:#}", e);
        return AppError::from(e).into_response();
    }
    resp
}

/// A session whose permissions could not be resolved at login gets another
/// attempt on each request until the store answers.
async fn retry_unavailable_grants(state: &AppState, handle: &SessionHandle) {
    let pending = handle.lock().data.identity.clone().filter(|i| !i.grants.is_resolved());
    let Some(mut identity) = pending else { return };
    if state.auth.refresh_grants(&mut identity).await {
        handle.lock().data.identity = Some(identity);
    }
}

fn persist(state: &AppState, handle: &SessionHandle, cookie_presented: bool, resp: &mut Response) -> anyhow::Result<()> {
    let (id, loaded, data, lifecycle) = {
        let st = handle.lock();
        (st.id.clone(), st.loaded.clone(), st.data.clone(), st.lifecycle)
    };
    let cookie = match lifecycle {
        Lifecycle::Keep => match id {
            Some(id) => {
                if state.sessions.merge(&id, &loaded, data) {
                    // slide the cookie along with the idle timer
                    Some(set_session_cookie(&id, state.cookie_secure, state.sessions.ttl())?)
                } else {
                    // revoked or expired while the request was in flight
                    Some(clear_session_cookie(state.cookie_secure))
                }
            }
            None if !data.is_empty() => {
                let sid = state.sessions.create(data)?;
                Some(set_session_cookie(&sid, state.cookie_secure, state.sessions.ttl())?)
            }
            None if cookie_presented => Some(clear_session_cookie(state.cookie_secure)),
            None => None,
        },
        Lifecycle::Regenerate | Lifecycle::Destroy => {
            if let Some(old) = id {
                state.sessions.destroy(&old);
            }
            debug!(target: "session", ?lifecycle, "session id rotated");
            if data.is_empty() {
                Some(clear_session_cookie(state.cookie_secure))
            } else {
                let sid = state.sessions.create(data)?;
                Some(set_session_cookie(&sid, state.cookie_secure, state.sessions.ttl())?)
            }
        }
    };
    if let Some(c) = cookie {
        resp.headers_mut().append(SET_COOKIE, c);
    }
    Ok(())
}

/// Reject mutating requests whose token (form field `csrf_token` or the
/// `x-csrf-token` header) does not match the session's. Runs before any handler.
pub async fn csrf_layer(req: Request, next: Next) -> Response {
    if !csrf::requires_validation(req.method()) {
        return next.run(req).await;
    }
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return AppError::internal("session_layer_missing", "csrf check ran without a session").into_response();
    };
    let header_token = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
    let is_form = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
        Ok(b) => b,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };
    let supplied = header_token.or_else(|| {
        if is_form { FormData::parse(&bytes).get(CSRF_FIELD).map(str::to_string) } else { None }
    });

    if !ctx.validate_csrf(supplied.as_deref()) {
        debug!(target: "csrf", method = %parts.method, path = %parts.uri.path(), "rejected request with missing or invalid token");
        return AppError::csrf("csrf_rejected", "The page has expired. Reload the form and try again.").into_response();
    }
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
