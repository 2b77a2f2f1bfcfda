use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use tracing::{error, info};

use super::form::FormData;
use super::views;
use super::AppState;
use crate::error::AppError;
use crate::identity::{Denial, LoginRequest, NoticeKind, RequestContext, LANDING_PATH, LOGIN_PATH};
use crate::model::{PermissionId, ROLE_ADMIN};
use crate::storage::StoreError;
use crate::validation::{Rule, ValidationErrors, Validator};

const MSG_INVALID_CREDENTIALS: &str = "Incorrect credentials";
const MSG_LOGIN_FAILED: &str = "Sign-in could not be processed. Please try again.";

/// Why a handler produced no page of its own.
#[derive(Debug)]
pub enum Reject {
    Denied(Denial),
    Failed(AppError),
}

impl From<Denial> for Reject {
    fn from(d: Denial) -> Self { Reject::Denied(d) }
}

impl From<AppError> for Reject {
    fn from(e: AppError) -> Self { Reject::Failed(e) }
}

impl From<StoreError> for Reject {
    fn from(e: StoreError) -> Self { Reject::Failed(e.into()) }
}

impl From<anyhow::Error> for Reject {
    fn from(e: anyhow::Error) -> Self { Reject::Failed(e.into()) }
}

impl IntoResponse for Reject {
    fn into_response(self) -> Response {
        match self {
            Reject::Denied(d) => d.into_response(),
            Reject::Failed(e) => e.into_response(),
        }
    }
}

type Page = Result<Response, Reject>;

fn html(status: StatusCode, body: String) -> Response { (status, Html(body)).into_response() }

pub async fn landing(ctx: RequestContext) -> Page {
    let ident = ctx.require_authenticated()?;
    let notices = ctx.take_flash();
    Ok(html(StatusCode::OK, views::landing(&ident, &notices, &ctx.csrf_field()?)))
}

/// Token for non-form clients, which send it back in `x-csrf-token`.
pub async fn csrf_token(ctx: RequestContext) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({ "status": "ok", "csrf": ctx.csrf_token()? })))
}

pub async fn show_login(ctx: RequestContext) -> Page {
    ctx.require_guest()?;
    let notices = ctx.take_flash();
    Ok(html(StatusCode::OK, views::login(&notices, &ValidationErrors::default(), "", &ctx.csrf_field()?)))
}

pub async fn login(State(state): State<AppState>, ctx: RequestContext, form: FormData) -> Page {
    let input = form.to_map();
    let username = input.get("username").map(|s| s.trim().to_string()).unwrap_or_default();
    let render = |status: StatusCode, errors: ValidationErrors| -> Page {
        Ok(html(status, views::login(&ctx.take_flash(), &errors, &username, &ctx.csrf_field()?)))
    };

    let data = match Validator::new(&input)
        .rule_msg("username", Rule::Required, "Username is required")
        .rule_msg("password", Rule::Required, "Password is required")
        .validate()
    {
        Ok(d) => d,
        Err(errors) => return render(StatusCode::UNPROCESSABLE_ENTITY, errors),
    };
    let req = LoginRequest {
        identifier: data["username"].clone(),
        password: input.get("password").cloned().unwrap_or_default(),
    };

    match state.auth.login(&req).await {
        Ok(Some(identity)) => {
            let welcome = format!("Welcome back, {}", identity.display_name());
            ctx.login(identity);
            ctx.flash(NoticeKind::Success, welcome);
            Ok(Redirect::to(LANDING_PATH).into_response())
        }
        Ok(None) => render(StatusCode::UNAUTHORIZED, ValidationErrors::single("general", MSG_INVALID_CREDENTIALS)),
        Err(e) => {
            error!(target: "storage", op = "login", identifier = %req.identifier, "login failed on storage: {}", e);
            render(StatusCode::SERVICE_UNAVAILABLE, ValidationErrors::single("general", MSG_LOGIN_FAILED))
        }
    }
}

pub async fn logout(ctx: RequestContext) -> Response {
    ctx.logout();
    ctx.flash(NoticeKind::Success, "You have been signed out.");
    Redirect::to(LOGIN_PATH).into_response()
}

pub async fn show_register(ctx: RequestContext) -> Page {
    ctx.require_role(ROLE_ADMIN)?;
    let notices = ctx.take_flash();
    Ok(html(
        StatusCode::OK,
        views::register(&notices, &ValidationErrors::default(), &Default::default(), &ctx.csrf_field()?),
    ))
}

pub async fn register(State(state): State<AppState>, ctx: RequestContext, form: FormData) -> Page {
    let admin = ctx.require_role(ROLE_ADMIN)?;
    let input = form.to_map();
    match state.auth.register(&input).await {
        Ok(user) => {
            info!(target: "auth", by = %admin.user.username, user_id = user.id, username = %user.username, "user registered");
            ctx.flash(NoticeKind::Success, format!("User '{}' created.", user.username));
            Ok(Redirect::to(LANDING_PATH).into_response())
        }
        Err(AppError::Validation { fields, .. }) => {
            let errors = ValidationErrors::from_map(fields);
            let notices = ctx.take_flash();
            Ok(html(StatusCode::UNPROCESSABLE_ENTITY, views::register(&notices, &errors, &input, &ctx.csrf_field()?)))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn show_profile(ctx: RequestContext) -> Page {
    let ident = ctx.require_authenticated()?;
    let notices = ctx.take_flash();
    Ok(html(StatusCode::OK, views::profile(&ident, &notices, &ValidationErrors::default(), &ctx.csrf_field()?)))
}

pub async fn update_profile(State(state): State<AppState>, ctx: RequestContext, form: FormData) -> Page {
    let ident = ctx.require_authenticated()?;
    let input = form.to_map();
    let update = match state.auth.update_profile(ident.user_id(), &input).await {
        Ok(u) => u,
        Err(AppError::Validation { fields, .. }) => {
            let errors = ValidationErrors::from_map(fields);
            let notices = ctx.take_flash();
            return Ok(html(StatusCode::UNPROCESSABLE_ENTITY, views::profile(&ident, &notices, &errors, &ctx.csrf_field()?)));
        }
        Err(e) => return Err(e.into()),
    };

    let refreshed = state.auth.identity_for(update.user).await?;
    ctx.refresh_identity(refreshed);
    if update.password_changed {
        let revoked = state.sessions.revoke_user(ident.user_id(), ctx.session_id().as_deref());
        info!(target: "auth", user_id = ident.user_id(), revoked, "password changed; other sessions revoked");
    }
    ctx.flash(NoticeKind::Success, "Profile updated.");
    Ok(Redirect::to(LANDING_PATH).into_response())
}

pub async fn show_role_permissions(State(state): State<AppState>, ctx: RequestContext, Path(role_name): Path<String>) -> Page {
    ctx.require_role(ROLE_ADMIN)?;
    let roles = state.auth.roles();
    let role = roles
        .find_role_by_name(&role_name)
        .await?
        .ok_or_else(|| AppError::not_found("role_not_found".to_string(), format!("role '{role_name}' does not exist")))?;
    let groups = roles.grouped_permissions().await?;
    let granted: BTreeSet<PermissionId> = roles.permissions_for_role(role.id).await?.into_iter().map(|p| p.id).collect();
    let notices = ctx.take_flash();
    Ok(html(StatusCode::OK, views::role_permissions(&role, &groups, &granted, &notices, &ctx.csrf_field()?)))
}

pub async fn sync_role_permissions(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(role_name): Path<String>,
    form: FormData,
) -> Page {
    let admin = ctx.require_role(ROLE_ADMIN)?;
    let roles = state.auth.roles();
    let role = roles
        .find_role_by_name(&role_name)
        .await?
        .ok_or_else(|| AppError::not_found("role_not_found".to_string(), format!("role '{role_name}' does not exist")))?;

    let mut ids = Vec::new();
    for raw in form.all("permission_ids") {
        match raw.trim().parse::<PermissionId>() {
            Ok(id) => ids.push(id),
            Err(_) => return Err(AppError::validation(ValidationErrors::single("permission_ids", "Invalid permission id")).into()),
        }
    }
    ids.sort_unstable();
    ids.dedup();

    roles.sync_role_permissions(role.id, &ids).await?;
    info!(target: "auth", by = %admin.user.username, role = %role.name, grants = ids.len(), "role permissions updated");
    ctx.flash(NoticeKind::Success, format!("Permissions for '{}' saved.", role.name));
    Ok(Redirect::to(&views::role_permissions_path(&role.name)).into_response())
}
