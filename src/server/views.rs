//! Minimal HTML for the auth pages. Every dynamic value goes through `esc`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::csrf::html_escape as esc;
use crate::identity::{Notice, SessionIdentity};
use crate::model::{PermissionGroup, PermissionId, Role};
use crate::validation::ValidationErrors;

fn layout(title: &str, notices: &[Notice], body: &str) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>\n",
        esc(title)
    );
    for n in notices {
        let _ = writeln!(out, "<div class=\"alert alert-{}\">{}</div>", n.kind.as_str(), esc(&n.message));
    }
    out.push_str(body);
    out.push_str("\n</body></html>\n");
    out
}

fn field_errors(errors: &ValidationErrors, field: &str) -> String {
    errors
        .get(field)
        .unwrap_or_default()
        .iter()
        .map(|m| format!("<div class=\"invalid-feedback\" data-field=\"{}\">{}</div>", esc(field), esc(m)))
        .collect()
}

fn input(name: &str, kind: &str, label: &str, value: &str, errors: &ValidationErrors) -> String {
    format!(
        "<label for=\"{n}\">{l}</label><input id=\"{n}\" type=\"{k}\" name=\"{n}\" value=\"{v}\">{e}\n",
        n = esc(name),
        k = kind,
        l = esc(label),
        v = esc(value),
        e = field_errors(errors, name)
    )
}

pub fn login(notices: &[Notice], errors: &ValidationErrors, username: &str, csrf_field: &str) -> String {
    let mut body = String::from("<h1>Sign in</h1>\n");
    body.push_str(&field_errors(errors, "general"));
    let _ = write!(
        body,
        "<form method=\"POST\" action=\"/login\">\n{}\n{}{}<button type=\"submit\">Sign in</button></form>",
        csrf_field,
        input("username", "text", "Username or email", username, errors),
        input("password", "password", "Password", "", errors),
    );
    layout("Sign in", notices, &body)
}

fn logout_form(csrf_field: &str) -> String {
    format!("<form method=\"POST\" action=\"/logout\">{csrf_field}<button type=\"submit\">Sign out</button></form>")
}

pub fn landing(ident: &SessionIdentity, notices: &[Notice], csrf_field: &str) -> String {
    let mut body = format!("<h1>Welcome, {}</h1>\n", esc(ident.display_name()));
    let roles: Vec<String> = ident.roles.iter().map(|r| esc(&r.name)).collect();
    let _ = writeln!(body, "<p class=\"roles\">Roles: {}</p>", roles.join(", "));
    body.push_str("<ul class=\"permissions\">\n");
    for p in ident.grants.names() {
        let _ = writeln!(body, "<li>{}</li>", esc(p));
    }
    body.push_str("</ul>\n<nav><a href=\"/profile\">Profile</a>");
    if ident.is_admin() {
        body.push_str(" <a href=\"/register\">Register user</a>");
    }
    body.push_str("</nav>\n");
    body.push_str(&logout_form(csrf_field));
    layout("Home", notices, &body)
}

pub fn register(notices: &[Notice], errors: &ValidationErrors, old: &BTreeMap<String, String>, csrf_field: &str) -> String {
    let val = |k: &str| old.get(k).map(String::as_str).unwrap_or("");
    let mut body = String::from("<h1>Register user</h1>\n");
    body.push_str(&field_errors(errors, "general"));
    let _ = write!(
        body,
        "<form method=\"POST\" action=\"/register\">\n{}\n{}{}{}{}{}<button type=\"submit\">Create</button></form>",
        csrf_field,
        input("username", "text", "Username", val("username"), errors),
        input("email", "email", "Email", val("email"), errors),
        input("full_name", "text", "Full name", val("full_name"), errors),
        input("password", "password", "Password", "", errors),
        input("password_confirmation", "password", "Confirm password", "", errors),
    );
    layout("Register user", notices, &body)
}

pub fn profile(ident: &SessionIdentity, notices: &[Notice], errors: &ValidationErrors, csrf_field: &str) -> String {
    let mut body = String::from("<h1>Profile</h1>\n");
    let _ = write!(
        body,
        "<form method=\"POST\" action=\"/profile\">\n{}\n{}{}{}{}{}<button type=\"submit\">Save</button></form>",
        csrf_field,
        input("username", "text", "Username", &ident.user.username, errors),
        input("email", "email", "Email", &ident.user.email, errors),
        input("full_name", "text", "Full name", &ident.user.full_name, errors),
        input("password", "password", "New password (leave blank to keep)", "", errors),
        input("password_confirmation", "password", "Confirm new password", "", errors),
    );
    layout("Profile", notices, &body)
}

/// Path of a role's permission page, the role name percent-encoded.
pub fn role_permissions_path(role_name: &str) -> String {
    format!("/admin/roles/{}/permissions", urlencoding::encode(role_name))
}

pub fn role_permissions(
    role: &Role,
    groups: &[PermissionGroup],
    granted: &BTreeSet<PermissionId>,
    notices: &[Notice],
    csrf_field: &str,
) -> String {
    let mut body = format!("<h1>Permissions for role {}</h1>\n", esc(&role.name));
    let _ = writeln!(
        body,
        "<form method=\"POST\" action=\"{}\">\n{}",
        esc(&role_permissions_path(&role.name)),
        csrf_field
    );
    for g in groups {
        let _ = writeln!(body, "<fieldset><legend>{}</legend>", esc(&g.category));
        for p in &g.permissions {
            let checked = if granted.contains(&p.id) { " checked" } else { "" };
            let _ = writeln!(
                body,
                "<label><input type=\"checkbox\" name=\"permission_ids\" value=\"{}\"{}> {} <small>{}</small></label>",
                p.id,
                checked,
                esc(&p.display_name),
                esc(&p.name)
            );
        }
        body.push_str("</fieldset>\n");
    }
    body.push_str("<button type=\"submit\">Save</button></form>");
    layout("Role permissions", notices, &body)
}
