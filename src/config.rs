//! Runtime configuration from `REGISTRAR_*` environment variables, with a
//! handful of command-line overrides applied on top.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::csrf::DEFAULT_LIFETIME;
use crate::storage::bootstrap::AdminSeed;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Clone)]
pub struct Config {
    pub bind: String,
    pub http_port: u16,
    /// No URL means the in-memory store.
    pub database_url: Option<String>,
    pub csrf_lifetime: Duration,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub admin: AdminSeed,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            database_url: None,
            csrf_lifetime: DEFAULT_LIFETIME,
            session_ttl: DEFAULT_SESSION_TTL,
            cookie_secure: true,
            admin: AdminSeed {
                username: "admin".to_string(),
                email: "admin@localhost.localdomain".to_string(),
                full_name: "Administrator".to_string(),
                password: None,
            },
        }
    }
}

// Keep the admin password out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("http_port", &self.http_port)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("csrf_lifetime", &self.csrf_lifetime)
            .field("session_ttl", &self.session_ttl)
            .field("cookie_secure", &self.cookie_secure)
            .field("admin_username", &self.admin.username)
            .field("admin_password", &self.admin.password.as_ref().map(|_| "<set>"))
            .finish()
    }
}

fn parse_port(name: &str, val: Option<String>) -> Result<Option<u16>> {
    val.map(|v| v.trim().parse::<u16>().with_context(|| format!("{name}: invalid port '{v}'"))).transpose()
}

fn parse_secs(name: &str, val: Option<String>) -> Result<Option<Duration>> {
    val.map(|v| {
        v.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .with_context(|| format!("{name}: expected a number of seconds, got '{v}'"))
    })
    .transpose()
}

fn parse_bool(name: &str, val: Option<String>) -> Result<Option<bool>> {
    let Some(v) = val else { return Ok(None) };
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => anyhow::bail!("{name}: expected a boolean, got '{v}'"),
    }
}

fn non_empty(val: Option<String>) -> Option<String> {
    val.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(b) = non_empty(get("REGISTRAR_BIND")) {
            cfg.bind = b;
        }
        if let Some(p) = parse_port("REGISTRAR_HTTP_PORT", get("REGISTRAR_HTTP_PORT"))? {
            cfg.http_port = p;
        }
        cfg.database_url = non_empty(get("REGISTRAR_DATABASE_URL"));
        if let Some(d) = parse_secs("REGISTRAR_CSRF_LIFETIME_SECS", get("REGISTRAR_CSRF_LIFETIME_SECS"))? {
            cfg.csrf_lifetime = d;
        }
        if let Some(d) = parse_secs("REGISTRAR_SESSION_TTL_SECS", get("REGISTRAR_SESSION_TTL_SECS"))? {
            cfg.session_ttl = d;
        }
        if let Some(s) = parse_bool("REGISTRAR_COOKIE_SECURE", get("REGISTRAR_COOKIE_SECURE"))? {
            cfg.cookie_secure = s;
        }
        if let Some(u) = non_empty(get("REGISTRAR_ADMIN_USERNAME")) {
            cfg.admin.username = u;
        }
        if let Some(e) = non_empty(get("REGISTRAR_ADMIN_EMAIL")) {
            cfg.admin.email = e;
        }
        cfg.admin.password = get("REGISTRAR_ADMIN_PASSWORD").filter(|p| !p.is_empty());
        Ok(cfg)
    }

    /// Apply `--port`, `--bind`, `--database-url` and `--insecure-cookies`.
    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        if let Some(p) = parse_port("--port", arg_value(args, "--port").map(str::to_string))? {
            self.http_port = p;
        }
        if let Some(b) = arg_value(args, "--bind") {
            self.bind = b.to_string();
        }
        if let Some(url) = arg_value(args, "--database-url") {
            self.database_url = Some(url.to_string());
        }
        if has_flag(args, "--insecure-cookies") {
            self.cookie_secure = false;
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.http_port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.bind, self.http_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(cfg.csrf_lifetime, Duration::from_secs(3600));
        assert!(cfg.cookie_secure);
        assert!(cfg.database_url.is_none());
        assert!(cfg.admin.password.is_none());
    }

    #[test]
    fn env_values_override() {
        let cfg = Config::from_lookup(lookup(&[
            ("REGISTRAR_HTTP_PORT", "9001"),
            ("REGISTRAR_CSRF_LIFETIME_SECS", "60"),
            ("REGISTRAR_COOKIE_SECURE", "off"),
            ("REGISTRAR_DATABASE_URL", "postgres://localhost/registrar"),
            ("REGISTRAR_ADMIN_PASSWORD", "changeme"),
        ]))
        .unwrap();
        assert_eq!(cfg.http_port, 9001);
        assert_eq!(cfg.csrf_lifetime, Duration::from_secs(60));
        assert!(!cfg.cookie_secure);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/registrar"));
        assert!(!format!("{cfg:?}").contains("changeme"));
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(Config::from_lookup(lookup(&[("REGISTRAR_HTTP_PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup(&[("REGISTRAR_COOKIE_SECURE", "maybe")])).is_err());
    }

    #[test]
    fn cli_flags_win() {
        let mut cfg = Config::default();
        let args: Vec<String> = ["registrar", "--port", "7000", "--insecure-cookies"].iter().map(|s| s.to_string()).collect();
        cfg.apply_args(&args).unwrap();
        assert_eq!(cfg.http_port, 7000);
        assert!(!cfg.cookie_secure);
        assert_eq!(cfg.socket_addr().unwrap().port(), 7000);
    }
}
