//! Form validation with an explicit rule list.
//!
//! Each rule is a `Rule` variant carrying its parameters; `check` is the single
//! place that interprets them. Rules other than `Required` only run when the
//! field has a value, so an optional empty field never trips `Email` or `MinLength`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("static email regex")
});

#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    Email,
    MinLength(usize),
    MaxLength(usize),
    Numeric,
    Alpha,
    Alphanumeric,
    Pattern(Regex),
    /// Value must equal the value of the named field.
    Matches(&'static str),
}

#[derive(Debug, Clone)]
struct FieldRule {
    field: String,
    rule: Rule,
    message: Option<String>,
}

/// Field-keyed validation messages, fields in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }
    pub fn get(&self, field: &str) -> Option<&[String]> { self.0.get(field).map(|v| v.as_slice()) }
    pub fn contains(&self, field: &str) -> bool { self.0.contains_key(field) }
    pub fn first(&self, field: &str) -> Option<&str> { self.0.get(field).and_then(|v| v.first()).map(|s| s.as_str()) }
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> { self.0 }
    pub fn from_map(map: BTreeMap<String, Vec<String>>) -> Self { Self(map) }
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut e = Self::default();
        e.add(field, message);
        e
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}: {}", k, v.join("; "))).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

pub struct Validator<'a> {
    data: &'a BTreeMap<String, String>,
    rules: Vec<FieldRule>,
}

impl<'a> Validator<'a> {
    pub fn new(data: &'a BTreeMap<String, String>) -> Self { Self { data, rules: Vec::new() } }

    pub fn rule(mut self, field: &str, rule: Rule) -> Self {
        self.rules.push(FieldRule { field: field.to_string(), rule, message: None });
        self
    }

    pub fn rule_msg(mut self, field: &str, rule: Rule, message: impl Into<String>) -> Self {
        self.rules.push(FieldRule { field: field.to_string(), rule, message: Some(message.into()) });
        self
    }

    /// Run every rule. On success returns the trimmed values of the fields that
    /// had at least one rule.
    pub fn validate(self) -> Result<BTreeMap<String, String>, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        for fr in &self.rules {
            let value = self.data.get(&fr.field).map(|s| s.trim());
            if let Some(default_msg) = check(&fr.field, &fr.rule, value, self.data) {
                errors.add(&fr.field, fr.message.clone().unwrap_or(default_msg));
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        let mut validated = BTreeMap::new();
        for fr in &self.rules {
            if let Some(v) = self.data.get(&fr.field) {
                validated.entry(fr.field.clone()).or_insert_with(|| v.trim().to_string());
            }
        }
        Ok(validated)
    }
}

/// Evaluate one rule; `Some(message)` means it failed.
fn check(field: &str, rule: &Rule, value: Option<&str>, data: &BTreeMap<String, String>) -> Option<String> {
    let present = value.filter(|v| !v.is_empty());
    match rule {
        Rule::Required => match present {
            Some(_) => None,
            None => Some(format!("The {field} field is required")),
        },
        Rule::Email => {
            let v = present?;
            (!EMAIL_RE.is_match(v)).then(|| "The email format is invalid".to_string())
        }
        Rule::MinLength(n) => {
            let v = present?;
            (v.chars().count() < *n).then(|| format!("The {field} field must be at least {n} characters"))
        }
        Rule::MaxLength(n) => {
            let v = present?;
            (v.chars().count() > *n).then(|| format!("The {field} field must not exceed {n} characters"))
        }
        Rule::Numeric => {
            let v = present?;
            let ok = v.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false);
            (!ok).then(|| format!("The {field} field must be numeric"))
        }
        Rule::Alpha => {
            let v = present?;
            (!v.chars().all(|c| c.is_alphabetic())).then(|| format!("The {field} field may only contain letters"))
        }
        Rule::Alphanumeric => {
            let v = present?;
            (!v.chars().all(|c| c.is_alphanumeric()))
                .then(|| format!("The {field} field may only contain letters and numbers"))
        }
        Rule::Pattern(re) => {
            let v = present?;
            (!re.is_match(v)).then(|| format!("The {field} field format is invalid"))
        }
        Rule::Matches(other) => {
            let v = present?;
            (data.get(*other).map(|o| o.trim()) != Some(v)).then(|| format!("The {field} field must match {other}"))
        }
    }
}
