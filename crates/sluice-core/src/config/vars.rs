//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` / `${VAR}` - value of VAR, an error if it is unset
//! - `${VAR:-fallback}` - fallback when VAR is unset or empty
//! - `${VAR-fallback}` - fallback only when VAR is unset
//! - `$$` - a literal `$`

use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$(?:(?P<escape>\$)|\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:?-)(?P<fallback>[^}]*))?\}|(?P<bare>[A-Za-z_][A-Za-z0-9_]*))",
    )
    .expect("variable reference pattern is valid")
});

/// Outcome of interpolating a config document.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The text with every resolvable reference substituted.
    pub text: String,
    /// One message per unresolvable reference.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate references against the process environment.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate references using `lookup` to resolve variable names.
///
/// Every missing variable is reported, not only the first.
pub fn interpolate_with<F>(input: &str, lookup: F) -> InterpolationResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = VAR_REFERENCE.replace_all(input, |caps: &Captures| {
        if caps.name("escape").is_some() {
            return "$".to_string();
        }

        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return caps[0].to_string();
        };
        let name = name.as_str();
        let op = caps.name("op").map(|m| m.as_str());
        let fallback = caps.name("fallback").map_or("", |m| m.as_str());

        match (lookup(name), op) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                errors.push(format!("environment variable '{name}' contains a newline"));
                caps[0].to_string()
            }
            (Some(value), Some(":-")) if value.is_empty() => fallback.to_string(),
            (Some(value), _) => value,
            (None, Some(_)) => fallback.to_string(),
            (None, None) => {
                errors.push(format!("environment variable '{name}' is not set"));
                caps[0].to_string()
            }
        }
    });

    InterpolationResult {
        text: text.into_owned(),
        errors,
    }
}
