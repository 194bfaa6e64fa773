//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}`: value of VAR, an error if unset
//! - `${VAR:-default}`: default when VAR is unset or empty
//! - `${VAR-default}`: default only when VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?: (?P<op>:?-) (?P<default>[^}]*) )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// A variable that could not be substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarError {
    /// Unset and without a default.
    Missing(String),
    /// Value spans lines, which could inject YAML structure.
    Multiline(String),
}

impl fmt::Display for VarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarError::Missing(name) => write!(f, "environment variable '{name}' is not set"),
            VarError::Multiline(name) => write!(
                f,
                "environment variable '{name}' contains newlines, which is not allowed"
            ),
        }
    }
}

/// Interpolate from the process environment.
///
/// Every failing variable is reported, not just the first.
pub fn interpolate(input: &str) -> Result<String, Vec<VarError>> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate using `lookup` to resolve variable names.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<VarError>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return whole.to_string();
        };
        let name = name.as_str();
        let default = caps.name("default").map(|m| m.as_str());
        let empty_uses_default = caps.name("op").is_some_and(|op| op.as_str() == ":-");

        match (lookup(name), default) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                errors.push(VarError::Multiline(name.to_string()));
                whole.to_string()
            }
            (Some(value), Some(default)) if value.is_empty() && empty_uses_default => {
                default.to_string()
            }
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                errors.push(VarError::Missing(name.to_string()));
                whole.to_string()
            }
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(errors)
    }
}
