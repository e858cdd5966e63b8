//! # Manifest Transformer
//!
//! Turns the raw components text of one provider into per-object manifests
//! ready for decoding:
//!
//! 1. `${VAR}` references are substituted from an explicit [`Variables`] map
//! 2. the text is split on lines that are exactly `---`
//! 3. the image placeholder and the default manager command are replaced
//!
//! Substitution only supports the shell forms clusterctl templates use:
//! `${VAR}`, `${VAR:-default}`, `${VAR:=default}`, `${VAR-default}` and
//! `${VAR=default}`. Unset variables without a default expand to nothing.

use crate::constants::{COMMAND_PLACEHOLDER, IMAGE_PLACEHOLDER};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static VARIABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .expect("Failed to compile VARIABLE_NAME regex - this should never happen")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("unterminated variable reference at offset {0}")]
    Unterminated(usize),

    #[error("invalid variable name {0:?}")]
    InvalidName(String),

    #[error("bad substitution ${{{0}}}")]
    BadSubstitution(String),
}

/// Variables visible to `${VAR}` substitution
///
/// Built from the process environment plus the operator's feature-gate
/// overlay. The process environment itself is never modified.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    #[must_use]
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Current process environment with `overlay` taking precedence
    #[must_use]
    pub fn from_env_with(overlay: &BTreeMap<String, String>) -> Self {
        let mut values: BTreeMap<String, String> = std::env::vars().collect();
        values.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { values }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Per-provider inputs to [`transform_components`]
#[derive(Debug, Clone, Copy)]
pub struct Rewrite<'a> {
    pub image: &'a str,
    pub command: &'a str,
}

/// Substitute, split and rewrite one provider's components text
///
/// Output order follows the source document.
pub fn transform_components(
    text: &str,
    variables: &Variables,
    rewrite: Rewrite<'_>,
) -> Result<Vec<String>, ManifestError> {
    let substituted = substitute_variables(text, variables)?;
    Ok(split_documents(&substituted)
        .into_iter()
        .map(|fragment| replace_placeholders(&fragment, rewrite))
        .collect())
}

/// Expand `${...}` references
pub fn substitute_variables(text: &str, variables: &Variables) -> Result<String, ManifestError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut consumed = 0;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let body_start = start + 2;
        let Some(len) = rest[body_start..].find('}') else {
            return Err(ManifestError::Unterminated(consumed + start));
        };
        let expr = &rest[body_start..body_start + len];
        out.push_str(&resolve_expression(expr, variables)?);
        let advance = body_start + len + 1;
        consumed += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_expression(expr: &str, variables: &Variables) -> Result<String, ManifestError> {
    let name_len = expr
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(expr.len());
    let (name, operator) = expr.split_at(name_len);

    if name.is_empty() || !VARIABLE_NAME.is_match(name) {
        return Err(ManifestError::InvalidName(name.to_string()));
    }

    let value = variables.get(name);
    let default = |raw: &str| raw.trim_matches('"').to_string();

    let resolved = if operator.is_empty() {
        value.unwrap_or_default().to_string()
    } else if let Some(raw) = operator
        .strip_prefix(":-")
        .or_else(|| operator.strip_prefix(":="))
    {
        match value {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => default(raw),
        }
    } else if let Some(raw) = operator
        .strip_prefix('-')
        .or_else(|| operator.strip_prefix('='))
    {
        value.map_or_else(|| default(raw), str::to_string)
    } else {
        return Err(ManifestError::BadSubstitution(expr.to_string()));
    };
    Ok(resolved)
}

/// Split a multi-document YAML stream on lines that are exactly `---`
///
/// Whitespace-only fragments are dropped.
#[must_use]
pub fn split_documents(text: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_end_matches('\r') == "---" {
            documents.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents.push(current);
    documents
        .into_iter()
        .filter(|doc| !doc.trim().is_empty())
        .collect()
}

/// Replace the image placeholder and the default manager command in one fragment
#[must_use]
pub fn replace_placeholders(fragment: &str, rewrite: Rewrite<'_>) -> String {
    let with_image = fragment.replace(IMAGE_PLACEHOLDER, rewrite.image);
    replace_path_token(&with_image, COMMAND_PLACEHOLDER, rewrite.command)
}

/// Replace `token` only where it stands alone as a path, so `/manager` is
/// rewritten but `/managers` or `/opt/manager` are not
fn replace_path_token(text: &str, token: &str, replacement: &str) -> String {
    let is_path_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/');
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in text.match_indices(token) {
        let before = text[..idx].chars().next_back();
        let after = text[idx + token.len()..].chars().next();
        if before.is_some_and(is_path_char) || after.is_some_and(is_path_char) {
            continue;
        }
        out.push_str(&text[last..idx]);
        out.push_str(replacement);
        last = idx + token.len();
    }
    out.push_str(&text[last..]);
    out
}
