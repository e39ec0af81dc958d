//! Deterministic composite identifiers.
//!
//! Every part is escaped (`\` → `\\`, `:` → `\:`) and the parts are joined
//! with `:`. The encoding is reversible, so an active component ID can be
//! computed from `(deployment_id, component_id)` without a lookup and split
//! back into its parts when a new document has to be built.

use crate::error::{StateError, StateResult};

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Join `parts` into a single identifier.
pub fn compose<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        escape_into(part.as_ref(), &mut out);
    }
    out
}

/// Split an identifier produced by [`compose`] back into its parts.
pub fn decompose(id: &str) -> StateResult<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = id.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(escaped @ (ESCAPE | SEPARATOR)) => current.push(escaped),
                _ => return Err(StateError::InvalidId(id.to_string())),
            },
            SEPARATOR => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    Ok(parts)
}

/// Key prefix shared by every identifier whose first part is `first`.
pub fn prefix(first: &str) -> String {
    let mut out = String::new();
    escape_into(first, &mut out);
    out.push(SEPARATOR);
    out
}

/// ID of the active component tracking `component_id` within `deployment_id`.
pub fn active_component_id(deployment_id: &str, component_id: &str) -> String {
    compose(&[deployment_id, component_id])
}

/// Inverse of [`active_component_id`]: `(deployment_id, component_id)`.
pub fn split_active_component_id(id: &str) -> StateResult<(String, String)> {
    let mut parts = decompose(id)?;
    if parts.len() != 2 {
        return Err(StateError::InvalidId(id.to_string()));
    }
    let component_id = parts.pop().unwrap_or_default();
    let deployment_id = parts.pop().unwrap_or_default();
    Ok((deployment_id, component_id))
}

/// ID of a scanned component, as referenced by executable dependencies.
pub fn component_id(name: &str, version: &str, os: &str) -> String {
    compose(&[name, version, os])
}

fn escape_into(part: &str, out: &mut String) {
    for c in part.chars() {
        if c == ESCAPE || c == SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}
