// src/dag/naming.rs

//! Canonical step names.
//!
//! Steps are identified by the unqualified name of their type, converted to
//! snake_case: `crate::steps::TopicUsers` becomes `topic_users`. Operators
//! may refer to a step by either form on the command line or in config.

use std::sync::LazyLock;

use regex::Regex;

static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z\d]+)([A-Z][a-z])").expect("valid regex"));
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));

/// Strip any module path (and generic arguments) from a type name.
pub fn short_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Canonical snake_case form of a step or type name.
pub fn canonical_name(name: &str) -> String {
    let short = short_name(name.trim());
    let spaced = ACRONYM_BOUNDARY.replace_all(short, "${1}_${2}");
    let spaced = WORD_BOUNDARY.replace_all(&spaced, "${1}_${2}");
    spaced.replace('-', "_").to_lowercase()
}

/// Default step title, e.g. `TopicUsersStep` -> "Converting topic users".
pub fn default_title(type_name: &str) -> String {
    let short = short_name(type_name);
    let short = short.strip_suffix("Step").filter(|s| !s.is_empty()).unwrap_or(short);
    let words = canonical_name(short).replace('_', " ");
    format!("Converting {}", pluralize(&words))
}

/// Naive English pluralisation of the last word of `phrase`.
fn pluralize(phrase: &str) -> String {
    if phrase.ends_with('s') {
        phrase.to_string()
    } else if let Some(stem) = phrase.strip_suffix('y').filter(|stem| {
        !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    }) {
        format!("{stem}ies")
    } else if phrase.ends_with("ch") || phrase.ends_with("sh") || phrase.ends_with('x') {
        format!("{phrase}es")
    } else {
        format!("{phrase}s")
    }
}
