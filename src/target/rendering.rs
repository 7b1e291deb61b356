//! Statement rendering
//!
//! Statement blocks are templates rendered against an item's variables,
//! split into statements, and screened against the disallowed-command
//! patterns before they become an [`ApplyScope`].

use crate::error::{AppError, AppResult};
use crate::models::ApplyScope;
use handlebars::{handlebars_helper, no_escape, Handlebars};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Template variables
pub type RenderValues = BTreeMap<String, JsonValue>;

/// Location of an item whose scopes were rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedChange {
    pub bundle: usize,
    pub item: usize,
    pub object_type: i64,
}

/// Commands declarative input may never carry
static DISALLOWED_COMMANDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)\bUSE\s+ROLE\b",
        r"(?is)\bUSE\s+SECONDARY\s+ROLES?\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

handlebars_helper!(uppercase: |s: str| s.to_uppercase());

/// Strict: a reference to an undefined variable fails the render
static TEMPLATES: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(no_escape);
    handlebars.register_helper("uppercase", Box::new(uppercase));
    handlebars
});

/// Render one template
pub fn render_template<S: Serialize>(template: &str, values: S) -> AppResult<String> {
    Ok(TEMPLATES.render_template(template, &values)?)
}

/// Render a fixed statement template from `(name, value)` pairs
pub fn render_statement(template: &str, values: &[(&str, &str)]) -> AppResult<String> {
    let values: RenderValues = values
        .iter()
        .map(|(k, v)| (k.to_string(), JsonValue::String(v.to_string())))
        .collect();
    render_template(template, &values)
}

/// Split rendered text into statements, one per terminator
pub fn segment_statements(text: &str) -> Vec<String> {
    text.split(';')
        .map(|fragment| {
            fragment
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

/// Fail if `statement` matches a disallowed-command pattern
pub fn check_statement(statement: &str) -> AppResult<()> {
    match DISALLOWED_COMMANDS.iter().find(|p| p.is_match(statement)) {
        Some(_) => Err(AppError::UnapprovedCommand(statement.to_string())),
        None => Ok(()),
    }
}

/// Accept a plain (`ORDERS`, `_tmp$1`) or double-quoted (`"Sales Data"`)
/// identifier; anything else could carry a second statement
pub fn check_identifier(identifier: &str) -> AppResult<&str> {
    let id = identifier.trim();
    let plain = id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    let quoted = id.len() > 2
        && id.starts_with('"')
        && id.ends_with('"')
        && !id[1..id.len() - 1].replace("\"\"", "").contains('"');

    if plain || quoted {
        Ok(id)
    } else {
        Err(AppError::InvalidIdentifier(identifier.to_string()))
    }
}

/// Render a user-supplied block into a named scope
pub fn scope_from_block(name: &str, block: &str, values: &RenderValues) -> AppResult<ApplyScope> {
    let rendered = render_template(block, values)?;
    let statements = segment_statements(&rendered);
    for statement in &statements {
        check_statement(statement)?;
    }
    Ok(ApplyScope::new(name, statements))
}

/// Replace characters that would break out of a quoted SQL literal
pub fn make_string_database_safe(text: &str) -> String {
    const UNSAFE: &[char] = &[
        '\'', '@', '!', ';', '#', '"', '$', '%', '^', '&', '*', '(', ')', '/',
    ];
    text.chars()
        .map(|c| if UNSAFE.contains(&c) { ' ' } else { c })
        .collect()
}

/// Quote a value as a SQL string literal
pub fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
