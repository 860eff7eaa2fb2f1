//! Parsers for management console output.
//!
//! The console prints fixed-schema tables: a header block, a separator line
//! starting with `---`, then one pipe-delimited row per record. Rows with the
//! wrong column count are skipped without error.
//!
//! ```text
//! id | status   | name             | cluster | ip        | mac               | roles | pending_roles | online | group_id
//! ---|----------|------------------|---------|-----------|-------------------|-------|---------------|--------|---------
//! 1  | discover | Untitled (56:78) | None    | 10.20.1.3 | 52:54:00:12:56:78 |       |               | True   | None
//! ```

use crate::error::{BenchError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

const NODE_COLUMNS: usize = 10;
const ENV_COLUMNS: usize = 7;

/// A node as registered with the management console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub id: u32,
    pub status: String,
    pub name: String,
    /// Owning environment id.
    pub cluster: Option<u32>,
    pub ip: String,
    pub mac: String,
    pub roles: BTreeSet<String>,
    pub pending_roles: BTreeSet<String>,
    pub online: Option<bool>,
    pub group_id: Option<u32>,
}

impl NodeRecord {
    /// Freshly booted node waiting for role assignment.
    pub fn is_discovered(&self) -> bool {
        self.status == "discover"
    }
}

/// A deployment environment as known to the management console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentRecord {
    pub id: u32,
    pub status: String,
    pub name: String,
    pub mode: String,
    pub release_id: Option<u32>,
    /// Pending change set, `None` when the column is empty.
    pub changes: Option<Vec<String>>,
    pub pending_release_id: Option<u32>,
}

/// Digit-only text parses to its value, anything else to `None`.
pub fn parse_int(s: &str) -> Option<u32> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Tri-state boolean: empty and `None` are unknown, `True` is true, any other text false.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "" | "None" => None,
        "True" => Some(true),
        _ => Some(false),
    }
}

/// Comma-separated list, trimmed, empty entries dropped, order kept.
pub fn parse_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|v| !v.is_empty()).map(String::from).collect()
}

/// Parse a printed list or tuple of string literals, e.g. `['networks', u'attributes']`.
///
/// Empty input and `None` give `Ok(None)`. Anything outside that grammar is
/// rejected rather than guessed at.
pub fn parse_literal(s: &str) -> Result<Option<Vec<String>>> {
    let s = s.trim();
    if s.is_empty() || s == "None" {
        return Ok(None);
    }

    let reject = |why: &str| BenchError::validation(format!("Unsupported literal {:?}: {}", s, why));

    let close = match s.chars().next() {
        Some('[') => ']',
        Some('(') => ')',
        _ => return Err(reject("expected a list or tuple")),
    };

    let mut chars = s[1..].chars().peekable();
    let mut items = Vec::new();

    loop {
        skip_spaces(&mut chars);
        match chars.peek().copied() {
            Some(c) if c == close => {
                chars.next();
                break;
            }
            Some(_) => {}
            None => return Err(reject("unterminated sequence")),
        }

        items.push(read_string(&mut chars).ok_or_else(|| reject("expected a string item"))?);

        skip_spaces(&mut chars);
        match chars.next() {
            Some(',') => {}
            Some(c) if c == close => break,
            _ => return Err(reject("expected ',' or end of sequence")),
        }
    }

    skip_spaces(&mut chars);
    if chars.next().is_some() {
        return Err(reject("trailing characters"));
    }

    Ok(Some(items))
}

fn skip_spaces(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// One quoted string with an optional `u` prefix and backslash escapes.
fn read_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    if chars.peek() == Some(&'u') {
        chars.next();
    }
    let quote = match chars.next()? {
        q @ ('\'' | '"') => q,
        _ => return None,
    };

    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => out.push(chars.next()?),
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}

/// Data rows following the `---` separator, split into trimmed cells.
fn table_rows(output: &str, columns: usize) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("---"))
        .skip(1)
        .map(|line| line.split('|').map(str::trim).collect::<Vec<_>>())
        .filter(move |cells| cells.len() == columns)
}

/// Parse the node table printed by the node listing command.
pub fn parse_node_table(output: &str) -> Vec<NodeRecord> {
    table_rows(output, NODE_COLUMNS)
        .filter_map(|c| {
            Some(NodeRecord {
                id: parse_int(c[0])?,
                status: c[1].to_string(),
                name: c[2].to_string(),
                cluster: parse_int(c[3]),
                ip: c[4].to_string(),
                mac: c[5].to_string(),
                roles: parse_list(c[6]).into_iter().collect(),
                pending_roles: parse_list(c[7]).into_iter().collect(),
                online: parse_bool(c[8]),
                group_id: parse_int(c[9]),
            })
        })
        .collect()
}

/// Parse the environment table printed by the environment listing command.
///
/// A row whose `changes` value falls outside the supported literal grammar is
/// dropped with a warning, like any other malformed row.
pub fn parse_environment_table(output: &str) -> Vec<EnvironmentRecord> {
    table_rows(output, ENV_COLUMNS)
        .filter_map(|c| {
            let id = parse_int(c[0])?;
            let changes = match parse_literal(c[5]) {
                Ok(changes) => changes,
                Err(e) => {
                    warn!(env_id = id, error = %e, "Skipping environment row");
                    return None;
                }
            };
            Some(EnvironmentRecord {
                id,
                status: c[1].to_string(),
                name: c[2].to_string(),
                mode: c[3].to_string(),
                release_id: parse_int(c[4]),
                changes,
                pending_release_id: parse_int(c[6]),
            })
        })
        .collect()
}

/// First non-empty line of a scalar response, trimmed.
pub fn first_value(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| !line.is_empty())
}

/// Whether any line matches the given pattern.
pub fn any_line_matches(output: &str, pattern: &Regex) -> bool {
    output.lines().any(|line| pattern.is_match(line))
}
