use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Longest identifier Postgres keeps; longer ones are truncated on the server.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const HASH_SUFFIX_LEN: usize = 8;

lazy_static! {
    static ref TEMPLATE_KEY: Regex = Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap();
}

/// Sanitizes a declared name for use as a SQL identifier.
///
/// Trims, lowercases and replaces anything outside `[a-z0-9]` with `_`.
/// The result is passed through [`fit_identifier`].
pub fn sanitize_name(input: &str) -> String {
    let sanitized: String = input
        .trim()
        .chars()
        .map(|ch| {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() { ch } else { '_' }
        })
        .collect();
    fit_identifier(&sanitized)
}

/// Shortens `name` to [`MAX_IDENTIFIER_LEN`] bytes.
///
/// Names that already fit are returned unchanged. Longer names keep a prefix
/// and end in `_` plus the first hex digits of the SHA-256 of the full name,
/// so the identifier written by DDL is exactly the one found in the catalog
/// afterwards.
pub fn fit_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let suffix: String = digest
        .iter()
        .take(HASH_SUFFIX_LEN / 2)
        .map(|byte| format!("{:02x}", byte))
        .collect();
    let mut cut = MAX_IDENTIFIER_LEN - HASH_SUFFIX_LEN - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], suffix)
}

/// Double-quotes an identifier, escaping embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"table"."column"`
pub fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

/// Junction table for a many-to-many relation: the two table names sorted and joined.
pub fn junction_table_name(a: &str, b: &str) -> String {
    let mut tables = [a, b];
    tables.sort_unstable();
    fit_identifier(&format!("{}_{}", tables[0], tables[1]))
}

pub fn primary_key_name(table: &str) -> String {
    fit_identifier(&format!("{}_pkey", table))
}

pub fn foreign_key_name(table: &str, columns: &[&str]) -> String {
    fit_identifier(&format!("{}_{}_foreign", table, columns.join("_")))
}

pub fn unique_name(table: &str, columns: &[&str]) -> String {
    fit_identifier(&format!("{}_{}_unique", table, columns.join("_")))
}

pub fn index_name(table: &str, columns: &[&str]) -> String {
    fit_identifier(&format!("{}_{}_index", table, columns.join("_")))
}

/// Replaces `{KEY}` placeholders; unknown keys are left untouched.
pub fn template(message: &str, values: &HashMap<&str, String>) -> String {
    TEMPLATE_KEY
        .replace_all(message, |caps: &regex::Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
