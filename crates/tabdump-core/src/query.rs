//! Read-only statement guard.

use crate::error::{ExportError, Result};

/// Rejects any statement whose first significant token is not `SELECT` or
/// `WITH`.
///
/// Tokenizer rule: leading whitespace, `-- ...` line comments, and
/// `/* ... */` block comments are skipped; the first remaining identifier is
/// compared case-insensitively. Anything else (DML, DDL, `EXPLAIN SELECT`,
/// parenthesized statements) is refused. Readers call this before the text
/// reaches the engine.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    match first_significant_token(sql) {
        Some(token)
            if token.eq_ignore_ascii_case("select") || token.eq_ignore_ascii_case("with") =>
        {
            Ok(())
        }
        Some(token) => Err(ExportError::Security(format!(
            "only SELECT queries are allowed, statement starts with `{token}`"
        ))),
        None => Err(ExportError::Security(
            "statement contains no SQL".to_owned(),
        )),
    }
}

fn first_significant_token(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n')?.1;
        } else if let Some(after) = rest.strip_prefix("/*") {
            let end = after.find("*/")?;
            rest = &after[end + 2..];
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}
