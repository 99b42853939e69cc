//! SQL text handling on the client side: statement classification,
//! positioned-update cursor names and escape stripping.
//!
//! Nothing here parses SQL beyond the leading keyword. The server rejects
//! anything malformed.

use regex::Regex;
use std::sync::OnceLock;

/// How a statement is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlMode {
    /// `SELECT` / `VALUES`: opens a cursor
    Query,
    /// `CALL`: stored procedure, may return result sets
    Call,
    /// Everything else
    Update(UpdateMode),
}

impl SqlMode {
    pub fn is_query(self) -> bool {
        matches!(self, SqlMode::Query)
    }

    pub fn is_call(self) -> bool {
        matches!(self, SqlMode::Call)
    }

    pub fn is_update(self) -> bool {
        matches!(self, SqlMode::Update(_))
    }

    /// INSERT or UPDATE, the shapes that may return generated keys.
    pub fn may_generate_keys(self) -> bool {
        matches!(
            self,
            SqlMode::Update(UpdateMode::Insert | UpdateMode::Update)
        )
    }

    /// UPDATE or DELETE, the shapes that may be positioned.
    pub fn may_be_positioned(self) -> bool {
        matches!(
            self,
            SqlMode::Update(UpdateMode::Update | UpdateMode::Delete)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Insert,
    Delete,
    Update,
    Other,
}

/// Leading keyword of a statement.
///
/// Skips whitespace, `{`, `?`, `=` and both comment styles (`--` to end of
/// line, nestable `/* */`). Returns `None` when nothing but comments and
/// whitespace remain; the token may be empty when the statement starts
/// with a non-letter.
pub fn first_token(sql: &str) -> Option<&str> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || b"{?=".contains(&bytes[i])) {
            i += 1;
        }
        if bytes[i..].starts_with(b"--") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if bytes[i..].starts_with(b"/*") {
            let mut depth = 0usize;
            while i < bytes.len() {
                if bytes[i..].starts_with(b"/*") {
                    depth += 1;
                    i += 2;
                } else if bytes[i..].starts_with(b"*/") {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
        } else {
            break;
        }
    }
    if i >= bytes.len() {
        return None;
    }
    let end = bytes[i..]
        .iter()
        .position(|b| !b.is_ascii_alphabetic())
        .map_or(bytes.len(), |n| i + n);
    Some(&sql[i..end])
}

/// Classify a statement by its leading keyword; `None` for comment-only text.
pub fn classify(sql: &str) -> Option<SqlMode> {
    let token = first_token(sql)?;
    let mode = if token.eq_ignore_ascii_case("select") || token.eq_ignore_ascii_case("values") {
        SqlMode::Query
    } else if token.eq_ignore_ascii_case("call") {
        SqlMode::Call
    } else if token.eq_ignore_ascii_case("insert") {
        SqlMode::Update(UpdateMode::Insert)
    } else if token.eq_ignore_ascii_case("delete") {
        SqlMode::Update(UpdateMode::Delete)
    } else if token.eq_ignore_ascii_case("update") {
        SqlMode::Update(UpdateMode::Update)
    } else {
        SqlMode::Update(UpdateMode::Other)
    };
    tracing::trace!(token, ?mode, "Classified statement");
    Some(mode)
}

/// Classification with comment-only text treated as an update the server will reject.
pub fn sql_mode(sql: &str) -> SqlMode {
    classify(sql).unwrap_or(SqlMode::Update(UpdateMode::Other))
}

/// Cursor named by a `WHERE CURRENT OF` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedCursor {
    /// Normalized name: quotes stripped, or upper-cased when unquoted
    pub name: String,
    /// Statement text carrying the normalized name
    pub sql: String,
}

fn where_current_of() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?is)\bWHERE\s+CURRENT\s+OF\s+("(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$#@]*)\s*;?\s*$"#,
            )
            .ok()
        })
        .as_ref()
}

/// Find the cursor of a positioned UPDATE or DELETE.
pub fn extract_where_current_of(sql: &str) -> Option<PositionedCursor> {
    let caps = where_current_of()?.captures(sql)?;
    let token = caps.get(1)?;
    let raw = token.as_str();
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Some(PositionedCursor {
            name: inner.replace("\"\"", "\""),
            sql: sql.to_string(),
        });
    }
    let name = raw.to_ascii_uppercase();
    let mut rewritten = String::with_capacity(sql.len());
    rewritten.push_str(&sql[..token.start()]);
    rewritten.push_str(&name);
    rewritten.push_str(&sql[token.end()..]);
    Some(PositionedCursor {
        name,
        sql: rewritten,
    })
}

/// Replace the last occurrence of the client cursor name with the server's name.
pub fn substitute_cursor_name(sql: &str, client_name: &str, server_name: &str) -> String {
    match sql.rfind(client_name) {
        Some(at) => format!(
            "{}{}{}",
            &sql[..at],
            server_name,
            &sql[at + client_name.len()..]
        ),
        None => sql.to_string(),
    }
}

/// Strip one `{ ... }` escape wrapper.
pub fn native_sql(sql: &str) -> String {
    let trimmed = sql.trim();
    match trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(inner) => inner.trim().to_string(),
        None => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_keywords() {
        assert_eq!(classify("SELECT * FROM T"), Some(SqlMode::Query));
        assert_eq!(classify("values 1"), Some(SqlMode::Query));
        assert_eq!(classify("Call proc(?)"), Some(SqlMode::Call));
        assert_eq!(
            classify("insert into t values (1)"),
            Some(SqlMode::Update(UpdateMode::Insert))
        );
        assert_eq!(
            classify("DELETE FROM T"),
            Some(SqlMode::Update(UpdateMode::Delete))
        );
        assert_eq!(
            classify("update t set a = 1"),
            Some(SqlMode::Update(UpdateMode::Update))
        );
        assert_eq!(
            classify("CREATE TABLE T (A INT)"),
            Some(SqlMode::Update(UpdateMode::Other))
        );
        assert_eq!(
            classify("SELECTED"),
            Some(SqlMode::Update(UpdateMode::Other))
        );
    }

    #[test]
    fn test_classify_skips_prefixes_and_comments() {
        assert_eq!(classify("  {? = call f(?)}"), Some(SqlMode::Call));
        assert_eq!(classify("-- note\n  select 1"), Some(SqlMode::Query));
        assert_eq!(
            classify("/* outer /* inner */ still */ VALUES 1"),
            Some(SqlMode::Query)
        );
        assert_eq!(classify("\t\n/*a*/--b\nselect"), Some(SqlMode::Query));
        assert_eq!(classify("(select 1)"), Some(SqlMode::Update(UpdateMode::Other)));
    }

    #[test]
    fn test_comment_only_has_no_token() {
        assert_eq!(classify("-- nothing here"), None);
        assert_eq!(classify("/* a /* b */ */  "), None);
        assert_eq!(classify("/* unterminated"), None);
        assert_eq!(classify(""), None);
        assert_eq!(sql_mode("   "), SqlMode::Update(UpdateMode::Other));
    }

    #[test]
    fn test_where_current_of_unquoted() {
        let found = extract_where_current_of("delete from t where current of c1").unwrap();
        assert_eq!(found.name, "C1");
        assert_eq!(found.sql, "delete from t where current of C1");
    }

    #[test]
    fn test_where_current_of_quoted() {
        let sql = r#"UPDATE T SET A = 1 WHERE CURRENT OF "my cursor""#;
        let found = extract_where_current_of(sql).unwrap();
        assert_eq!(found.name, "my cursor");
        assert_eq!(found.sql, sql);
        assert!(extract_where_current_of("UPDATE T SET A = 1 WHERE A = 2").is_none());
    }

    #[test]
    fn test_substitute_last_occurrence() {
        let sql = "UPDATE C1 SET A = 1 WHERE CURRENT OF C1";
        assert_eq!(
            substitute_cursor_name(sql, "C1", "SQL_CURLH000C3"),
            "UPDATE C1 SET A = 1 WHERE CURRENT OF SQL_CURLH000C3"
        );
        assert_eq!(substitute_cursor_name("X", "C1", "S"), "X");
    }

    #[test]
    fn test_native_sql_strips_escape() {
        assert_eq!(native_sql("{call proc(?)}"), "call proc(?)");
        assert_eq!(native_sql("  { ? = call f() }  "), "? = call f()");
        assert_eq!(native_sql("select 1"), "select 1");
    }
}
