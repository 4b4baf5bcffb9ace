//! # Domain Types for tdlink
//!
//! This module defines the values that flow through the write path: the
//! statements callers submit and the results the server sends back.
//!
//! ## Design Philosophy: Classify Once, Up Front
//!
//! Whether a statement may be merged with others is decided by the caller
//! when it builds a [`Statement`], not by sniffing the text later. An insertion
//! is carried as its clause only (everything after `INSERT INTO `), so merging
//! a group is a join, never a string search-and-replace:
//!
//! ```text
//! INSERT INTO d1 VALUES (now, 1);      clause: "d1 VALUES (now, 1)"
//! INSERT INTO d2 VALUES (now, 2);      clause: "d2 VALUES (now, 2)"
//!
//! combined:  INSERT INTO d1 VALUES (now, 1) d2 VALUES (now, 2);
//! ```
//!
//! ## Invariants
//!
//! - An [`InsertStatement`] clause is non-empty and has no `;` outside quotes
//! - A [`Statement`]'s kind and text never change after construction
//! - A [`QueryResult`] is shared by `Arc` between all statements of one request

use std::fmt;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Header every insertion statement starts with on the wire.
pub const INSERT_HEADER: &str = "INSERT INTO ";

// =============================================================================
// Statement Classification
// =============================================================================

/// How the dispatcher treats a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Single-row insertion; may be merged with other insertions.
    Insertion,
    /// Anything else; always sent alone.
    Other,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Insertion => write!(f, "insertion"),
            StatementKind::Other => write!(f, "other"),
        }
    }
}

// =============================================================================
// Insert Statement
// =============================================================================

/// A validated single-row insertion, stored as the clause after `INSERT INTO `.
///
/// # Example
///
/// ```rust
/// use tdlink::types::InsertStatement;
///
/// let a = InsertStatement::parse("insert into d1 values (now, 1);").unwrap();
/// assert_eq!(a.clause(), "d1 values (now, 1)");
/// assert_eq!(a.to_sql(), "INSERT INTO d1 values (now, 1);");
///
/// let b = InsertStatement::new("d2 USING meters TAGS ('b') VALUES (now, 2)").unwrap();
/// assert_eq!(b.encoded_len(), b.to_sql().len());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    clause: String,
}

impl InsertStatement {
    /// Creates an insertion from its clause (target table and values).
    ///
    /// Surrounding whitespace and a single trailing `;` are removed.
    ///
    /// # Errors
    ///
    /// `Error::MalformedInsert` if the clause is empty, has a `;` outside a
    /// quoted literal, leaves a literal open, or itself starts with
    /// `INSERT INTO`.
    pub fn new(clause: impl Into<String>) -> Result<Self> {
        let clause = clause.into();
        let trimmed = clause.trim();
        let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

        if trimmed.is_empty() {
            return Err(Error::MalformedInsert {
                reason: "empty insert clause".to_string(),
            });
        }
        check_terminators(trimmed)?;
        if starts_with_header(trimmed) {
            return Err(Error::MalformedInsert {
                reason: format!("clause repeats the INSERT INTO header: {}", preview(trimmed)),
            });
        }

        Ok(Self {
            clause: trimmed.to_string(),
        })
    }

    /// Parses a full `INSERT INTO ...` statement.
    ///
    /// The header is matched case-insensitively after trimming leading
    /// whitespace.
    pub fn parse(sql: &str) -> Result<Self> {
        let sql = sql.trim_start();
        if !starts_with_header(sql) {
            return Err(Error::MalformedInsert {
                reason: format!("statement does not start with INSERT INTO: {}", preview(sql)),
            });
        }
        Self::new(&sql[INSERT_HEADER.len()..])
    }

    /// The clause after the header, without terminator.
    pub fn clause(&self) -> &str {
        &self.clause
    }

    /// Renders this insertion as a standalone statement.
    pub fn to_sql(&self) -> String {
        format!("{}{};", INSERT_HEADER, self.clause)
    }

    /// Length in bytes of [`to_sql`](Self::to_sql), without allocating.
    pub fn encoded_len(&self) -> usize {
        INSERT_HEADER.len() + self.clause.len() + 1
    }
}

/// Rejects a `;` outside quoted literals, and literals left open. Either
/// would end the merged statement early or swallow the next member.
fn check_terminators(clause: &str) -> Result<()> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in clause.chars() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ';' => {
                return Err(Error::MalformedInsert {
                    reason: format!("clause contains a statement terminator: {}", preview(clause)),
                });
            }
            None => {}
        }
    }

    if quote.is_some() {
        return Err(Error::MalformedInsert {
            reason: format!("clause has an unterminated literal: {}", preview(clause)),
        });
    }
    Ok(())
}

fn starts_with_header(sql: &str) -> bool {
    sql.len() >= INSERT_HEADER.len()
        && sql.is_char_boundary(INSERT_HEADER.len())
        && sql[..INSERT_HEADER.len()].eq_ignore_ascii_case(INSERT_HEADER)
}

fn preview(sql: &str) -> String {
    const MAX: usize = 60;
    if sql.len() <= MAX {
        return sql.to_string();
    }
    let mut end = MAX;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &sql[..end])
}

// =============================================================================
// Statement
// =============================================================================

/// A statement submitted to the dispatcher.
///
/// # Rust Pattern: Tagged Variant
///
/// The kind is part of the type. A `Statement::Other` can never end up in a
/// merged insert, whatever its text says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Mergeable single-row insertion.
    Insert(InsertStatement),
    /// Any other statement, sent verbatim and alone.
    Other(String),
}

impl Statement {
    /// Builds an insertion from its clause. See [`InsertStatement::new`].
    pub fn insert(clause: impl Into<String>) -> Result<Self> {
        InsertStatement::new(clause).map(Statement::Insert)
    }

    /// Wraps any statement text that must not be merged.
    pub fn other(sql: impl Into<String>) -> Self {
        Statement::Other(sql.into().trim().to_string())
    }

    /// Returns how the dispatcher will route this statement.
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Insert(_) => StatementKind::Insertion,
            Statement::Other(_) => StatementKind::Other,
        }
    }

    /// Renders the statement as sent when it travels alone.
    pub fn to_sql(&self) -> String {
        match self {
            Statement::Insert(insert) => insert.to_sql(),
            Statement::Other(sql) => sql.clone(),
        }
    }

    /// Bytes this statement contributes to a batch's size accounting.
    pub fn encoded_len(&self) -> usize {
        match self {
            Statement::Insert(insert) => insert.encoded_len(),
            Statement::Other(sql) => sql.len(),
        }
    }
}

impl From<InsertStatement> for Statement {
    fn from(insert: InsertStatement) -> Self {
        Statement::Insert(insert)
    }
}

// =============================================================================
// Query Result
// =============================================================================

/// Column description from the response envelope.
///
/// On the wire each entry is a `[name, type, length]` triple.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, String, u32)")]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Server type name, e.g. `TIMESTAMP` or `NCHAR`.
    pub type_name: String,
    /// Declared length in bytes.
    pub length: u32,
}

impl From<(String, String, u32)> for ColumnMeta {
    fn from((name, type_name, length): (String, String, u32)) -> Self {
        Self {
            name,
            type_name,
            length,
        }
    }
}

/// Outcome of one request/response exchange.
///
/// For a merged insert this describes the whole group: `rows` is the total
/// number of rows the server wrote, not a per-statement count.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct QueryResult {
    /// Status code; 0 is the only success value.
    pub code: i32,

    /// Server message, usually present only on failure.
    #[serde(default)]
    pub desc: Option<String>,

    /// Affected (insert) or returned (query) row count.
    #[serde(default)]
    pub rows: Option<u64>,

    /// Column descriptions for queries.
    #[serde(default)]
    pub column_meta: Option<Vec<ColumnMeta>>,

    /// Row-major result values for queries.
    #[serde(default)]
    pub data: Option<Vec<Vec<JsonValue>>>,
}

impl QueryResult {
    /// Code the server uses for success.
    pub const SUCCESS: i32 = 0;

    /// Returns true if `code` is the success sentinel.
    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }

    /// Affected row count, 0 if the server omitted it.
    pub fn affected_rows(&self) -> u64 {
        self.rows.unwrap_or(0)
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&JsonValue> {
        self.data.as_ref()?.first()?.first()
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_meta
            .as_ref()?
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_from_clause() {
        let insert = InsertStatement::new("  d1 VALUES (now, 1);  ").unwrap();
        assert_eq!(insert.clause(), "d1 VALUES (now, 1)");
        assert_eq!(insert.to_sql(), "INSERT INTO d1 VALUES (now, 1);");
        assert_eq!(insert.encoded_len(), insert.to_sql().len());
    }

    #[test]
    fn test_insert_parse_is_case_insensitive() {
        let insert = InsertStatement::parse("\n insert into d1 values (now, 1)").unwrap();
        assert_eq!(insert.clause(), "d1 values (now, 1)");
    }

    #[test]
    fn test_insert_rejects_bad_shapes() {
        assert!(matches!(
            InsertStatement::new("   "),
            Err(Error::MalformedInsert { .. })
        ));
        assert!(matches!(
            InsertStatement::new(";"),
            Err(Error::MalformedInsert { .. })
        ));
        assert!(matches!(
            InsertStatement::new("d1 VALUES (now, 1);;"),
            Err(Error::MalformedInsert { .. })
        ));
        assert!(matches!(
            InsertStatement::new("INSERT INTO d1 VALUES (now, 1)"),
            Err(Error::MalformedInsert { .. })
        ));
        assert!(matches!(
            InsertStatement::parse("SELECT * FROM d1"),
            Err(Error::MalformedInsert { .. })
        ));
    }

    #[test]
    fn test_insert_keeps_inner_semicolons() {
        let insert = InsertStatement::new("d1 VALUES (now, 'a;b')").unwrap();
        assert_eq!(insert.clause(), "d1 VALUES (now, 'a;b')");
    }

    #[test]
    fn test_insert_rejects_unquoted_terminator() {
        let err = InsertStatement::new("d1 VALUES (now, 1); DELETE FROM d9").unwrap_err();
        assert!(matches!(err, Error::MalformedInsert { .. }));

        // Quoted semicolons and escaped quotes are literal text.
        assert!(InsertStatement::new(r#"d1 VALUES (now, "x;y")"#).is_ok());
        assert!(InsertStatement::new(r"d1 VALUES (now, 'it\'s; fine')").is_ok());
        assert!(InsertStatement::new("d1 VALUES (now, 'it''s; fine')").is_ok());
    }

    #[test]
    fn test_insert_rejects_open_literal() {
        assert!(matches!(
            InsertStatement::new("d1 VALUES (now, 'abc)"),
            Err(Error::MalformedInsert { .. })
        ));
    }

    #[test]
    fn test_parse_does_not_split_multibyte_text() {
        assert!(InsertStatement::parse("インサート").is_err());
        assert!(InsertStatement::parse("INSERT INTOé").is_err());
    }

    #[test]
    fn test_statement_kind() {
        let insert = Statement::insert("d1 VALUES (now, 1)").unwrap();
        assert_eq!(insert.kind(), StatementKind::Insertion);

        // Text does not matter for Other: it is never merged.
        let other = Statement::other("INSERT INTO d1 VALUES (now, 1)");
        assert_eq!(other.kind(), StatementKind::Other);
        assert_eq!(other.to_sql(), "INSERT INTO d1 VALUES (now, 1)");
    }

    #[test]
    fn test_query_result_deserialize() {
        let body = r#"{
            "code": 0,
            "column_meta": [["ts", "TIMESTAMP", 8], ["v", "INT", 4]],
            "data": [["2024-01-01 00:00:00.000", 1]],
            "rows": 1
        }"#;
        let result: QueryResult = serde_json::from_str(body).unwrap();
        assert!(result.is_success());
        assert_eq!(result.affected_rows(), 1);
        assert_eq!(result.column_index("V"), Some(1));
        assert_eq!(
            result.column_meta.as_ref().unwrap()[0],
            ColumnMeta {
                name: "ts".to_string(),
                type_name: "TIMESTAMP".to_string(),
                length: 8,
            }
        );
        assert_eq!(
            result.scalar(),
            Some(&JsonValue::String("2024-01-01 00:00:00.000".to_string()))
        );
    }

    #[test]
    fn test_query_result_minimal_failure() {
        let result: QueryResult =
            serde_json::from_str(r#"{"code": 9731, "desc": "Table does not exist"}"#).unwrap();
        assert!(!result.is_success());
        assert_eq!(result.affected_rows(), 0);
        assert_eq!(result.scalar(), None);
    }
}
