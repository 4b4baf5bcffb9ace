//! Named parameter binding.
//!
//! The REST endpoint takes plain SQL text, so parameters are rendered as
//! literals and substituted before the statement is submitted.

use std::fmt::Write as _;

/// A value bound to a named parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Real(f64),
    /// Quoted and escaped. Blank text renders as `null`.
    Text(String),
    /// Inserted verbatim, e.g. `now` or a hex literal.
    Raw(String),
    Null,
}

impl ParamValue {
    /// Renders the value as a SQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            ParamValue::Integer(v) => v.to_string(),
            ParamValue::Real(v) => v.to_string(),
            ParamValue::Text(v) if v.trim().is_empty() => "null".to_string(),
            ParamValue::Text(v) => format!("\"{}\"", escape_literal(v)),
            ParamValue::Raw(v) => v.clone(),
            ParamValue::Null => "null".to_string(),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Integer(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Real(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

/// A named parameter, including its prefix (`@id`, `:id`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Substitutes every parameter into `sql`.
///
/// Longer names are replaced first so `@id` never rewrites part of `@id2`.
pub fn bind(sql: &str, params: &[Param]) -> String {
    let mut ordered: Vec<&Param> = params.iter().filter(|p| !p.name.is_empty()).collect();
    ordered.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

    ordered
        .into_iter()
        .fold(sql.to_string(), |text, param| {
            text.replace(&param.name, &param.value.to_literal())
        })
}

/// Escapes a string for a double-quoted literal.
///
/// C-style escapes for quotes, backslash and control characters; anything
/// else outside printable ASCII becomes `\uXXXX` (UTF-16 units).
pub fn escape_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0B}' => out.push_str("\\v"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_longest_name_first() {
        let sql = "SELECT * FROM m WHERE id = @id AND id2 = @id2";
        let bound = bind(sql, &[Param::new("@id", 1), Param::new("@id2", 2)]);
        assert_eq!(bound, "SELECT * FROM m WHERE id = 1 AND id2 = 2");
    }

    #[test]
    fn test_literals() {
        assert_eq!(ParamValue::from(1.5).to_literal(), "1.5");
        assert_eq!(ParamValue::from("   ").to_literal(), "null");
        assert_eq!(ParamValue::from(None::<i64>).to_literal(), "null");
        assert_eq!(ParamValue::Raw("now".into()).to_literal(), "now");
        assert_eq!(ParamValue::from("a\"b").to_literal(), "\"a\\\"b\"");
    }

    #[test]
    fn test_escape_non_ascii() {
        assert_eq!(escape_literal("tab\there"), "tab\\there");
        assert_eq!(escape_literal("é"), "\\u00e9");
        // Outside the BMP: surrogate pair.
        assert_eq!(escape_literal("😀"), "\\ud83d\\ude00");
    }

    #[test]
    fn test_bind_into_insert() {
        let sql = bind(
            "d1 VALUES (@ts, @v, @note)",
            &[
                Param::new("@ts", ParamValue::Raw("now".into())),
                Param::new("@v", 42),
                Param::new("@note", "ok"),
            ],
        );
        assert_eq!(sql, "d1 VALUES (now, 42, \"ok\")");
    }
}
