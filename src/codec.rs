//! # Wire Codec
//!
//! Turns a flushed group into one request body, and one response body back
//! into a [`QueryResult`] or an [`Error`].
//!
//! ## Request Body
//!
//! ```text
//! Other (always alone):   <statement text>
//! Insert group:           INSERT INTO <clause 1> <clause 2> ... <clause n>;
//! ```
//!
//! The server accepts several `table VALUES (...)` clauses under one header,
//! so a group of single-row inserts becomes one multi-row insert.
//!
//! ## Response Envelope
//!
//! ```text
//! { "code": 0, "desc": null, "rows": 3, "column_meta": [...], "data": [...] }
//! ```
//!
//! | HTTP status | Envelope parses | code | Outcome |
//! |-------------|-----------------|------|---------|
//! | 2xx | yes | 0 | `Ok(result)` |
//! | 2xx | yes | != 0 | `Error::Server` |
//! | 2xx | no | - | `Error::Decode` |
//! | other | yes | any | `Error::Server` |
//! | other | no | - | `Error::HttpStatus` |

use crate::error::{Error, Result};
use crate::transport::RawResponse;
use crate::types::{InsertStatement, QueryResult, Statement, INSERT_HEADER};

// =============================================================================
// Request Encoding
// =============================================================================

/// Merges insertions into a single multi-row statement.
///
/// # Errors
///
/// `Error::MalformedInsert` for an empty group.
pub fn combine_inserts<'a, I>(inserts: I) -> Result<String>
where
    I: IntoIterator<Item = &'a InsertStatement>,
{
    let inserts = inserts.into_iter();
    let mut body = String::with_capacity(INSERT_HEADER.len() + inserts.size_hint().0 * 64);
    body.push_str(INSERT_HEADER);

    let mut count = 0usize;
    for insert in inserts {
        if count > 0 {
            body.push(' ');
        }
        body.push_str(insert.clause());
        count += 1;
    }

    if count == 0 {
        return Err(Error::MalformedInsert {
            reason: "cannot combine an empty insert group".to_string(),
        });
    }

    body.push(';');
    debug_assert!(body.starts_with(INSERT_HEADER) && body.ends_with(';'));
    Ok(body)
}

/// Encodes a flushed group as one request body.
///
/// A group is either a run of insertions or a single other statement.
///
/// # Errors
///
/// `Error::MalformedInsert` when the group is empty or mixes kinds. Both are
/// dispatcher bugs, never caller errors.
pub fn encode_group<'a, I>(statements: I) -> Result<String>
where
    I: IntoIterator<Item = &'a Statement>,
{
    let statements: Vec<&Statement> = statements.into_iter().collect();

    match statements.as_slice() {
        [] => Err(Error::MalformedInsert {
            reason: "cannot encode an empty group".to_string(),
        }),
        [Statement::Other(sql)] => Ok(sql.clone()),
        [Statement::Insert(insert)] => Ok(insert.to_sql()),
        many => {
            let mut inserts = Vec::with_capacity(many.len());
            for statement in many {
                match statement {
                    Statement::Insert(insert) => inserts.push(insert),
                    Statement::Other(_) => {
                        return Err(Error::MalformedInsert {
                            reason: "a group may not mix insertions with other statements"
                                .to_string(),
                        })
                    }
                }
            }
            combine_inserts(inserts)
        }
    }
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Decodes a raw HTTP response into a result, applying the status rules from
/// the module documentation.
pub fn decode_response(response: &RawResponse) -> Result<QueryResult> {
    let parsed = serde_json::from_str::<QueryResult>(&response.body);

    if response.is_success() {
        let result = parsed?;
        if !result.is_success() {
            return Err(server_error(result));
        }
        return Ok(result);
    }

    match parsed {
        Ok(result) => Err(server_error(result)),
        Err(_) => Err(Error::HttpStatus {
            status: response.status,
            reason: response.reason.clone(),
        }),
    }
}

fn server_error(result: QueryResult) -> Error {
    Error::Server {
        code: result.code,
        desc: result.desc.unwrap_or_default(),
    }
}

// =============================================================================
// Tests
// =============================================================================
