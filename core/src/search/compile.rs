/*
 * compile.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Schedario, a mail and contact backend library.
 *
 * Schedario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Schedario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Schedario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Two-stage expression compilation. The first stage turns the boolean term
//! into a SQL `WHERE` fragment against the message table; terms that cannot
//! be expressed there degrade into TRUE, so the fragment never loses a match.
//! When any such term exists, the second stage re-evaluates the whole
//! expression in-process on the pre-filtered rows, calling back into the
//! folder for headers and bodies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Months, Utc};
use regex::RegexBuilder;

use crate::cancellable::Cancellable;
use crate::db::quote_literal;
use crate::error::{Result, StoreError};
use crate::search::index::SearchIndex;
use crate::search::sexp::Expr;
use crate::search::util;
use crate::store::{flags, Folder, Session};
use crate::storedb::MessageRecord;

/// Result of the SQL stage for one folder.
#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    /// Boolean SQL over-approximation of the expression.
    pub where_sql: String,
    /// True when the fragment is exact and no residual pass is needed.
    pub fully_sql: bool,
}

/// Per-folder facts the SQL stage needs (location predicates compile to
/// constants).
pub(crate) struct CompileCtx<'a> {
    pub store_uid: &'a str,
    pub folder_name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Int,
    Text,
}

struct SqlVal {
    sql: String,
    kind: Kind,
}

pub(crate) fn compile(expr: &Expr, ctx: &CompileCtx<'_>) -> Compiled {
    let (where_sql, fully_sql) = approx_bool(expr, ctx);
    Compiled { where_sql, fully_sql }
}

fn approx_bool(expr: &Expr, ctx: &CompileCtx<'_>) -> (String, bool) {
    match expr {
        Expr::Call(name, args) => match name.as_str() {
            "and" => {
                let mut parts = Vec::new();
                let mut exact = true;
                for arg in args {
                    let (sql, arg_exact) = approx_bool(arg, ctx);
                    exact &= arg_exact;
                    if sql != "1" {
                        parts.push(sql);
                    }
                }
                if parts.is_empty() {
                    ("1".to_string(), exact)
                } else {
                    (format!("({})", parts.join(" AND ")), exact)
                }
            }
            "or" => {
                let mut parts = Vec::new();
                let mut exact = true;
                for arg in args {
                    let (sql, arg_exact) = approx_bool(arg, ctx);
                    exact &= arg_exact;
                    if sql == "1" {
                        // one unconstrained branch widens the whole term
                        return ("1".to_string(), exact && args.len() == 1);
                    }
                    parts.push(sql);
                }
                if parts.is_empty() {
                    ("0".to_string(), true)
                } else {
                    (format!("({})", parts.join(" OR ")), exact)
                }
            }
            "not" => match args.first() {
                Some(arg) => {
                    let (sql, exact) = approx_bool(arg, ctx);
                    if exact {
                        (format!("(NOT {})", sql), true)
                    } else {
                        ("1".to_string(), false)
                    }
                }
                None => ("0".to_string(), true),
            },
            "match-all" => match args.first() {
                Some(arg) => approx_bool(arg, ctx),
                None => ("1".to_string(), true),
            },
            // the thread marker is transparent here; expansion happens later
            "match-threads" => match args.get(1) {
                Some(arg) => approx_bool(arg, ctx),
                None => ("1".to_string(), true),
            },
            _ => match sql_bool(expr, ctx) {
                Some(sql) => (sql, true),
                None => ("1".to_string(), false),
            },
        },
        _ => match sql_bool(expr, ctx) {
            Some(sql) => (sql, true),
            None => ("1".to_string(), false),
        },
    }
}

fn sql_bool(expr: &Expr, ctx: &CompileCtx<'_>) -> Option<String> {
    let value = sql_value(expr, ctx)?;
    Some(match value.kind {
        Kind::Bool => value.sql,
        Kind::Int => format!("({} <> 0)", value.sql),
        Kind::Text => format!("({} <> '')", value.sql),
    })
}

/// Columns addressable by header predicates.
fn header_column(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "subject" => Some("subject"),
        "from" => Some("mail_from"),
        "to" => Some("mail_to"),
        "cc" => Some("mail_cc"),
        "mlist" | "x-camel-mlist" => Some("mlist"),
        _ => None,
    }
}

fn str_arg(args: &[Expr], index: usize) -> Option<&str> {
    match args.get(index) {
        Some(Expr::Str(value)) => Some(value.as_str()),
        _ => None,
    }
}

fn header_function(name: &str) -> Option<&'static str> {
    match name {
        "header-contains" => Some("sdb_contains"),
        "header-matches" => Some("sdb_matches"),
        "header-starts-with" => Some("sdb_starts_with"),
        "header-ends-with" => Some("sdb_ends_with"),
        "header-has-words" => Some("sdb_has_words"),
        "header-soundex" => Some("sdb_soundex"),
        "header-regex" => Some("sdb_regex"),
        _ => None,
    }
}

/// Evaluate a compile-time integer constant (plain arithmetic over literals).
fn const_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Int(value) => Some(*value),
        Expr::Call(name, args) => match name.as_str() {
            "+" => args.iter().map(const_int).try_fold(0i64, |a, b| Some(a + b?)),
            "-" => {
                let mut iter = args.iter();
                let first = const_int(iter.next()?)?;
                iter.try_fold(first, |a, b| Some(a - const_int(b)?))
            }
            _ => None,
        },
        _ => None,
    }
}

fn relative_months(count: i64) -> i64 {
    let now = Utc::now();
    let shifted = if count >= 0 {
        now.checked_add_months(Months::new(count as u32))
    } else {
        now.checked_sub_months(Months::new((-count) as u32))
    };
    shifted.unwrap_or(now).timestamp()
}

fn sql_value(expr: &Expr, ctx: &CompileCtx<'_>) -> Option<SqlVal> {
    match expr {
        Expr::Bool(value) => Some(SqlVal {
            sql: if *value { "1" } else { "0" }.to_string(),
            kind: Kind::Bool,
        }),
        Expr::Int(value) => Some(SqlVal { sql: value.to_string(), kind: Kind::Int }),
        Expr::Str(value) => Some(SqlVal { sql: quote_literal(value), kind: Kind::Text }),
        Expr::Call(name, args) => sql_call(name, args, ctx),
    }
}

fn sql_call(name: &str, args: &[Expr], ctx: &CompileCtx<'_>) -> Option<SqlVal> {
    match name {
        "and" | "or" | "not" | "match-all" | "match-threads" => {
            let (sql, exact) = approx_bool(&Expr::Call(name.to_string(), args.to_vec()), ctx);
            if exact {
                Some(SqlVal { sql, kind: Kind::Bool })
            } else {
                None
            }
        }
        "header-contains" | "header-matches" | "header-starts-with" | "header-ends-with"
        | "header-has-words" | "header-soundex" | "header-regex" => {
            let header = str_arg(args, 0)?;
            let lowered = header.to_ascii_lowercase();
            if name == "header-matches"
                && (lowered == "message-id" || lowered == "x-camel-msgid")
            {
                let needle = str_arg(args, 1)?;
                let wanted = if lowered == "message-id" {
                    let (hi, lo) = util::msgid_split(util::hash_message_id(needle));
                    format!("{} {}", hi, lo)
                } else {
                    needle.trim().to_string()
                };
                return Some(SqlVal {
                    sql: format!("sdb_msgid_eq(part, {})", quote_literal(&wanted)),
                    kind: Kind::Bool,
                });
            }
            let column = header_column(header)?;
            let function = header_function(name)?;
            if args.len() < 2 {
                return None;
            }
            let mut parts = Vec::new();
            for word in &args[1..] {
                let value = sql_value(word, ctx)?;
                if value.kind != Kind::Text {
                    return None;
                }
                parts.push(format!("{}({}, {})", function, column, value.sql));
            }
            Some(SqlVal {
                sql: if parts.len() == 1 {
                    parts.remove(0)
                } else {
                    format!("({})", parts.join(" AND "))
                },
                kind: Kind::Bool,
            })
        }
        "header-exists" => {
            let column = header_column(str_arg(args, 0)?)?;
            Some(SqlVal { sql: format!("({} <> '')", column), kind: Kind::Bool })
        }
        "system-flag" => {
            let bit = flags::from_name(str_arg(args, 0)?);
            Some(SqlVal {
                sql: if bit == 0 {
                    "0".to_string()
                } else {
                    format!("((flags & {}) <> 0)", bit)
                },
                kind: Kind::Bool,
            })
        }
        "user-flag" => {
            let value = sql_value(args.first()?, ctx)?;
            if value.kind != Kind::Text {
                return None;
            }
            Some(SqlVal {
                sql: format!("sdb_user_flag(labels, {})", value.sql),
                kind: Kind::Bool,
            })
        }
        "user-tag" => {
            let value = sql_value(args.first()?, ctx)?;
            if value.kind != Kind::Text {
                return None;
            }
            Some(SqlVal {
                sql: format!("sdb_user_tag(usertags, labels, {})", value.sql),
                kind: Kind::Text,
            })
        }
        "uid" => {
            let mut uids = Vec::new();
            for arg in args {
                match arg {
                    Expr::Str(uid) => uids.push(quote_literal(uid)),
                    _ => return None,
                }
            }
            Some(SqlVal {
                sql: if uids.is_empty() {
                    "0".to_string()
                } else {
                    format!("(uid IN ({}))", uids.join(", "))
                },
                kind: Kind::Bool,
            })
        }
        "message-location" => {
            let uri = str_arg(args, 0)?;
            let matches = location_matches(uri, ctx.store_uid, ctx.folder_name);
            Some(SqlVal {
                sql: if matches { "1" } else { "0" }.to_string(),
                kind: Kind::Bool,
            })
        }
        "get-size" => Some(SqlVal { sql: "(size / 1024)".to_string(), kind: Kind::Int }),
        "get-sent-date" => Some(SqlVal { sql: "dsent".to_string(), kind: Kind::Int }),
        "get-received-date" => Some(SqlVal { sql: "dreceived".to_string(), kind: Kind::Int }),
        "get-current-date" => Some(SqlVal {
            sql: Utc::now().timestamp().to_string(),
            kind: Kind::Int,
        }),
        "get-relative-months" => {
            let count = const_int(args.first()?)?;
            Some(SqlVal { sql: relative_months(count).to_string(), kind: Kind::Int })
        }
        "make-time" => {
            let value = sql_value(args.first()?, ctx)?;
            Some(SqlVal {
                sql: format!("sdb_make_time({})", value.sql),
                kind: Kind::Int,
            })
        }
        "compare-date" => {
            let a = sql_value(args.first()?, ctx)?;
            let b = sql_value(args.get(1)?, ctx)?;
            Some(SqlVal {
                sql: format!("sdb_compare_date({}, {})", a.sql, b.sql),
                kind: Kind::Int,
            })
        }
        "+" => {
            let values: Vec<SqlVal> = args
                .iter()
                .map(|arg| sql_value(arg, ctx))
                .collect::<Option<Vec<_>>>()?;
            if values.is_empty() {
                return None;
            }
            if values.iter().all(|v| v.kind == Kind::Int) {
                let joined = values.iter().map(|v| v.sql.as_str()).collect::<Vec<_>>();
                Some(SqlVal { sql: format!("({})", joined.join(" + ")), kind: Kind::Int })
            } else {
                let joined = values.iter().map(|v| v.sql.as_str()).collect::<Vec<_>>();
                Some(SqlVal { sql: format!("({})", joined.join(" || ")), kind: Kind::Text })
            }
        }
        "-" => {
            let values: Vec<SqlVal> = args
                .iter()
                .map(|arg| sql_value(arg, ctx))
                .collect::<Option<Vec<_>>>()?;
            if values.is_empty() {
                return None;
            }
            let joined = values.iter().map(|v| v.sql.as_str()).collect::<Vec<_>>();
            Some(SqlVal { sql: format!("({})", joined.join(" - ")), kind: Kind::Int })
        }
        "=" => {
            let a = sql_value(args.first()?, ctx)?;
            let b = sql_value(args.get(1)?, ctx)?;
            let sql = if a.kind == Kind::Text && b.kind == Kind::Text {
                format!("({} = {} COLLATE NOCASE)", a.sql, b.sql)
            } else if a.kind == Kind::Bool && b.kind == Kind::Bool {
                format!("({} = {})", a.sql, b.sql)
            } else {
                format!(
                    "(CAST({} AS INTEGER) = CAST({} AS INTEGER))",
                    a.sql, b.sql
                )
            };
            Some(SqlVal { sql, kind: Kind::Bool })
        }
        "<" | ">" => {
            let a = sql_value(args.first()?, ctx)?;
            let b = sql_value(args.get(1)?, ctx)?;
            Some(SqlVal {
                sql: format!(
                    "(CAST({} AS INTEGER) {} CAST({} AS INTEGER))",
                    a.sql, name, b.sql
                ),
                kind: Kind::Bool,
            })
        }
        // body scans, free headers, address books and match indexes stay
        // in-process
        _ => None,
    }
}

/// Whether a `folder://<store>/<folder>` URI names the given folder.
fn location_matches(uri: &str, store_uid: &str, folder_name: &str) -> bool {
    let Some(rest) = uri.strip_prefix("folder://") else {
        return false;
    };
    let Some((uri_store, uri_folder)) = rest.split_once('/') else {
        return false;
    };
    let decode = |part: &str| {
        percent_encoding::percent_decode_str(part)
            .decode_utf8_lossy()
            .to_string()
    };
    decode(uri_store) == store_uid && decode(uri_folder) == folder_name
}

// --- in-process (residual) evaluation ---

/// Evaluator value domain.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Text(value) => !value.is_empty(),
        }
    }

    fn as_int(&self) -> i64 {
        match self {
            Value::Bool(value) => *value as i64,
            Value::Int(value) => *value,
            Value::Text(value) => value.trim().parse().unwrap_or(0),
        }
    }
}

/// Per-folder caches shared by the residual evaluation of every row: the
/// body-search result per word set, and fetched headers per uid.
#[derive(Default)]
pub(crate) struct EvalCaches {
    body_sets: HashMap<String, HashSet<String>>,
    headers: HashMap<String, Option<Arc<Vec<(String, String)>>>>,
    bodies: HashMap<String, Option<Arc<String>>>,
}

/// Everything the residual evaluation of one row may consult.
pub(crate) struct EvalRow<'a> {
    pub record: &'a MessageRecord,
    pub folder: &'a Arc<dyn Folder>,
    pub store_uid: &'a str,
    pub session: Option<Arc<dyn Session>>,
    pub match_indexes: &'a [Arc<SearchIndex>],
    pub caches: &'a mut EvalCaches,
    pub cancellable: Option<&'a Cancellable>,
}

pub(crate) fn eval_bool(expr: &Expr, row: &mut EvalRow<'_>) -> Result<bool> {
    Ok(eval(expr, row)?.truthy())
}

fn eval(expr: &Expr, row: &mut EvalRow<'_>) -> Result<Value> {
    match expr {
        Expr::Bool(value) => Ok(Value::Bool(*value)),
        Expr::Int(value) => Ok(Value::Int(*value)),
        Expr::Str(value) => Ok(Value::Text(value.clone())),
        Expr::Call(name, args) => eval_call(name, args, row),
    }
}

fn eval_call(name: &str, args: &[Expr], row: &mut EvalRow<'_>) -> Result<Value> {
    match name {
        "and" => {
            for arg in args {
                if !eval_bool(arg, row)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "or" => {
            for arg in args {
                if eval_bool(arg, row)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "not" => {
            let value = match args.first() {
                Some(arg) => eval_bool(arg, row)?,
                None => true,
            };
            Ok(Value::Bool(!value))
        }
        "match-all" => match args.first() {
            Some(arg) => eval(arg, row),
            None => Ok(Value::Bool(true)),
        },
        "match-threads" => match args.get(1) {
            Some(arg) => eval(arg, row),
            None => Ok(Value::Bool(true)),
        },
        "header-contains" | "header-matches" | "header-starts-with" | "header-ends-with"
        | "header-has-words" | "header-soundex" | "header-regex" | "header-exists" => {
            eval_header(name, args, row)
        }
        "header-full-regex" => {
            let pattern = eval(args.first().unwrap_or(&Expr::Str(String::new())), row)?;
            let Value::Text(pattern) = pattern else {
                return Err(StoreError::parse("header-full-regex needs a pattern"));
            };
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|err| StoreError::parse(err.to_string()))?;
            let headers = fetch_headers(row)?;
            let mut combined = String::new();
            if let Some(headers) = headers {
                for (header_name, value) in headers.iter() {
                    combined.push_str(header_name);
                    combined.push_str(": ");
                    combined.push_str(value);
                    combined.push('\n');
                }
            }
            Ok(Value::Bool(regex.is_match(&combined)))
        }
        "body-contains" => {
            let mut words = Vec::new();
            for arg in args {
                if let Value::Text(word) = eval(arg, row)? {
                    words.push(word);
                }
            }
            let key = words.join("\u{1}");
            if !row.caches.body_sets.contains_key(&key) {
                let uids: HashSet<String> = row
                    .folder
                    .search_body_sync(&words)?
                    .into_iter()
                    .collect();
                row.caches.body_sets.insert(key.clone(), uids);
            }
            Ok(Value::Bool(
                row.caches.body_sets[&key].contains(&row.record.uid),
            ))
        }
        "body-regex" => {
            let pattern = eval(args.first().unwrap_or(&Expr::Str(String::new())), row)?;
            let Value::Text(pattern) = pattern else {
                return Err(StoreError::parse("body-regex needs a pattern"));
            };
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|err| StoreError::parse(err.to_string()))?;
            let body = fetch_body(row)?;
            Ok(Value::Bool(
                body.map(|b| regex.is_match(&b)).unwrap_or(false),
            ))
        }
        "system-flag" => {
            let bit = match eval(args.first().unwrap_or(&Expr::Str(String::new())), row)? {
                Value::Text(name) => flags::from_name(&name),
                _ => 0,
            };
            Ok(Value::Bool(bit != 0 && row.record.flags & bit != 0))
        }
        "user-flag" => {
            let name = match eval(args.first().unwrap_or(&Expr::Str(String::new())), row)? {
                Value::Text(name) => name,
                _ => String::new(),
            };
            Ok(Value::Bool(row.record.labels.split_whitespace().any(|word| {
                word == name || format!("$Label{}", word) == name
            })))
        }
        "user-tag" => {
            let name = match eval(args.first().unwrap_or(&Expr::Str(String::new())), row)? {
                Value::Text(name) => name,
                _ => String::new(),
            };
            Ok(Value::Text(
                util::user_tag_with_labels(&row.record.usertags, &row.record.labels, &name)
                    .unwrap_or_default(),
            ))
        }
        "uid" => {
            let mut found = false;
            for arg in args {
                if let Expr::Str(uid) = arg {
                    if uid == &row.record.uid {
                        found = true;
                        break;
                    }
                }
            }
            Ok(Value::Bool(found))
        }
        "message-location" => {
            let uri = match args.first() {
                Some(Expr::Str(uri)) => uri.as_str(),
                _ => "",
            };
            Ok(Value::Bool(location_matches(
                uri,
                row.store_uid,
                row.folder.full_name(),
            )))
        }
        "addressbook-contains" => {
            let book_uid = str_arg(args, 0).unwrap_or("");
            let field = str_arg(args, 1).unwrap_or("").to_ascii_lowercase();
            let value = match field.as_str() {
                "from" => &row.record.from,
                "to" => &row.record.to,
                "cc" => &row.record.cc,
                _ => return Ok(Value::Bool(false)),
            };
            let Some(session) = row.session.clone() else {
                return Ok(Value::Bool(false));
            };
            for email in extract_addresses(value) {
                if session.addressbook_contains_sync(book_uid, &email) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "in-match-index" => {
            let token: u64 = match str_arg(args, 0) {
                Some(text) => text.trim().parse().unwrap_or(0),
                None => 0,
            };
            let found = row.match_indexes.iter().any(|index| {
                index.token() == token
                    && index.contains(row.store_uid, row.record.folder_id, &row.record.uid)
            });
            Ok(Value::Bool(found))
        }
        "get-size" => Ok(Value::Int((row.record.size / 1024) as i64)),
        "get-sent-date" => Ok(Value::Int(row.record.dsent)),
        "get-received-date" => Ok(Value::Int(row.record.dreceived)),
        "get-current-date" => Ok(Value::Int(Utc::now().timestamp())),
        "get-relative-months" => {
            let count = match args.first() {
                Some(arg) => eval(arg, row)?.as_int(),
                None => 0,
            };
            Ok(Value::Int(relative_months(count)))
        }
        "make-time" => {
            let value = match args.first() {
                Some(arg) => eval(arg, row)?,
                None => Value::Text(String::new()),
            };
            Ok(Value::Int(match value {
                Value::Text(text) => util::make_time(&text),
                other => other.as_int(),
            }))
        }
        "compare-date" => {
            let a = eval(args.first().unwrap_or(&Expr::Int(0)), row)?.as_int();
            let b = eval(args.get(1).unwrap_or(&Expr::Int(0)), row)?.as_int();
            Ok(Value::Int(util::compare_date(a, b)))
        }
        "+" => {
            let mut values = Vec::new();
            for arg in args {
                values.push(eval(arg, row)?);
            }
            if values.iter().all(|v| matches!(v, Value::Int(_) | Value::Bool(_))) {
                Ok(Value::Int(values.iter().map(Value::as_int).sum()))
            } else {
                let mut out = String::new();
                for value in values {
                    match value {
                        Value::Text(text) => out.push_str(&text),
                        other => out.push_str(&other.as_int().to_string()),
                    }
                }
                Ok(Value::Text(out))
            }
        }
        "-" => {
            let mut iter = args.iter();
            let first = match iter.next() {
                Some(arg) => eval(arg, row)?.as_int(),
                None => 0,
            };
            let mut out = first;
            for arg in iter {
                out -= eval(arg, row)?.as_int();
            }
            Ok(Value::Int(out))
        }
        "=" => {
            let a = eval(args.first().unwrap_or(&Expr::Bool(false)), row)?;
            let b = eval(args.get(1).unwrap_or(&Expr::Bool(false)), row)?;
            let equal = match (&a, &b) {
                (Value::Text(left), Value::Text(right)) => {
                    left.to_lowercase() == right.to_lowercase()
                }
                _ => a.as_int() == b.as_int(),
            };
            Ok(Value::Bool(equal))
        }
        "<" => {
            let a = eval(args.first().unwrap_or(&Expr::Int(0)), row)?.as_int();
            let b = eval(args.get(1).unwrap_or(&Expr::Int(0)), row)?.as_int();
            Ok(Value::Bool(a < b))
        }
        ">" => {
            let a = eval(args.first().unwrap_or(&Expr::Int(0)), row)?.as_int();
            let b = eval(args.get(1).unwrap_or(&Expr::Int(0)), row)?.as_int();
            Ok(Value::Bool(a > b))
        }
        other => Err(StoreError::parse(format!("unknown function '{}'", other))),
    }
}

/// Evaluate a header predicate in-process. Column-backed headers answer from
/// the record; anything else needs the message headers, fetched through the
/// info cache or the full message.
fn eval_header(name: &str, args: &[Expr], row: &mut EvalRow<'_>) -> Result<Value> {
    let header = match args.first() {
        Some(Expr::Str(header)) => header.clone(),
        _ => String::new(),
    };
    let lowered = header.to_ascii_lowercase();

    if name == "header-matches" && (lowered == "message-id" || lowered == "x-camel-msgid") {
        let needle = str_arg(args, 1).unwrap_or("");
        let wanted = if lowered == "message-id" {
            let (hi, lo) = util::msgid_split(util::hash_message_id(needle));
            format!("{} {}", hi, lo)
        } else {
            needle.trim().to_string()
        };
        return Ok(Value::Bool(
            util::part_first_msgid(&row.record.part)
                .map(|(hi, lo)| format!("{} {}", hi, lo) == wanted)
                .unwrap_or(false),
        ));
    }

    let values: Vec<String> = if let Some(column) = header_column(&header) {
        let value = match column {
            "subject" => &row.record.subject,
            "mail_from" => &row.record.from,
            "mail_to" => &row.record.to,
            "mail_cc" => &row.record.cc,
            "mlist" => &row.record.mlist,
            _ => unreachable!(),
        };
        if value.is_empty() {
            Vec::new()
        } else {
            vec![value.clone()]
        }
    } else {
        match fetch_headers(row)? {
            Some(headers) => headers
                .iter()
                .filter(|(header_name, _)| {
                    header.is_empty() || header_name.eq_ignore_ascii_case(&header)
                })
                .map(|(_, value)| value.clone())
                .collect(),
            None => Vec::new(),
        }
    };

    if name == "header-exists" {
        return Ok(Value::Bool(!values.is_empty()));
    }

    let mut words = Vec::new();
    for arg in &args[1..] {
        if let Value::Text(word) = eval(arg, row)? {
            words.push(word);
        }
    }

    let matched = values.iter().any(|value| {
        words.iter().all(|word| match name {
            "header-contains" => value.to_lowercase().contains(&word.to_lowercase()),
            "header-matches" => util::header_value_matches(value, word),
            "header-starts-with" => value.to_lowercase().starts_with(&word.to_lowercase()),
            "header-ends-with" => value.to_lowercase().ends_with(&word.to_lowercase()),
            "header-has-words" => util::header_has_words(value, word),
            "header-soundex" => {
                let code = util::soundex(word);
                util::split_words(value).any(|w| util::soundex(w) == code)
            }
            "header-regex" => RegexBuilder::new(word)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map(|regex| regex.is_match(value))
                .unwrap_or(false),
            _ => false,
        })
    });
    Ok(Value::Bool(matched))
}

/// Headers of the current row: from the cached info when the driver supplied
/// them, else from the fetched message. None when neither source has them.
fn fetch_headers(row: &mut EvalRow<'_>) -> Result<Option<Arc<Vec<(String, String)>>>> {
    let uid = row.record.uid.clone();
    if let Some(cached) = row.caches.headers.get(&uid) {
        return Ok(cached.clone());
    }
    let mut headers: Option<Arc<Vec<(String, String)>>> = None;
    if let Some(info) = row.folder.get_message_info(&uid) {
        if let Some(from_info) = info.headers() {
            headers = Some(Arc::new(from_info));
        }
    }
    if headers.is_none() {
        if let Ok(message) = row.folder.get_message_sync(&uid, row.cancellable) {
            headers = Some(Arc::new(message.headers().to_vec()));
            row.caches
                .bodies
                .insert(uid.clone(), Some(Arc::new(message.body().to_string())));
        }
    }
    row.caches.headers.insert(uid, headers.clone());
    Ok(headers)
}

fn fetch_body(row: &mut EvalRow<'_>) -> Result<Option<Arc<String>>> {
    let uid = row.record.uid.clone();
    if let Some(cached) = row.caches.bodies.get(&uid) {
        return Ok(cached.clone());
    }
    let body = match row.folder.get_message_sync(&uid, row.cancellable) {
        Ok(message) => {
            let headers = Arc::new(message.headers().to_vec());
            row.caches.headers.insert(uid.clone(), Some(headers));
            Some(Arc::new(message.body().to_string()))
        }
        Err(_) => None,
    };
    row.caches.bodies.insert(uid, body.clone());
    Ok(body)
}

fn extract_addresses(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let email = match (part.find('<'), part.rfind('>')) {
                (Some(open), Some(close)) if close > open => part[open + 1..close].trim(),
                _ => part,
            };
            if email.is_empty() {
                None
            } else {
                Some(email.to_string())
            }
        })
        .collect()
}

/// Find the `match-threads` marker at the outermost acceptable position:
/// directly at the top, or under `match-all` wrappers.
pub(crate) fn find_match_threads(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Call(name, args) => match name.as_str() {
            "match-threads" => match args.first() {
                Some(Expr::Str(mode)) => Some(mode.as_str()),
                _ => None,
            },
            "match-all" => args.first().and_then(find_match_threads),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::sexp::parse;

    fn ctx<'a>() -> CompileCtx<'a> {
        CompileCtx { store_uid: "store-1", folder_name: "f1" }
    }

    #[test]
    fn fully_sql_expressions() {
        let compiled = compile(&parse("(header-contains \"subject\" \"age\")").unwrap(), &ctx());
        assert!(compiled.fully_sql);
        assert_eq!(compiled.where_sql, "sdb_contains(subject, 'age')");

        let compiled = compile(&parse("(system-flag \"seen\")").unwrap(), &ctx());
        assert!(compiled.fully_sql);
        assert_eq!(compiled.where_sql, format!("((flags & {}) <> 0)", flags::SEEN));

        let compiled = compile(&parse("(uid \"11\" \"21\")").unwrap(), &ctx());
        assert!(compiled.fully_sql);
        assert_eq!(compiled.where_sql, "(uid IN ('11', '21'))");

        let compiled = compile(&parse("(= (get-size) 8)").unwrap(), &ctx());
        assert!(compiled.fully_sql);
        assert_eq!(
            compiled.where_sql,
            "(CAST((size / 1024) AS INTEGER) = CAST(8 AS INTEGER))"
        );
    }

    #[test]
    fn mixed_expressions_approximate() {
        let compiled = compile(
            &parse("(and (header-contains \"subject\" \"forecast\") (header-exists \"x-custom-header\"))")
                .unwrap(),
            &ctx(),
        );
        assert!(!compiled.fully_sql);
        assert_eq!(compiled.where_sql, "(sdb_contains(subject, 'forecast'))");

        // flipped order constrains the same way
        let compiled = compile(
            &parse("(and (header-exists \"x-custom-header\") (header-contains \"subject\" \"forecast\"))")
                .unwrap(),
            &ctx(),
        );
        assert!(!compiled.fully_sql);
        assert_eq!(compiled.where_sql, "(sdb_contains(subject, 'forecast'))");

        let compiled = compile(&parse("(body-contains \"x\")").unwrap(), &ctx());
        assert!(!compiled.fully_sql);
        assert_eq!(compiled.where_sql, "1");

        // a NOT over a non-translatable term cannot constrain
        let compiled = compile(&parse("(not (header-exists \"bcc\"))").unwrap(), &ctx());
        assert!(!compiled.fully_sql);
        assert_eq!(compiled.where_sql, "1");
    }

    #[test]
    fn location_compiles_to_constant() {
        let compiled = compile(
            &parse("(message-location \"folder://store-1/f1\")").unwrap(),
            &ctx(),
        );
        assert!(compiled.fully_sql);
        assert_eq!(compiled.where_sql, "1");

        let compiled = compile(
            &parse("(message-location \"folder://store-1/f2\")").unwrap(),
            &ctx(),
        );
        assert!(compiled.fully_sql);
        assert_eq!(compiled.where_sql, "0");
    }

    #[test]
    fn match_threads_detection() {
        let expr = parse("(match-all (match-threads \"no-subject,replies\" (uid \"1\")))").unwrap();
        assert_eq!(find_match_threads(&expr), Some("no-subject,replies"));

        let expr = parse("(or (match-threads \"all\" (uid \"1\")) #t)").unwrap();
        assert_eq!(find_match_threads(&expr), None);

        let expr = parse("(uid \"1\")").unwrap();
        assert_eq!(find_match_threads(&expr), None);
    }

    #[test]
    fn addresses_extract() {
        assert_eq!(
            extract_addresses("Tony <tony@no.where>, Peeeter <peter@no.where>"),
            ["tony@no.where", "peter@no.where"]
        );
        assert_eq!(extract_addresses("loki@no.where"), ["loki@no.where"]);
        assert!(extract_addresses("").is_empty());
    }
}
