/*
 * functions.rs
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

//! Scalar SQL functions backing the compiled search predicates. Registered on
//! every connection the adapter opens; all are deterministic and NULL-safe
//! (NULL behaves as the empty string).

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;

use crate::search::util;

const FLAGS: FunctionFlags = FunctionFlags::SQLITE_UTF8
    .union(FunctionFlags::SQLITE_DETERMINISTIC);

fn text_arg(ctx: &Context<'_>, idx: usize) -> String {
    ctx.get_raw(idx).as_str_or_null().ok().flatten().unwrap_or("").to_string()
}

fn int_arg(ctx: &Context<'_>, idx: usize) -> i64 {
    ctx.get_raw(idx).as_i64_or_null().ok().flatten().unwrap_or(0)
}

pub(crate) fn register_all(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function("sdb_contains", 2, FLAGS, |ctx| {
        let haystack = text_arg(ctx, 0).to_lowercase();
        let needle = text_arg(ctx, 1).to_lowercase();
        Ok(haystack.contains(&needle))
    })?;

    conn.create_scalar_function("sdb_starts_with", 2, FLAGS, |ctx| {
        let haystack = text_arg(ctx, 0).to_lowercase();
        let needle = text_arg(ctx, 1).to_lowercase();
        Ok(haystack.starts_with(&needle))
    })?;

    conn.create_scalar_function("sdb_ends_with", 2, FLAGS, |ctx| {
        let haystack = text_arg(ctx, 0).to_lowercase();
        let needle = text_arg(ctx, 1).to_lowercase();
        Ok(haystack.ends_with(&needle))
    })?;

    conn.create_scalar_function("sdb_matches", 2, FLAGS, |ctx| {
        let value = text_arg(ctx, 0);
        let needle = text_arg(ctx, 1);
        Ok(util::header_value_matches(&value, &needle))
    })?;

    conn.create_scalar_function("sdb_has_words", 2, FLAGS, |ctx| {
        let value = text_arg(ctx, 0);
        let words = text_arg(ctx, 1);
        Ok(util::header_has_words(&value, &words))
    })?;

    conn.create_scalar_function("sdb_soundex", 2, FLAGS, |ctx| {
        let value = text_arg(ctx, 0);
        let needle = text_arg(ctx, 1);
        let code = util::soundex(&needle);
        let result = util::split_words(&value).any(|word| util::soundex(word) == code);
        Ok(result)
    })?;

    conn.create_scalar_function("sdb_regex", 2, FLAGS, |ctx| {
        let value = text_arg(ctx, 0);
        let regex: Arc<Regex> = ctx.get_or_create_aux(1, |raw| {
            let pattern = raw.as_str_or_null()?.unwrap_or("");
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> {
                    Box::new(err)
                })
        })?;
        Ok(regex.is_match(&value))
    })?;

    conn.create_scalar_function("sdb_user_tag", 3, FLAGS, |ctx| {
        let usertags = text_arg(ctx, 0);
        let labels = text_arg(ctx, 1);
        let name = text_arg(ctx, 2);
        Ok(util::user_tag_with_labels(&usertags, &labels, &name).unwrap_or_default())
    })?;

    conn.create_scalar_function("sdb_user_flag", 2, FLAGS, |ctx| {
        let labels = text_arg(ctx, 0);
        let name = text_arg(ctx, 1);
        Ok(labels.split_whitespace().any(|word| {
            word == name || format!("$Label{}", word) == name
        }))
    })?;

    conn.create_scalar_function("sdb_make_time", 1, FLAGS, |ctx| {
        let value = text_arg(ctx, 0);
        Ok(util::make_time(&value))
    })?;

    conn.create_scalar_function("sdb_compare_date", 2, FLAGS, |ctx| {
        let a = int_arg(ctx, 0);
        let b = int_arg(ctx, 1);
        Ok(util::compare_date(a, b))
    })?;

    conn.create_scalar_function("sdb_msgid_eq", 2, FLAGS, |ctx| {
        let part = text_arg(ctx, 0);
        let wanted = text_arg(ctx, 1);
        Ok(util::part_first_msgid(&part)
            .map(|(hi, lo)| format!("{} {}", hi, lo) == wanted.trim())
            .unwrap_or(false))
    })?;

    Ok(())
}
