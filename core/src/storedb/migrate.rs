/*
 * migrate.rs
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

//! One-shot migration of legacy store databases (generations 0 to 3): message
//! tables named after the folder, no numeric folder ids, columns added over
//! the generations, and ad-hoc side tables. Runs in a single transaction and
//! is idempotent on re-open.

use tracing::debug;

use crate::cancellable::Cancellable;
use crate::db::{quote_ident, quote_literal, Db};
use crate::error::Result;
use crate::storedb::StoreDb;

/// Detecting caller guarantees: `folders` exists and lacks `folder_id`.
pub(super) fn run(db: &Db, cancellable: Option<&Cancellable>) -> Result<()> {
    if let Some(c) = cancellable {
        c.check()?;
        c.push_message("Migrating folder summaries");
    }

    db.begin_transaction()?;
    let migrated = migrate_locked(db, cancellable);
    let finished = match migrated {
        Ok(()) => db.end_transaction(),
        Err(err) => {
            let _ = db.abort_transaction();
            Err(err)
        }
    };

    if let Some(c) = cancellable {
        c.pop_message();
    }
    finished
}

fn migrate_locked(db: &Db, cancellable: Option<&Cancellable>) -> Result<()> {
    db.exec_statement("ALTER TABLE folders ADD COLUMN folder_id INTEGER")?;

    let mut folder_names = Vec::new();
    db.exec_select("SELECT folder_name FROM folders ORDER BY rowid", |row| {
        folder_names.push(row.get::<_, String>(0)?);
        Ok(true)
    })?;

    let total = folder_names.len().max(1);
    for (index, folder_name) in folder_names.iter().enumerate() {
        if let Some(c) = cancellable {
            c.check()?;
            c.progress(((index * 100) / total) as i32);
        }
        let folder_id = (index + 1) as u32;
        debug!(folder = folder_name.as_str(), folder_id, "migrating folder");

        db.exec_statement(&format!(
            "UPDATE folders SET folder_id={} WHERE folder_name={}",
            folder_id,
            quote_literal(folder_name)
        ))?;

        migrate_message_table(db, folder_name, folder_id)?;
    }

    db.exec_statement("CREATE TABLE IF NOT EXISTS keys (key TEXT PRIMARY KEY, value TEXT)")?;
    for key in ["csdb::folders_version", "csdb::messages_version"] {
        db.exec_statement(&format!(
            "INSERT OR REPLACE INTO keys (key, value) VALUES ({}, '1')",
            quote_literal(key)
        ))?;
    }

    if let Some(c) = cancellable {
        c.progress(100);
    }
    Ok(())
}

fn migrate_message_table(db: &Db, folder_name: &str, folder_id: u32) -> Result<()> {
    let new_table = StoreDb::table_name(folder_id);

    if !db.has_table(folder_name)? {
        // folder record without a message table; start fresh
        StoreDb::create_message_table(db, folder_id)?;
        return Ok(());
    }

    db.exec_statement(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(folder_name),
        quote_ident(&new_table)
    ))?;

    // generation 0 kept the dirty counter in a column named msg_security
    if db.has_table_with_column(&new_table, "msg_security")?
        && !db.has_table_with_column(&new_table, "dirty")?
    {
        db.exec_statement(&format!(
            "ALTER TABLE {} RENAME COLUMN msg_security TO dirty",
            quote_ident(&new_table)
        ))?;
    }

    for column in ["created", "modified", "userheaders", "preview"] {
        if !db.has_table_with_column(&new_table, column)? {
            db.exec_statement(&format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT DEFAULT ''",
                quote_ident(&new_table),
                column
            ))?;
        }
    }
    // older rows read back as empty strings, not NULL
    for column in ["userheaders", "preview"] {
        db.exec_statement(&format!(
            "UPDATE {} SET {} = '' WHERE {} IS NULL",
            quote_ident(&new_table),
            column,
            column
        ))?;
    }

    let preview_table = format!("{}_preview", folder_name);
    if db.has_table(&preview_table)? {
        db.exec_statement(&format!(
            "UPDATE {new} SET preview = IFNULL((SELECT p.preview FROM {side} p \
             WHERE p.uid = {new}.uid), preview)",
            new = quote_ident(&new_table),
            side = quote_ident(&preview_table)
        ))?;
        db.exec_statement(&format!("DROP TABLE {}", quote_ident(&preview_table)))?;
    }

    let bodystructure_table = format!("{}_bodystructure", folder_name);
    if db.has_table(&bodystructure_table)? {
        db.exec_statement(&format!(
            "UPDATE {new} SET cinfo = (SELECT b.bodystructure FROM {side} b \
             WHERE b.uid = {new}.uid) \
             WHERE (cinfo IS NULL OR cinfo = '') \
             AND EXISTS (SELECT 1 FROM {side} b WHERE b.uid = {new}.uid)",
            new = quote_ident(&new_table),
            side = quote_ident(&bodystructure_table)
        ))?;
        db.exec_statement(&format!("DROP TABLE {}", quote_ident(&bodystructure_table)))?;
    }

    let version_table = format!("{}_version", folder_name);
    db.exec_statement(&format!("DROP TABLE IF EXISTS {}", quote_ident(&version_table)))?;

    for (suffix, column) in [("del", "deleted"), ("junk", "junk"), ("read", "read")] {
        db.exec_statement(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("idx_{}_{}", new_table, suffix)),
            quote_ident(&new_table),
            column
        ))?;
    }

    Ok(())
}
