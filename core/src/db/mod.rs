/*
 * mod.rs
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

//! Thin adapter over SQLite: one serialized write connection, a pool of read
//! connections, re-entrant transactions, user collations and the scalar
//! functions used by compiled search expressions.

mod functions;

use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

use rusqlite::{Connection, OpenFlags};

use crate::error::{Result, StoreError};

/// Comparator registered through `set_collation`.
pub type CollationFn = dyn Fn(&str, &str) -> CmpOrdering + Send + Sync;

const READ_POOL_LIMIT: usize = 4;

struct TxState {
    owner: Option<ThreadId>,
    depth: u32,
    failed: bool,
}

/// Database adapter. Writers serialize on the single write connection; reads
/// outside a transaction run concurrently on pooled read connections.
pub struct Db {
    filename: PathBuf,
    writer: Mutex<Connection>,
    tx: Mutex<TxState>,
    tx_cond: Condvar,
    readers: Mutex<VecDeque<Connection>>,
    collations: Mutex<Vec<(String, Arc<CollationFn>)>>,
}

impl Db {
    /// Open (or create) the database file at `filename`.
    pub fn open(filename: impl AsRef<Path>) -> Result<Self> {
        let filename = filename.as_ref().to_path_buf();
        let writer = Self::open_connection(&filename)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            filename,
            writer: Mutex::new(writer),
            tx: Mutex::new(TxState { owner: None, depth: 0, failed: false }),
            tx_cond: Condvar::new(),
            readers: Mutex::new(VecDeque::new()),
            collations: Mutex::new(Vec::new()),
        })
    }

    fn open_connection(filename: &Path) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            filename,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        functions::register_all(&conn)?;
        Ok(conn)
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Run `f` on the write connection. Blocks while a transaction opened by
    /// another thread is in flight.
    fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let me = std::thread::current().id();
        let mut tx = self.tx.lock().unwrap();
        while tx.owner.is_some() && tx.owner != Some(me) {
            tx = self.tx_cond.wait(tx).unwrap();
        }
        drop(tx);
        let conn = self.writer.lock().unwrap();
        f(&conn)
    }

    /// Run `f` on a pooled read connection, or on the write connection when
    /// the calling thread has a transaction open (so it sees its own writes).
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let me = std::thread::current().id();
        {
            let tx = self.tx.lock().unwrap();
            if tx.owner == Some(me) {
                drop(tx);
                let conn = self.writer.lock().unwrap();
                return f(&conn);
            }
        }
        let conn = match self.readers.lock().unwrap().pop_front() {
            Some(conn) => conn,
            None => {
                let conn = Self::open_connection(&self.filename)?;
                self.apply_collations(&conn)?;
                conn
            }
        };
        let out = f(&conn);
        let mut pool = self.readers.lock().unwrap();
        if pool.len() < READ_POOL_LIMIT {
            pool.push_back(conn);
        }
        out
    }

    /// Begin a transaction; nested calls on the same thread only grow a depth
    /// counter. Blocks while another thread holds a transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        let me = std::thread::current().id();
        let mut tx = self.tx.lock().unwrap();
        loop {
            if tx.owner == Some(me) {
                tx.depth += 1;
                return Ok(());
            }
            if tx.owner.is_none() {
                break;
            }
            tx = self.tx_cond.wait(tx).unwrap();
        }
        tx.owner = Some(me);
        tx.depth = 1;
        tx.failed = false;
        drop(tx);
        let result = {
            let conn = self.writer.lock().unwrap();
            conn.execute_batch("BEGIN IMMEDIATE").map_err(StoreError::from)
        };
        if result.is_err() {
            let mut tx = self.tx.lock().unwrap();
            tx.owner = None;
            tx.depth = 0;
            self.tx_cond.notify_all();
        }
        result
    }

    /// Commit the outermost transaction; rolls back instead when an inner
    /// level aborted.
    pub fn end_transaction(&self) -> Result<()> {
        self.finish_transaction(false)
    }

    /// Roll the transaction back. An inner abort marks the whole transaction
    /// failed, so the outermost end rolls back too.
    pub fn abort_transaction(&self) -> Result<()> {
        self.finish_transaction(true)
    }

    fn finish_transaction(&self, abort: bool) -> Result<()> {
        let me = std::thread::current().id();
        let mut tx = self.tx.lock().unwrap();
        if tx.owner != Some(me) || tx.depth == 0 {
            return Err(StoreError::invalid("no transaction in progress"));
        }
        tx.depth -= 1;
        if abort {
            tx.failed = true;
        }
        if tx.depth > 0 {
            return Ok(());
        }
        let rollback = tx.failed;
        drop(tx);
        let result = {
            let conn = self.writer.lock().unwrap();
            conn.execute_batch(if rollback { "ROLLBACK" } else { "COMMIT" })
                .map_err(StoreError::from)
        };
        let mut tx = self.tx.lock().unwrap();
        tx.owner = None;
        tx.failed = false;
        self.tx_cond.notify_all();
        result
    }

    /// True when the calling thread has a transaction open.
    pub fn in_transaction(&self) -> bool {
        let tx = self.tx.lock().unwrap();
        tx.owner == Some(std::thread::current().id()) && tx.depth > 0
    }

    /// Execute a statement which returns no rows.
    pub fn exec_statement(&self, sql: &str) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
    }

    /// Execute a SELECT; `row_callback` is invoked per row and returns `false`
    /// to stop early.
    pub fn exec_select(
        &self,
        sql: &str,
        mut row_callback: impl FnMut(&rusqlite::Row<'_>) -> Result<bool>,
    ) -> Result<()> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                if !row_callback(row)? {
                    break;
                }
            }
            Ok(())
        })
    }

    pub fn has_table(&self, table_name: &str) -> Result<bool> {
        let mut found = false;
        self.exec_select(
            &format!(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND tbl_name={}",
                quote_literal(table_name)
            ),
            |_row| {
                found = true;
                Ok(false)
            },
        )?;
        Ok(found)
    }

    pub fn has_table_with_column(&self, table_name: &str, column_name: &str) -> Result<bool> {
        if !self.has_table(table_name)? {
            return Ok(false);
        }
        let mut found = false;
        self.exec_select(
            &format!("PRAGMA table_info({})", quote_ident(table_name)),
            |row| {
                let name: String = row.get(1)?;
                if name.eq_ignore_ascii_case(column_name) {
                    found = true;
                    return Ok(false);
                }
                Ok(true)
            },
        )?;
        Ok(found)
    }

    /// Register a user collation under `name` on every connection, current
    /// and future.
    pub fn set_collation(
        &self,
        name: &str,
        compare: Arc<CollationFn>,
    ) -> Result<()> {
        {
            let conn = self.writer.lock().unwrap();
            register_collation(&conn, name, Arc::clone(&compare))?;
        }
        for conn in self.readers.lock().unwrap().iter() {
            register_collation(conn, name, Arc::clone(&compare))?;
        }
        let mut collations = self.collations.lock().unwrap();
        collations.retain(|(existing, _)| existing != name);
        collations.push((name.to_string(), compare));
        Ok(())
    }

    fn apply_collations(&self, conn: &Connection) -> Result<()> {
        for (name, compare) in self.collations.lock().unwrap().iter() {
            register_collation(conn, name, Arc::clone(compare))?;
        }
        Ok(())
    }

    /// Compact the file when a sizeable part of it is free pages.
    pub fn maybe_run_maintenance(&self) -> Result<()> {
        if self.in_transaction() {
            return Err(StoreError::invalid("cannot run maintenance in a transaction"));
        }
        let (page_count, freelist_count) = self.with_writer(|conn| {
            let pages: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let free: i64 = conn.query_row("PRAGMA freelist_count", [], |r| r.get(0))?;
            Ok((pages, free))
        })?;
        if page_count > 0 && freelist_count * 2 >= page_count {
            self.exec_statement("VACUUM")?;
        }
        Ok(())
    }

    /// Drop pooled read connections and ask SQLite to release held memory.
    /// Callable from any thread.
    pub fn release_cache_memory(&self) {
        self.readers.lock().unwrap().clear();
        unsafe {
            rusqlite::ffi::sqlite3_release_memory(i32::MAX);
        }
    }
}

fn register_collation(
    conn: &Connection,
    name: &str,
    compare: Arc<CollationFn>,
) -> Result<()> {
    let compare = AssertUnwindSafe(compare);
    conn.create_collation(name, move |a, b| (compare.0)(a, b))?;
    Ok(())
}

/// Quote a string literal for inclusion in a statement (the `%Q` idiom).
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Quote an identifier (table or index name).
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn column_a_values(db: &Db, order_by: &str) -> Vec<String> {
        let mut values = Vec::new();
        db.exec_select(
            &format!("SELECT columnA FROM table1 ORDER BY {}", order_by),
            |row| {
                values.push(row.get::<_, String>(0).unwrap());
                Ok(true)
            },
        )
        .unwrap();
        values
    }

    #[test]
    fn basic_exec_and_introspection() {
        let (_dir, db) = temp_db();

        assert!(!db.has_table("table1").unwrap());
        assert!(!db.has_table_with_column("table1", "columnA").unwrap());

        db.exec_statement("CREATE TABLE table1 (column1 INTEGER)").unwrap();
        assert!(db.has_table("table1").unwrap());
        assert!(!db.has_table_with_column("table1", "columnA").unwrap());

        db.exec_statement("ALTER TABLE table1 ADD COLUMN columnA TEXT").unwrap();
        assert!(db.has_table_with_column("table1", "columnA").unwrap());

        for (n, a) in [(1, "A"), (2, "B"), (3, "C")] {
            db.exec_statement(&format!(
                "INSERT INTO table1 (column1, columnA) VALUES ({}, {})",
                n,
                quote_literal(a)
            ))
            .unwrap();
        }
        assert_eq!(column_a_values(&db, "columnA"), ["A", "B", "C"]);

        db.maybe_run_maintenance().unwrap();
        db.release_cache_memory();
        assert_eq!(column_a_values(&db, "columnA"), ["A", "B", "C"]);
    }

    #[test]
    fn custom_collation_orders_rows() {
        let (_dir, db) = temp_db();
        db.exec_statement("CREATE TABLE table1 (columnA TEXT)").unwrap();
        for a in ["A", "B", "C"] {
            db.exec_statement(&format!(
                "INSERT INTO table1 (columnA) VALUES ({})",
                quote_literal(a)
            ))
            .unwrap();
        }

        db.set_collation(
            "collateColumnA",
            Arc::new(|a: &str, b: &str| {
                let rank = |s: &str| "CAB".find(s.chars().next().unwrap_or(' ')).unwrap_or(9);
                rank(a).cmp(&rank(b))
            }),
        )
        .unwrap();

        assert_eq!(column_a_values(&db, "columnA COLLATE collateColumnA"), ["C", "A", "B"]);
        assert_eq!(
            column_a_values(&db, "columnA COLLATE collateColumnA DESC"),
            ["B", "A", "C"]
        );
        assert_eq!(column_a_values(&db, "columnA"), ["A", "B", "C"]);
    }

    #[test]
    fn transactions_commit_and_abort() {
        let (_dir, db) = temp_db();
        db.exec_statement("CREATE TABLE table1 (columnA TEXT)").unwrap();
        for a in ["A", "B", "C"] {
            db.exec_statement(&format!(
                "INSERT INTO table1 (columnA) VALUES ({})",
                quote_literal(a)
            ))
            .unwrap();
        }

        db.begin_transaction().unwrap();
        db.exec_statement("DELETE FROM table1 WHERE columnA='B'").unwrap();
        assert_eq!(column_a_values(&db, "columnA"), ["A", "C"]);
        db.abort_transaction().unwrap();
        assert_eq!(column_a_values(&db, "columnA"), ["A", "B", "C"]);

        db.begin_transaction().unwrap();
        db.exec_statement("DELETE FROM table1 WHERE columnA='C'").unwrap();
        db.end_transaction().unwrap();
        assert_eq!(column_a_values(&db, "columnA"), ["A", "B"]);
    }

    #[test]
    fn nested_transaction_abort_poisons_outer() {
        let (_dir, db) = temp_db();
        db.exec_statement("CREATE TABLE table1 (columnA TEXT)").unwrap();
        db.exec_statement("INSERT INTO table1 (columnA) VALUES ('A')").unwrap();

        db.begin_transaction().unwrap();
        db.begin_transaction().unwrap();
        db.exec_statement("DELETE FROM table1").unwrap();
        db.abort_transaction().unwrap();
        db.end_transaction().unwrap();

        assert_eq!(column_a_values(&db, "columnA"), ["A"]);
    }

    #[test]
    fn search_functions_available() {
        let (_dir, db) = temp_db();
        let mut hits = Vec::new();
        db.exec_select(
            "SELECT sdb_contains('Hello World', 'o wo'), \
             sdb_has_words('Different Subject Message', 'message different'), \
             sdb_soundex('Message 11', 'mase'), \
             sdb_user_tag('1 3-nm1 2-12', '', 'nm1')",
            |row| {
                hits.push(row.get::<_, i64>(0).unwrap());
                hits.push(row.get::<_, i64>(1).unwrap());
                hits.push(row.get::<_, i64>(2).unwrap());
                assert_eq!(row.get::<_, String>(3).unwrap(), "12");
                Ok(true)
            },
        )
        .unwrap();
        assert_eq!(hits, [1, 1, 1]);
    }
}
