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

//! The store catalog: a `folders` table, one `messages_<folder_id>` table per
//! folder, and a flat `keys` table. Legacy databases are migrated in place on
//! open.

mod migrate;

use std::collections::HashMap;
use std::path::Path;

use crate::cancellable::Cancellable;
use crate::db::{quote_ident, quote_literal, Db};
use crate::error::{ErrorKind, Result, StoreError};
use crate::search::util;
use crate::store::flags;

/// Reserved prefix of internal keys in the `keys` table.
pub const RESERVED_KEY_PREFIX: &str = "csdb::";

const FOLDERS_VERSION_KEY: &str = "csdb::folders_version";
const MESSAGES_VERSION_KEY: &str = "csdb::messages_version";
const CURRENT_VERSION: i64 = 1;

/// One row of the `folders` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderRecord {
    pub folder_name: String,
    /// Assigned on first write; stable for the record's lifetime.
    pub folder_id: u32,
    pub version: i32,
    pub flags: u32,
    pub nextuid: u32,
    pub timestamp: i64,
    pub saved_count: u32,
    pub unread_count: u32,
    pub deleted_count: u32,
    pub junk_count: u32,
    pub visible_count: u32,
    pub jnd_count: u32,
    pub bdata: String,
}

/// One row of a `messages_<folder_id>` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRecord {
    pub folder_id: u32,
    pub uid: String,
    pub flags: u32,
    pub msg_type: u32,
    pub dirty: u32,
    pub size: u32,
    pub dsent: i64,
    pub dreceived: i64,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub mlist: String,
    pub part: String,
    pub labels: String,
    pub usertags: String,
    pub cinfo: String,
    pub bdata: String,
    pub userheaders: String,
    pub preview: String,
}

/// Counting modes for `count_messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    Total,
    Unread,
    Junk,
    Deleted,
    NotJunkNotDeleted,
    NotJunkNotDeletedUnread,
    JunkNotDeleted,
}

impl CountKind {
    fn where_clause(self) -> Option<&'static str> {
        match self {
            CountKind::Total => None,
            CountKind::Unread => Some("read=0"),
            CountKind::Junk => Some("junk=1"),
            CountKind::Deleted => Some("deleted=1"),
            CountKind::NotJunkNotDeleted => Some("junk=0 AND deleted=0"),
            CountKind::NotJunkNotDeletedUnread => Some("junk=0 AND deleted=0 AND read=0"),
            CountKind::JunkNotDeleted => Some("junk=1 AND deleted=0"),
        }
    }
}

const MESSAGE_COLUMNS: &str = "uid, flags, msg_type, dirty, size, dsent, dreceived, \
     subject, mail_from, mail_to, mail_cc, mlist, part, labels, usertags, \
     cinfo, bdata, userheaders, preview";

/// The schema-versioned store database.
pub struct StoreDb {
    db: Db,
}

impl StoreDb {
    /// Open (creating or migrating as needed) the store database file.
    pub fn new(filename: impl AsRef<Path>, cancellable: Option<&Cancellable>) -> Result<Self> {
        let db = Db::open(filename)?;

        if db.has_table("folders")? && !db.has_table_with_column("folders", "folder_id")? {
            migrate::run(&db, cancellable)?;
        }

        db.begin_transaction()?;
        let init = (|| -> Result<()> {
            db.exec_statement(
                "CREATE TABLE IF NOT EXISTS folders ( \
                 folder_name TEXT PRIMARY KEY, \
                 folder_id INTEGER UNIQUE, \
                 version INTEGER, \
                 flags INTEGER, \
                 nextuid INTEGER, \
                 time NUMERIC, \
                 saved_count INTEGER, \
                 unread_count INTEGER, \
                 deleted_count INTEGER, \
                 junk_count INTEGER, \
                 visible_count INTEGER, \
                 jnd_count INTEGER, \
                 bdata TEXT)",
            )?;
            db.exec_statement(
                "CREATE TABLE IF NOT EXISTS keys (key TEXT PRIMARY KEY, value TEXT)",
            )?;
            for key in [FOLDERS_VERSION_KEY, MESSAGES_VERSION_KEY] {
                db.exec_statement(&format!(
                    "INSERT OR IGNORE INTO keys (key, value) VALUES ({}, {})",
                    quote_literal(key),
                    quote_literal(&CURRENT_VERSION.to_string())
                ))?;
            }
            Ok(())
        })();
        match init {
            Ok(()) => db.end_transaction()?,
            Err(err) => {
                let _ = db.abort_transaction();
                return Err(err);
            }
        }

        Ok(Self { db })
    }

    /// The underlying adapter, for transactions and raw selects.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Name of the per-folder message table.
    pub fn table_name(folder_id: u32) -> String {
        format!("messages_{}", folder_id)
    }

    fn with_transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.db.begin_transaction()?;
        match f() {
            Ok(value) => {
                self.db.end_transaction()?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.db.abort_transaction();
                Err(err)
            }
        }
    }

    pub(crate) fn create_message_table(db: &Db, folder_id: u32) -> Result<()> {
        let table = Self::table_name(folder_id);
        db.exec_statement(&format!(
            "CREATE TABLE IF NOT EXISTS {} ( \
             uid TEXT PRIMARY KEY, \
             flags INTEGER, \
             msg_type INTEGER, \
             read INTEGER, \
             deleted INTEGER, \
             replied INTEGER, \
             important INTEGER, \
             junk INTEGER, \
             attachment INTEGER, \
             dirty INTEGER, \
             size INTEGER, \
             dsent NUMERIC, \
             dreceived NUMERIC, \
             subject TEXT, \
             mail_from TEXT, \
             mail_to TEXT, \
             mail_cc TEXT, \
             mlist TEXT, \
             followup_flag TEXT, \
             followup_completed_on TEXT, \
             followup_due_by TEXT, \
             part TEXT, \
             labels TEXT, \
             usertags TEXT, \
             cinfo TEXT, \
             bdata TEXT, \
             userheaders TEXT, \
             preview TEXT, \
             created TEXT, \
             modified TEXT)",
            quote_ident(&table)
        ))?;
        for (suffix, column) in [("del", "deleted"), ("junk", "junk"), ("read", "read")] {
            db.exec_statement(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("idx_{}_{}", table, suffix)),
                quote_ident(&table),
                column
            ))?;
        }
        Ok(())
    }

    /// Insert or replace a folder record; assigns `folder_id` and creates the
    /// message table on first insert.
    pub fn write_folder(&self, folder_name: &str, record: &FolderRecord) -> Result<u32> {
        self.with_transaction(|| {
            let folder_id = match self.get_folder_id(folder_name)? {
                0 => {
                    let mut next = 1u32;
                    self.db.exec_select(
                        "SELECT IFNULL(MAX(folder_id), 0) + 1 FROM folders",
                        |row| {
                            next = row.get::<_, i64>(0)? as u32;
                            Ok(false)
                        },
                    )?;
                    next
                }
                existing => existing,
            };
            self.db.exec_statement(&format!(
                "INSERT OR REPLACE INTO folders VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
                quote_literal(folder_name),
                folder_id,
                record.version,
                record.flags,
                record.nextuid,
                record.timestamp,
                record.saved_count,
                record.unread_count,
                record.deleted_count,
                record.junk_count,
                record.visible_count,
                record.jnd_count,
                quote_literal(&record.bdata)
            ))?;
            Self::create_message_table(&self.db, folder_id)?;
            Ok(folder_id)
        })
    }

    /// Read a folder record; `Ok(None)` when the folder is unknown.
    pub fn read_folder(&self, folder_name: &str) -> Result<Option<FolderRecord>> {
        let mut record = None;
        self.db.exec_select(
            &format!(
                "SELECT folder_name, folder_id, version, flags, nextuid, time, \
                 saved_count, unread_count, deleted_count, junk_count, \
                 visible_count, jnd_count, bdata \
                 FROM folders WHERE folder_name={}",
                quote_literal(folder_name)
            ),
            |row| {
                record = Some(FolderRecord {
                    folder_name: row.get(0)?,
                    folder_id: row.get::<_, i64>(1)? as u32,
                    // legacy stores declared the column REAL
                    version: row.get::<_, f64>(2)? as i32,
                    flags: row.get::<_, i64>(3)? as u32,
                    nextuid: row.get::<_, i64>(4)? as u32,
                    timestamp: row.get(5)?,
                    saved_count: row.get::<_, i64>(6)? as u32,
                    unread_count: row.get::<_, i64>(7)? as u32,
                    deleted_count: row.get::<_, i64>(8)? as u32,
                    junk_count: row.get::<_, i64>(9)? as u32,
                    visible_count: row.get::<_, i64>(10)? as u32,
                    jnd_count: row.get::<_, i64>(11)? as u32,
                    bdata: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
                });
                Ok(false)
            },
        )?;
        Ok(record)
    }

    /// Numeric id of a folder; 0 when unknown.
    pub fn get_folder_id(&self, folder_name: &str) -> Result<u32> {
        let mut folder_id = 0u32;
        self.db.exec_select(
            &format!(
                "SELECT folder_id FROM folders WHERE folder_name={}",
                quote_literal(folder_name)
            ),
            |row| {
                folder_id = row.get::<_, i64>(0)? as u32;
                Ok(false)
            },
        )?;
        Ok(folder_id)
    }

    /// Rename a folder record, keeping its id and message table.
    pub fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.with_transaction(|| {
            if self.get_folder_id(old_name)? == 0 {
                return Err(StoreError::not_found(format!("no folder '{}'", old_name)));
            }
            if self.get_folder_id(new_name)? != 0 {
                return Err(StoreError::exists(format!("folder '{}' already exists", new_name)));
            }
            self.db.exec_statement(&format!(
                "UPDATE folders SET folder_name={} WHERE folder_name={}",
                quote_literal(new_name),
                quote_literal(old_name)
            ))?;
            Ok(())
        })
    }

    /// Delete a folder record and drop its message table. Unknown folders are
    /// a no-op.
    pub fn delete_folder(&self, folder_name: &str) -> Result<()> {
        self.with_transaction(|| {
            let folder_id = self.get_folder_id(folder_name)?;
            if folder_id == 0 {
                return Ok(());
            }
            self.db.exec_statement(&format!(
                "DELETE FROM folders WHERE folder_name={}",
                quote_literal(folder_name)
            ))?;
            self.db.exec_statement(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_ident(&Self::table_name(folder_id))
            ))?;
            Ok(())
        })
    }

    /// Truncate a folder's message table, keeping the record. Unknown folders
    /// are a no-op.
    pub fn clear_folder(&self, folder_name: &str) -> Result<()> {
        self.with_transaction(|| {
            let folder_id = self.get_folder_id(folder_name)?;
            if folder_id == 0 {
                return Ok(());
            }
            self.db.exec_statement(&format!(
                "DELETE FROM {}",
                quote_ident(&Self::table_name(folder_id))
            ))?;
            Ok(())
        })
    }

    fn require_folder_id(&self, folder_name: &str) -> Result<u32> {
        match self.get_folder_id(folder_name)? {
            0 => Err(StoreError::not_found(format!("no folder '{}'", folder_name))),
            id => Ok(id),
        }
    }

    fn read_record_row(folder_id: u32, row: &rusqlite::Row<'_>) -> Result<MessageRecord> {
        let text = |idx: usize| -> Result<String> {
            Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
        };
        Ok(MessageRecord {
            folder_id,
            uid: row.get(0)?,
            flags: row.get::<_, i64>(1)? as u32,
            msg_type: row.get::<_, i64>(2)? as u32,
            dirty: row.get::<_, i64>(3)? as u32,
            size: row.get::<_, i64>(4)? as u32,
            dsent: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
            dreceived: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
            subject: text(7)?,
            from: text(8)?,
            to: text(9)?,
            cc: text(10)?,
            mlist: text(11)?,
            part: text(12)?,
            labels: text(13)?,
            usertags: text(14)?,
            cinfo: text(15)?,
            bdata: text(16)?,
            userheaders: text(17)?,
            preview: text(18)?,
        })
    }

    /// Stream every message record of a folder; the callback returns `false`
    /// to stop early.
    pub fn read_messages(
        &self,
        folder_name: &str,
        mut callback: impl FnMut(&MessageRecord) -> Result<bool>,
    ) -> Result<()> {
        let folder_id = self.require_folder_id(folder_name)?;
        self.db.exec_select(
            &format!(
                "SELECT {} FROM {}",
                MESSAGE_COLUMNS,
                quote_ident(&Self::table_name(folder_id))
            ),
            |row| {
                let record = Self::read_record_row(folder_id, row)?;
                callback(&record)
            },
        )
    }

    pub fn read_message(&self, folder_name: &str, uid: &str) -> Result<MessageRecord> {
        let folder_id = self.require_folder_id(folder_name)?;
        let mut found = None;
        self.db.exec_select(
            &format!(
                "SELECT {} FROM {} WHERE uid={}",
                MESSAGE_COLUMNS,
                quote_ident(&Self::table_name(folder_id)),
                quote_literal(uid)
            ),
            |row| {
                found = Some(Self::read_record_row(folder_id, row)?);
                Ok(false)
            },
        )?;
        found.ok_or_else(|| {
            StoreError::not_found(format!("no message '{}' in '{}'", uid, folder_name))
        })
    }

    /// Insert or replace one message record. The `folder_id` in the record is
    /// ignored; the folder is addressed by name.
    pub fn write_message(&self, folder_name: &str, record: &MessageRecord) -> Result<()> {
        let folder_id = self.require_folder_id(folder_name)?;
        let flag = |bit: u32| if record.flags & bit != 0 { 1 } else { 0 };
        self.with_transaction(|| {
            self.db.exec_statement(&format!(
                "INSERT OR REPLACE INTO {} VALUES (\
                 {uid}, {flags}, {msg_type}, {read}, {deleted}, {replied}, {important}, \
                 {junk}, {attachment}, {dirty}, {size}, {dsent}, {dreceived}, \
                 {subject}, {from}, {to}, {cc}, {mlist}, \
                 {fflag}, {fcompleted}, {fdue}, \
                 {part}, {labels}, {usertags}, {cinfo}, {bdata}, {userheaders}, {preview}, \
                 strftime('%s','now'), strftime('%s','now'))",
                quote_ident(&Self::table_name(folder_id)),
                uid = quote_literal(&record.uid),
                flags = record.flags,
                msg_type = record.msg_type,
                read = flag(flags::SEEN),
                deleted = flag(flags::DELETED),
                replied = flag(flags::ANSWERED),
                important = flag(flags::FLAGGED),
                junk = flag(flags::JUNK),
                attachment = flag(flags::ATTACHMENTS),
                dirty = record.dirty,
                size = record.size,
                dsent = record.dsent,
                dreceived = record.dreceived,
                subject = quote_literal(&record.subject),
                from = quote_literal(&record.from),
                to = quote_literal(&record.to),
                cc = quote_literal(&record.cc),
                mlist = quote_literal(&record.mlist),
                fflag = quote_literal(
                    &util::user_tag_value(&record.usertags, "follow-up").unwrap_or_default()
                ),
                fcompleted = quote_literal(
                    &util::user_tag_value(&record.usertags, "completed-on").unwrap_or_default()
                ),
                fdue = quote_literal(
                    &util::user_tag_value(&record.usertags, "due-by").unwrap_or_default()
                ),
                part = quote_literal(&record.part),
                labels = quote_literal(&record.labels),
                usertags = quote_literal(&record.usertags),
                cinfo = quote_literal(&record.cinfo),
                bdata = quote_literal(&record.bdata),
                userheaders = quote_literal(&record.userheaders),
                preview = quote_literal(&record.preview),
            ))?;
            Ok(())
        })
    }

    /// Delete one message; an unknown uid is a no-op.
    pub fn delete_message(&self, folder_name: &str, uid: &str) -> Result<()> {
        let folder_id = self.require_folder_id(folder_name)?;
        self.db.exec_statement(&format!(
            "DELETE FROM {} WHERE uid={}",
            quote_ident(&Self::table_name(folder_id)),
            quote_literal(uid)
        ))
    }

    /// Delete a batch of messages; unknown uids are skipped.
    pub fn delete_messages(&self, folder_name: &str, uids: &[String]) -> Result<()> {
        let folder_id = self.require_folder_id(folder_name)?;
        if uids.is_empty() {
            return Ok(());
        }
        let list = uids
            .iter()
            .map(|uid| quote_literal(uid))
            .collect::<Vec<_>>()
            .join(", ");
        self.db.exec_statement(&format!(
            "DELETE FROM {} WHERE uid IN ({})",
            quote_ident(&Self::table_name(folder_id)),
            list
        ))
    }

    pub fn count_messages(&self, folder_name: &str, kind: CountKind) -> Result<u32> {
        let folder_id = self.require_folder_id(folder_name)?;
        let mut sql = format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(&Self::table_name(folder_id))
        );
        if let Some(clause) = kind.where_clause() {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        let mut count = 0u32;
        self.db.exec_select(&sql, |row| {
            count = row.get::<_, i64>(0)? as u32;
            Ok(false)
        })?;
        Ok(count)
    }

    /// Map of uid to flags for a whole folder.
    pub fn dup_uids_with_flags(&self, folder_name: &str) -> Result<HashMap<String, u32>> {
        let folder_id = self.require_folder_id(folder_name)?;
        let mut map = HashMap::new();
        self.db.exec_select(
            &format!(
                "SELECT uid, flags FROM {}",
                quote_ident(&Self::table_name(folder_id))
            ),
            |row| {
                map.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32);
                Ok(true)
            },
        )?;
        Ok(map)
    }

    fn dup_uids_where(&self, folder_name: &str, clause: &str) -> Result<Vec<String>> {
        let folder_id = self.require_folder_id(folder_name)?;
        let mut uids = Vec::new();
        self.db.exec_select(
            &format!(
                "SELECT uid FROM {} WHERE {}",
                quote_ident(&Self::table_name(folder_id)),
                clause
            ),
            |row| {
                uids.push(row.get::<_, String>(0)?);
                Ok(true)
            },
        )?;
        Ok(uids)
    }

    pub fn dup_junk_uids(&self, folder_name: &str) -> Result<Vec<String>> {
        self.dup_uids_where(folder_name, "junk=1")
    }

    pub fn dup_deleted_uids(&self, folder_name: &str) -> Result<Vec<String>> {
        self.dup_uids_where(folder_name, "deleted=1")
    }

    fn check_public_key(key: &str) -> Result<()> {
        if key.starts_with(RESERVED_KEY_PREFIX) {
            Err(StoreError::invalid(format!(
                "key prefix '{}' is reserved",
                RESERVED_KEY_PREFIX
            )))
        } else {
            Ok(())
        }
    }

    fn read_key(&self, key: &str) -> Result<Option<String>> {
        let mut value = None;
        self.db.exec_select(
            &format!("SELECT value FROM keys WHERE key={}", quote_literal(key)),
            |row| {
                value = row.get::<_, Option<String>>(0)?;
                Ok(false)
            },
        )?;
        Ok(value)
    }

    fn write_key(&self, key: &str, value: &str) -> Result<()> {
        self.db.exec_statement(&format!(
            "INSERT OR REPLACE INTO keys (key, value) VALUES ({}, {})",
            quote_literal(key),
            quote_literal(value)
        ))
    }

    /// Integer value of a public key; reserved keys yield the default.
    pub fn get_int_key(&self, key: &str, default: i64) -> i64 {
        if Self::check_public_key(key).is_err() {
            return default;
        }
        match self.read_key(key) {
            Ok(Some(value)) => value.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn set_int_key(&self, key: &str, value: i64) -> Result<()> {
        Self::check_public_key(key)?;
        self.write_key(key, &value.to_string())
    }

    /// String value of a public key; None when unset or reserved.
    pub fn dup_string_key(&self, key: &str) -> Option<String> {
        if Self::check_public_key(key).is_err() {
            return None;
        }
        self.read_key(key).ok().flatten()
    }

    pub fn set_string_key(&self, key: &str, value: &str) -> Result<()> {
        Self::check_public_key(key)?;
        self.write_key(key, value)
    }

    pub(crate) fn get_internal_key(&self, key: &str) -> Result<Option<String>> {
        self.read_key(key)
    }
}

impl std::fmt::Debug for StoreDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreDb")
            .field("filename", &self.db.filename())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_folder(name: &str, base: u32) -> FolderRecord {
        FolderRecord {
            folder_name: name.to_string(),
            folder_id: 0,
            version: 3,
            flags: base + 1,
            nextuid: base + 2,
            timestamp: (base + 3) as i64,
            saved_count: base + 4,
            unread_count: base + 5,
            deleted_count: base + 6,
            junk_count: base + 7,
            visible_count: base + 8,
            jnd_count: base + 9,
            bdata: format!("{}bdata", name),
        }
    }

    fn sample_message(uid: &str, msg_flags: u32) -> MessageRecord {
        MessageRecord {
            folder_id: 0,
            uid: uid.to_string(),
            flags: msg_flags,
            msg_type: 102,
            dirty: 103,
            size: 110,
            dsent: 111,
            dreceived: 112,
            subject: format!("subject {}", uid),
            from: format!("from {}", uid),
            to: format!("to {}", uid),
            cc: format!("cc {}", uid),
            mlist: format!("mlist {}", uid),
            part: format!("part {}", uid),
            labels: format!("labels {}", uid),
            usertags: String::new(),
            cinfo: format!("cinfo {}", uid),
            bdata: format!("bdata {}", uid),
            userheaders: format!("userheaders {}", uid),
            preview: format!("preview {}", uid),
        }
    }

    fn open_temp() -> (tempfile::TempDir, StoreDb) {
        let dir = tempfile::tempdir().unwrap();
        let sdb = StoreDb::new(dir.path().join("store.db"), None).unwrap();
        (dir, sdb)
    }

    #[test]
    fn empty_store_has_schema_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let sdb = StoreDb::new(&path, None).unwrap();
            assert!(sdb.db().has_table("folders").unwrap());
            assert!(sdb.db().has_table("keys").unwrap());
            assert_eq!(
                sdb.get_internal_key(FOLDERS_VERSION_KEY).unwrap().as_deref(),
                Some("1")
            );
        }
        // data survive the object lifetime
        let sdb = StoreDb::new(&path, None).unwrap();
        assert_eq!(
            sdb.get_internal_key(MESSAGES_VERSION_KEY).unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn folder_id_assignment_and_reuse() {
        let (_dir, sdb) = open_temp();
        let f1 = sample_folder("Inbox/folder1", 10);
        let f2 = sample_folder("Inbox/folder2", 20);
        let f3 = sample_folder("Inbox/folder3", 30);

        assert_eq!(sdb.get_folder_id(&f1.folder_name).unwrap(), 0);
        assert_eq!(sdb.write_folder(&f1.folder_name, &f1).unwrap(), 1);
        assert_eq!(sdb.write_folder(&f2.folder_name, &f2).unwrap(), 2);
        assert_eq!(sdb.write_folder(&f3.folder_name, &f3).unwrap(), 3);

        sdb.delete_folder(&f2.folder_name).unwrap();
        assert_eq!(sdb.get_folder_id(&f2.folder_name).unwrap(), 0);
        // max id is 3, so the next insert takes 4
        assert_eq!(sdb.write_folder(&f2.folder_name, &f2).unwrap(), 4);
        sdb.delete_folder(&f2.folder_name).unwrap();
        // 4 was the max and is free again
        assert_eq!(sdb.write_folder(&f2.folder_name, &f2).unwrap(), 4);

        // overwrite keeps the id
        assert_eq!(sdb.write_folder(&f1.folder_name, &f1).unwrap(), 1);

        let loaded = sdb.read_folder(&f1.folder_name).unwrap().unwrap();
        assert_eq!(loaded.folder_id, 1);
        assert_eq!(loaded.bdata, "Inbox/folder1bdata");
        assert!(sdb.read_folder("unknown").unwrap().is_none());
    }

    #[test]
    fn rename_folder_errors() {
        let (_dir, sdb) = open_temp();
        let f1 = sample_folder("f1", 10);
        let f2 = sample_folder("f2", 20);
        sdb.write_folder("f1", &f1).unwrap();
        sdb.write_folder("f2", &f2).unwrap();

        let err = sdb.rename_folder("unknown", "renamed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = sdb.rename_folder("f1", "f2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exists);

        sdb.rename_folder("f1", "renamed").unwrap();
        assert_eq!(sdb.get_folder_id("f1").unwrap(), 0);
        assert_eq!(sdb.get_folder_id("renamed").unwrap(), 1);
        let loaded = sdb.read_folder("renamed").unwrap().unwrap();
        assert_eq!(loaded.flags, 11);
    }

    #[test]
    fn message_crud_and_counts() {
        let (_dir, sdb) = open_temp();
        sdb.write_folder("f1", &sample_folder("f1", 10)).unwrap();
        sdb.write_folder("f2", &sample_folder("f2", 20)).unwrap();

        let mut m1 = sample_message("10", flags::DRAFT);
        sdb.write_message("f1", &m1).unwrap();

        let err = sdb.read_message("unknown", "10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = sdb.read_message("f1", "20").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let loaded = sdb.read_message("f1", "10").unwrap();
        assert_eq!(loaded.folder_id, 1);
        assert_eq!(loaded.flags, flags::DRAFT);
        assert_eq!(loaded.subject, "subject 10");

        m1.flags = flags::SEEN;
        sdb.write_message("f1", &m1).unwrap();
        assert_eq!(sdb.count_messages("f1", CountKind::Total).unwrap(), 1);
        assert_eq!(sdb.count_messages("f1", CountKind::Unread).unwrap(), 0);

        let m2 = sample_message("20", 0);
        sdb.write_message("f2", &m2).unwrap();
        assert_eq!(sdb.count_messages("f2", CountKind::Unread).unwrap(), 1);
        assert_eq!(
            sdb.count_messages("f2", CountKind::NotJunkNotDeletedUnread).unwrap(),
            1
        );

        m1.flags = flags::JUNK | flags::SEEN;
        sdb.write_message("f1", &m1).unwrap();
        assert_eq!(sdb.count_messages("f1", CountKind::Junk).unwrap(), 1);
        assert_eq!(sdb.count_messages("f1", CountKind::JunkNotDeleted).unwrap(), 1);
        assert_eq!(sdb.count_messages("f1", CountKind::NotJunkNotDeleted).unwrap(), 0);
        assert_eq!(sdb.dup_junk_uids("f1").unwrap(), ["10"]);
        assert!(sdb.dup_deleted_uids("f1").unwrap().is_empty());

        m1.flags = flags::DELETED | flags::JUNK | flags::SEEN;
        sdb.write_message("f1", &m1).unwrap();
        assert_eq!(sdb.count_messages("f1", CountKind::Deleted).unwrap(), 1);
        assert_eq!(sdb.count_messages("f1", CountKind::JunkNotDeleted).unwrap(), 0);
        assert_eq!(sdb.dup_deleted_uids("f1").unwrap(), ["10"]);

        let uid_flags = sdb.dup_uids_with_flags("f1").unwrap();
        assert_eq!(uid_flags.len(), 1);
        assert_eq!(uid_flags["10"], flags::DELETED | flags::JUNK | flags::SEEN);

        assert_eq!(
            sdb.dup_uids_with_flags("unknown").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        sdb.delete_message("f2", "unknown").unwrap();
        assert_eq!(sdb.count_messages("f2", CountKind::Total).unwrap(), 1);
        sdb.delete_message("f2", "20").unwrap();
        assert_eq!(sdb.count_messages("f2", CountKind::Total).unwrap(), 0);
    }

    #[test]
    fn delete_messages_batch() {
        let (_dir, sdb) = open_temp();
        sdb.write_folder("f2", &sample_folder("f2", 20)).unwrap();
        for uid in ["a-1", "a-2", "a-3", "a-4"] {
            sdb.write_message("f2", &sample_message(uid, 0)).unwrap();
        }

        let batch: Vec<String> = ["a-1", "a-3", "unknown-'\"%X", "a-2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            sdb.delete_messages("unknown", &batch).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        sdb.delete_messages("f2", &batch).unwrap();
        assert_eq!(sdb.count_messages("f2", CountKind::Total).unwrap(), 1);
        assert!(sdb.read_message("f2", "a-4").is_ok());
    }

    #[test]
    fn clear_folder_keeps_record() {
        let (_dir, sdb) = open_temp();
        sdb.write_folder("f1", &sample_folder("f1", 10)).unwrap();
        sdb.write_message("f1", &sample_message("10", 0)).unwrap();

        sdb.clear_folder("unknown").unwrap();
        sdb.clear_folder("f1").unwrap();
        assert_eq!(sdb.get_folder_id("f1").unwrap(), 1);
        assert_eq!(sdb.count_messages("f1", CountKind::Total).unwrap(), 0);
    }

    #[test]
    fn keys_api_reserved_prefix() {
        let (_dir, sdb) = open_temp();

        assert_eq!(sdb.get_int_key("int-key", 999), 999);
        sdb.set_int_key("int-key", 480).unwrap();
        assert_eq!(sdb.get_int_key("int-key", 999), 480);

        assert_eq!(sdb.dup_string_key("str-key"), None);
        sdb.set_string_key("str-key", "xyz").unwrap();
        assert_eq!(sdb.dup_string_key("str-key").as_deref(), Some("xyz"));

        let obscure_key = "obscure-'\"\\?!#%&-key";
        let obscure_value = "obscure &*(^%$#@!)' \\\"'''";
        sdb.set_string_key(obscure_key, obscure_value).unwrap();
        assert_eq!(sdb.dup_string_key(obscure_key).as_deref(), Some(obscure_value));

        // reserved namespace is rejected for writes and hidden from reads
        assert_eq!(
            sdb.set_int_key("csdb::anything", 1).unwrap_err().kind(),
            ErrorKind::Invalid
        );
        assert_eq!(
            sdb.set_string_key("csdb::folders_version", "def").unwrap_err().kind(),
            ErrorKind::Invalid
        );
        assert_eq!(sdb.get_int_key("csdb::folders_version", 999), 999);
        assert_eq!(sdb.dup_string_key("csdb::folders_version"), None);
        assert_eq!(
            sdb.get_internal_key(FOLDERS_VERSION_KEY).unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn keys_respect_transactions() {
        let (_dir, sdb) = open_temp();
        sdb.set_int_key("int-key", 480).unwrap();

        sdb.db().begin_transaction().unwrap();
        sdb.set_int_key("int-key", 256).unwrap();
        sdb.set_string_key("str-key", "tuv").unwrap();
        assert_eq!(sdb.get_int_key("int-key", 999), 256);
        sdb.db().abort_transaction().unwrap();

        assert_eq!(sdb.get_int_key("int-key", 999), 480);
        assert_eq!(sdb.dup_string_key("str-key"), None);
    }
}
