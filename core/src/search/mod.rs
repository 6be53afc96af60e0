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

//! The store search driver: binds a store, an expression and a set of
//! folders; `rebuild` compiles and executes the query and installs a fresh
//! result index. Thread-aware searches go through the two-phase expansion.

pub(crate) mod compile;
mod index;
pub mod sexp;
pub mod util;

pub use index::{MatchThreadsKind, MatchThreadsItem, SearchIndex};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cancellable::{self, Cancellable};
use crate::db::quote_ident;
use crate::error::{Result, StoreError};
use crate::store::{Folder, Store};
use crate::storedb::{MessageRecord, StoreDb};
use crate::thread::ThreadFlags;

use compile::{CompileCtx, EvalCaches, EvalRow};
use sexp::Expr;

/// One row of a search result.
#[derive(Debug, Clone)]
pub struct SearchItem {
    pub folder_id: u32,
    pub uid: String,
    /// Stringified values of the requested additional columns, in order;
    /// None where the column is textual and empty.
    pub additional_values: Vec<Option<String>>,
    pub(crate) folder_name: String,
}

struct SearchState {
    expression: Option<String>,
    folders: Vec<Arc<dyn Folder>>,
    additional_columns: Option<Vec<String>>,
    match_indexes: Vec<Arc<SearchIndex>>,
    initialized: bool,
    items: Vec<SearchItem>,
    result_index: Arc<SearchIndex>,
}

/// A query over a set of folders of one store.
pub struct StoreSearch {
    store: Arc<dyn Store>,
    state: Mutex<SearchState>,
}

impl StoreSearch {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            state: Mutex::new(SearchState {
                expression: None,
                folders: Vec::new(),
                additional_columns: None,
                match_indexes: Vec::new(),
                initialized: true,
                items: Vec::new(),
                result_index: Arc::new(SearchIndex::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Add a folder to the search scope; adding twice is harmless. Results
    /// must be rebuilt before they can be read again.
    pub fn add_folder(&self, folder: Arc<dyn Folder>) {
        let mut state = self.state.lock().unwrap();
        if !state.folders.iter().any(|f| Arc::ptr_eq(f, &folder)) {
            state.folders.push(folder);
        }
        state.initialized = false;
    }

    /// Remove a folder from the scope; unknown folders are harmless.
    pub fn remove_folder(&self, folder: &Arc<dyn Folder>) {
        let mut state = self.state.lock().unwrap();
        state.folders.retain(|f| !Arc::ptr_eq(f, folder));
        state.initialized = false;
    }

    pub fn list_folders(&self) -> Vec<Arc<dyn Folder>> {
        self.state.lock().unwrap().folders.clone()
    }

    pub fn set_expression(&self, expression: &str) {
        let mut state = self.state.lock().unwrap();
        state.expression = Some(expression.to_string());
        state.initialized = false;
    }

    pub fn expression(&self) -> Option<String> {
        self.state.lock().unwrap().expression.clone()
    }

    /// Declare extra message-table columns whose values are returned with
    /// every item. An empty list clears the declaration.
    pub fn set_additional_columns(&self, columns: &[String]) {
        let mut state = self.state.lock().unwrap();
        state.additional_columns = if columns.is_empty() {
            None
        } else {
            Some(columns.to_vec())
        };
        state.initialized = false;
    }

    pub fn dup_additional_columns(&self) -> Option<Vec<String>> {
        self.state.lock().unwrap().additional_columns.clone()
    }

    pub fn add_match_index(&self, match_index: Arc<SearchIndex>) {
        let mut state = self.state.lock().unwrap();
        if !state
            .match_indexes
            .iter()
            .any(|i| i.token() == match_index.token())
        {
            state.match_indexes.push(match_index);
        }
    }

    pub fn remove_match_index(&self, match_index: &SearchIndex) {
        let mut state = self.state.lock().unwrap();
        state
            .match_indexes
            .retain(|i| i.token() != match_index.token());
    }

    pub fn list_match_indexes(&self) -> Vec<Arc<SearchIndex>> {
        self.state.lock().unwrap().match_indexes.clone()
    }

    /// Thread-expansion kind of the current expression, with its subject
    /// linkage flag. `(KindNone, NONE)` when the expression is not
    /// thread-aware.
    pub fn get_match_threads_kind(&self) -> (MatchThreadsKind, ThreadFlags) {
        let Some(expression) = self.expression() else {
            return (MatchThreadsKind::None, ThreadFlags::NONE);
        };
        let Ok(parsed) = sexp::parse(&expression) else {
            return (MatchThreadsKind::None, ThreadFlags::NONE);
        };
        match compile::find_match_threads(&parsed) {
            Some(mode) => MatchThreadsKind::parse_mode(mode),
            None => (MatchThreadsKind::None, ThreadFlags::NONE),
        }
    }

    /// Compile and run the query, replacing the result index. On failure the
    /// previous results stay visible.
    pub fn rebuild(&self, cancellable: Option<&Cancellable>) -> Result<()> {
        let (expression, folders, columns, match_indexes) = {
            let state = self.state.lock().unwrap();
            (
                state.expression.clone(),
                state.folders.clone(),
                state.additional_columns.clone(),
                state.match_indexes.clone(),
            )
        };

        let mut items = Vec::new();
        let result_index = Arc::new(SearchIndex::new());

        if let Some(expression) = expression.filter(|e| !e.trim().is_empty()) {
            let parsed = sexp::parse(&expression)?;
            debug!(expression = expression.as_str(), folders = folders.len(), "rebuild");

            for folder in &folders {
                cancellable::check(cancellable)?;
                folder.summary().save()?;
                self.search_folder(
                    &parsed,
                    folder,
                    columns.as_deref(),
                    &match_indexes,
                    &result_index,
                    &mut items,
                    cancellable,
                )?;
            }
        }

        let mut state = self.state.lock().unwrap();
        state.items = items;
        state.result_index = result_index;
        state.initialized = true;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn search_folder(
        &self,
        parsed: &Expr,
        folder: &Arc<dyn Folder>,
        columns: Option<&[String]>,
        match_indexes: &[Arc<SearchIndex>],
        result_index: &SearchIndex,
        items: &mut Vec<SearchItem>,
        cancellable: Option<&Cancellable>,
    ) -> Result<()> {
        let store_db = self.store.store_db();
        let store_uid = self.store.uid().to_string();
        let folder_name = folder.full_name().to_string();
        let folder_id = store_db.get_folder_id(&folder_name)?;

        let ctx = CompileCtx { store_uid: &store_uid, folder_name: &folder_name };
        let compiled = compile::compile(parsed, &ctx);

        let mut candidates: Vec<MessageRecord> = Vec::new();
        if folder_id != 0 {
            read_folder_records(store_db, folder_id, Some(&compiled.where_sql), |record| {
                candidates.push(record);
            })?;
        } else {
            // not in the database (virtual sources); use the summary entries
            for uid in folder.dup_uids() {
                if let Some(info) = folder.summary().peek_loaded(&uid) {
                    candidates.push(info.record());
                }
            }
        }

        let needs_eval = !compiled.fully_sql || folder_id == 0;
        let mut caches = EvalCaches::default();
        let session = self.store.session();

        for record in candidates {
            cancellable::check(cancellable)?;
            if needs_eval {
                let mut row = EvalRow {
                    record: &record,
                    folder,
                    store_uid: &store_uid,
                    session: session.clone(),
                    match_indexes,
                    caches: &mut caches,
                    cancellable,
                };
                if !compile::eval_bool(parsed, &mut row)? {
                    continue;
                }
            }
            let additional_values = match columns {
                Some(columns) => columns
                    .iter()
                    .map(|column| stringify_column(&record, column))
                    .collect(),
                None => Vec::new(),
            };
            result_index.add(&store_uid, folder_id, &record.uid);
            items.push(SearchItem {
                folder_id,
                uid: record.uid.clone(),
                additional_values,
                folder_name: folder_name.clone(),
            });
        }
        Ok(())
    }

    fn check_initialized(&self) -> Result<()> {
        if !self.state.lock().unwrap().initialized {
            Err(StoreError::not_initialized(
                "search changed since the last rebuild",
            ))
        } else {
            Ok(())
        }
    }

    /// All result items of the last rebuild (or installed result index).
    pub fn get_items(&self) -> Result<Vec<SearchItem>> {
        self.check_initialized()?;
        Ok(self.state.lock().unwrap().items.clone())
    }

    /// Result UIDs belonging to one folder of the scope.
    pub fn get_uids(&self, folder_name: &str) -> Result<Vec<String>> {
        self.check_initialized()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|item| item.folder_name == folder_name)
            .map(|item| item.uid.clone())
            .collect())
    }

    /// A detached copy of the current result index; feed it through
    /// `SearchIndex::apply_match_threads` and install it back with
    /// `set_result_index`.
    pub fn ref_result_index(&self) -> Arc<SearchIndex> {
        let copy = SearchIndex::new();
        let current = Arc::clone(&self.state.lock().unwrap().result_index);
        for (store_uid, folder_id, uid) in current.snapshot() {
            copy.add(&store_uid, folder_id, &uid);
        }
        Arc::new(copy)
    }

    /// Install an externally expanded result index; items are re-derived for
    /// the folders of this search.
    pub fn set_result_index(&self, result_index: &Arc<SearchIndex>) {
        let folders = self.list_folders();
        let store_uid = self.store.uid().to_string();
        let store_db = Arc::clone(self.store.store_db());

        let mut items = Vec::new();
        for folder in &folders {
            let folder_name = folder.full_name().to_string();
            let folder_id = store_db.get_folder_id(&folder_name).unwrap_or(0);
            let folder_uids: HashSet<String> = folder.dup_uids().into_iter().collect();
            for (entry_store, entry_folder, uid) in result_index.snapshot() {
                if entry_store == store_uid
                    && entry_folder == folder_id
                    && folder_uids.contains(&uid)
                {
                    items.push(SearchItem {
                        folder_id,
                        uid,
                        additional_values: Vec::new(),
                        folder_name: folder_name.clone(),
                    });
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        state.items = items;
        state.result_index = Arc::clone(result_index);
        state.initialized = true;
    }

    /// Append the thread candidates of every folder in scope: each message's
    /// uid, subject, hashed message id, references and dates.
    pub fn add_match_threads_items(
        &self,
        items: &mut Vec<MatchThreadsItem>,
        cancellable: Option<&Cancellable>,
    ) -> Result<()> {
        let store_db = self.store.store_db();
        let store_uid = self.store.uid().to_string();
        for folder in self.list_folders() {
            cancellable::check(cancellable)?;
            let folder_name = folder.full_name().to_string();
            let folder_id = store_db.get_folder_id(&folder_name)?;
            let mut push_record = |record: &MessageRecord| {
                let (message_id, references) =
                    util::part_decode(&record.part).unwrap_or((0, Vec::new()));
                items.push(MatchThreadsItem {
                    store_uid: store_uid.clone(),
                    folder_id,
                    uid: record.uid.clone(),
                    subject: record.subject.clone(),
                    message_id,
                    references,
                    dsent: record.dsent,
                    dreceived: record.dreceived,
                });
            };
            if folder_id != 0 {
                read_folder_records(store_db, folder_id, None, |record| push_record(&record))?;
            } else {
                for uid in folder.dup_uids() {
                    if let Some(info) = folder.summary().peek_loaded(&uid) {
                        push_record(&info.record());
                    }
                }
            }
        }
        Ok(())
    }

    /// Single-folder convenience: run `expression` against one folder,
    /// applying the match-threads expansion transparently.
    pub fn folder_search(
        store: &Arc<dyn Store>,
        folder: &Arc<dyn Folder>,
        expression: &str,
        cancellable: Option<&Cancellable>,
    ) -> Result<Vec<String>> {
        let search = StoreSearch::new(Arc::clone(store));
        search.add_folder(Arc::clone(folder));
        search.set_expression(expression);
        search.rebuild(cancellable)?;

        let (kind, thread_flags) = search.get_match_threads_kind();
        if kind != MatchThreadsKind::None {
            let mut items = Vec::new();
            search.add_match_threads_items(&mut items, cancellable)?;
            let result_index = search.ref_result_index();
            result_index.apply_match_threads(&items, kind, thread_flags);
            search.set_result_index(&result_index);
        }
        search.get_uids(folder.full_name())
    }
}

impl std::fmt::Debug for StoreSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("StoreSearch")
            .field("store", &self.store.uid())
            .field("folders", &state.folders.len())
            .field("expression", &state.expression)
            .finish()
    }
}

const RECORD_COLUMNS: &str = "uid, flags, msg_type, dirty, size, dsent, dreceived, \
     subject, mail_from, mail_to, mail_cc, mlist, part, labels, usertags, \
     cinfo, bdata, userheaders, preview";

fn read_folder_records(
    store_db: &StoreDb,
    folder_id: u32,
    where_sql: Option<&str>,
    mut callback: impl FnMut(MessageRecord),
) -> Result<()> {
    let table = StoreDb::table_name(folder_id);
    let mut sql = format!("SELECT {} FROM {}", RECORD_COLUMNS, quote_ident(&table));
    if let Some(where_sql) = where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(where_sql);
    }
    store_db.db().exec_select(&sql, |row| {
        let text = |idx: usize| -> Result<String> {
            Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
        };
        callback(MessageRecord {
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
        });
        Ok(true)
    })
}

/// Stringify a message-table column for the additional-values list; textual
/// columns yield None when empty, numeric columns always yield a value.
fn stringify_column(record: &MessageRecord, column: &str) -> Option<String> {
    let text = |value: &str| {
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    };
    match column {
        "uid" => Some(record.uid.clone()),
        "flags" => Some(record.flags.to_string()),
        "msg_type" => Some(record.msg_type.to_string()),
        "dirty" => Some(record.dirty.to_string()),
        "size" => Some(record.size.to_string()),
        "dsent" => Some(record.dsent.to_string()),
        "dreceived" => Some(record.dreceived.to_string()),
        "subject" => text(&record.subject),
        "mail_from" => text(&record.from),
        "mail_to" => text(&record.to),
        "mail_cc" => text(&record.cc),
        "mlist" => text(&record.mlist),
        "part" => text(&record.part),
        "labels" => text(&record.labels),
        "usertags" => text(&record.usertags),
        "cinfo" => text(&record.cinfo),
        "bdata" => text(&record.bdata),
        "userheaders" => text(&record.userheaders),
        "preview" => text(&record.preview),
        _ => None,
    }
}
