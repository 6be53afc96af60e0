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

//! Virtual folders: a `Folder` whose contents are the live result of a query
//! over a set of source folders (which may themselves be virtual). Members
//! are addressed by a synthetic vUID whose 8-character prefix identifies the
//! source folder and whose suffix is the source UID verbatim.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use base64::Engine as _;
use md5::{Digest, Md5};
use tracing::debug;

use crate::cancellable::Cancellable;
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::search::{compile, sexp, MatchThreadsKind, SearchIndex, StoreSearch};
use crate::store::{ChangeInfo, Folder, MimeMessage, Store};
use crate::summary::{FolderSummary, MessageInfo};
use crate::storedb::MessageRecord;

/// Operation flags for source/expression updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VeeOpFlags {
    /// Update the configuration without rebuilding the membership.
    pub skip_rebuild: bool,
}

impl VeeOpFlags {
    pub const NONE: VeeOpFlags = VeeOpFlags { skip_rebuild: false };
    pub const SKIP_REBUILD: VeeOpFlags = VeeOpFlags { skip_rebuild: true };
}

/// 8-character folder prefix of a vUID: url-safe base64 of the first six MD5
/// bytes over the source store uid and folder name.
pub fn vuid_prefix(store_uid: &str, folder_name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(store_uid.as_bytes());
    hasher.update(folder_name.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = base64::engine::general_purpose::STANDARD.encode(&digest[..6]);
    prefix = prefix.replace('+', ".").replace('/', "_");
    prefix
}

struct SourceEntry {
    folder: Arc<dyn Folder>,
    prefix: String,
    listener_id: usize,
}

struct VeeState {
    sources: Vec<SourceEntry>,
    expression: String,
    parsed: Option<sexp::Expr>,
    /// vuid -> (source folder, source uid)
    vuid_map: HashMap<String, (Arc<dyn Folder>, String)>,
}

struct RebuildGate {
    running: bool,
    rerun: bool,
}

/// A query-driven folder mirroring a subset of messages from its sources.
pub struct VeeFolder {
    name: String,
    parent_store: Arc<dyn Store>,
    summary: Arc<FolderSummary>,
    state: Mutex<VeeState>,
    gate: Mutex<RebuildGate>,
    auto_update: AtomicBool,
    self_weak: Weak<VeeFolder>,
}

impl VeeFolder {
    /// Create an empty virtual folder inside `parent_store`. The folder has
    /// no sources and no expression yet; `auto_update` follows the config.
    pub fn new(parent_store: Arc<dyn Store>, name: &str, config: &Config) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            name: name.to_string(),
            parent_store,
            summary: FolderSummary::new_memory(name),
            state: Mutex::new(VeeState {
                sources: Vec::new(),
                expression: String::new(),
                parsed: None,
                vuid_map: HashMap::new(),
            }),
            gate: Mutex::new(RebuildGate { running: false, rerun: false }),
            auto_update: AtomicBool::new(config.vfolder_auto_update),
            self_weak: self_weak.clone(),
        })
    }

    pub fn set_auto_update(&self, auto_update: bool) {
        self.auto_update.store(auto_update, Ordering::SeqCst);
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update.load(Ordering::SeqCst)
    }

    /// Resolve a vUID to its source folder and source UID.
    pub fn vuid_to_source(&self, vuid: &str) -> Option<(Arc<dyn Folder>, String)> {
        self.state.lock().unwrap().vuid_map.get(vuid).cloned()
    }

    pub fn list_sources(&self) -> Vec<Arc<dyn Folder>> {
        self.state
            .lock()
            .unwrap()
            .sources
            .iter()
            .map(|entry| Arc::clone(&entry.folder))
            .collect()
    }

    /// Add a source folder; a duplicate insertion is ignored. Rebuilds
    /// unless `skip_rebuild` is set.
    pub fn add_folder_sync(
        &self,
        source: Arc<dyn Folder>,
        op_flags: VeeOpFlags,
        cancellable: Option<&Cancellable>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state
                .sources
                .iter()
                .any(|entry| Arc::ptr_eq(&entry.folder, &source))
            {
                return Ok(());
            }
            let store = source.parent_store();
            let prefix = vuid_prefix(store.uid(), source.full_name());
            let listener_id = self.attach_source_listener(&source);
            state.sources.push(SourceEntry { folder: source, prefix, listener_id });
        }
        if !op_flags.skip_rebuild {
            self.rebuild(cancellable)?;
        }
        Ok(())
    }

    /// Remove a source folder; unknown sources are ignored.
    pub fn remove_folder_sync(
        &self,
        source: &Arc<dyn Folder>,
        op_flags: VeeOpFlags,
        cancellable: Option<&Cancellable>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let Some(position) = state
                .sources
                .iter()
                .position(|entry| Arc::ptr_eq(&entry.folder, source))
            else {
                return Ok(());
            };
            let entry = state.sources.remove(position);
            entry.folder.summary().remove_change_listener(entry.listener_id);
        }
        if !op_flags.skip_rebuild {
            self.rebuild(cancellable)?;
        }
        Ok(())
    }

    /// Replace the filter expression. Rebuilds unless `skip_rebuild` is set.
    pub fn set_expression_sync(
        &self,
        expression: &str,
        op_flags: VeeOpFlags,
        cancellable: Option<&Cancellable>,
    ) -> Result<()> {
        let parsed = sexp::parse(expression)?;
        {
            let mut state = self.state.lock().unwrap();
            state.expression = expression.to_string();
            state.parsed = Some(parsed);
        }
        if !op_flags.skip_rebuild {
            self.rebuild(cancellable)?;
        }
        Ok(())
    }

    pub fn expression(&self) -> String {
        self.state.lock().unwrap().expression.clone()
    }

    /// Blocking rebuild against the current sources and expression.
    pub fn refresh_info_sync(&self, cancellable: Option<&Cancellable>) -> Result<()> {
        self.rebuild(cancellable)
    }

    fn attach_source_listener(&self, source: &Arc<dyn Folder>) -> usize {
        let weak = self.self_weak.clone();
        let source_weak: Weak<dyn Folder> = Arc::downgrade(source);
        source.summary().add_change_listener(Arc::new(move |changes| {
            let (Some(vee), Some(source)) = (weak.upgrade(), source_weak.upgrade()) else {
                return;
            };
            vee.handle_source_changed(&source, changes);
        }))
    }

    /// Source `changed` propagation: removes drop the vUIDs, changes are
    /// re-evaluated against the single message, adds schedule a rebuild when
    /// auto-update is on.
    fn handle_source_changed(self: &Arc<Self>, source: &Arc<dyn Folder>, changes: &ChangeInfo) {
        let (prefix, parsed, thread_aware) = {
            let state = self.state.lock().unwrap();
            let Some(entry) = state
                .sources
                .iter()
                .find(|entry| Arc::ptr_eq(&entry.folder, source))
            else {
                return;
            };
            let thread_aware = state
                .parsed
                .as_ref()
                .map(|expr| {
                    compile::find_match_threads(expr)
                        .map(|mode| MatchThreadsKind::parse_mode(mode).0 != MatchThreadsKind::None)
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            (entry.prefix.clone(), state.parsed.clone(), thread_aware)
        };

        let auto_update = self.auto_update();
        let mut needs_rebuild = false;

        for uid in &changes.removed {
            let vuid = format!("{}{}", prefix, uid);
            let known = {
                let mut state = self.state.lock().unwrap();
                state.vuid_map.remove(&vuid).is_some()
            };
            if known {
                self.summary.remove_uid(&vuid);
            }
        }

        for uid in &changes.changed {
            let vuid = format!("{}{}", prefix, uid);
            let present = self.state.lock().unwrap().vuid_map.contains_key(&vuid);

            if thread_aware {
                if auto_update {
                    needs_rebuild = true;
                } else if present {
                    self.mirror_entry_from_source(source, uid, &vuid);
                }
                continue;
            }

            let matches = match &parsed {
                Some(expr) => self.eval_single(expr, source, uid).unwrap_or(false),
                None => false,
            };
            match (present, matches, auto_update) {
                (true, true, _) => self.mirror_entry_from_source(source, uid, &vuid),
                (true, false, true) => {
                    self.state.lock().unwrap().vuid_map.remove(&vuid);
                    self.summary.remove_uid(&vuid);
                }
                (true, false, false) => {
                    // membership frozen until an explicit refresh
                    self.mirror_entry_from_source(source, uid, &vuid);
                }
                (false, true, true) => {
                    self.add_entry_from_source(source, uid, &vuid);
                }
                (false, true, false) | (false, false, _) => {}
            }
        }

        if !changes.added.is_empty() && auto_update {
            needs_rebuild = true;
        }

        if needs_rebuild {
            let _ = self.rebuild(None);
        } else {
            self.summary.flush_changes();
        }
    }

    fn source_record(source: &Arc<dyn Folder>, uid: &str) -> Option<(MessageInfo, MessageRecord)> {
        let info = source.summary().get(uid)?;
        let record = info.record();
        Some((info, record))
    }

    fn add_entry_from_source(&self, source: &Arc<dyn Folder>, uid: &str, vuid: &str) {
        let Some((source_info, mut record)) = Self::source_record(source, uid) else {
            return;
        };
        record.uid = vuid.to_string();
        let vee_info = MessageInfo::from_record(record);
        vee_info.set_mirror(source_info);
        self.summary.add(vee_info, true);
        self.state
            .lock()
            .unwrap()
            .vuid_map
            .insert(vuid.to_string(), (Arc::clone(source), uid.to_string()));
    }

    fn mirror_entry_from_source(&self, source: &Arc<dyn Folder>, uid: &str, vuid: &str) {
        let Some(vee_info) = self.summary.peek_loaded(vuid) else {
            return;
        };
        let Some((_, record)) = Self::source_record(source, uid) else {
            return;
        };
        vee_info.set_flags(!0, record.flags);
        self.summary.flush_changes();
    }

    fn eval_single(&self, expr: &sexp::Expr, source: &Arc<dyn Folder>, uid: &str) -> Result<bool> {
        let Some((_, record)) = Self::source_record(source, uid) else {
            return Ok(false);
        };
        let store = source.parent_store();
        let mut caches = compile::EvalCaches::default();
        let mut row = compile::EvalRow {
            record: &record,
            folder: source,
            store_uid: store.uid(),
            session: store.session(),
            match_indexes: &[],
            caches: &mut caches,
            cancellable: None,
        };
        compile::eval_bool(expr, &mut row)
    }

    /// Coalesced rebuild: a schedule during a running rebuild sets a re-run
    /// bit instead of recursing.
    fn rebuild(&self, cancellable: Option<&Cancellable>) -> Result<()> {
        {
            let mut gate = self.gate.lock().unwrap();
            if gate.running {
                gate.rerun = true;
                return Ok(());
            }
            gate.running = true;
        }
        loop {
            let result = self.rebuild_once(cancellable);
            let mut gate = self.gate.lock().unwrap();
            if result.is_err() || !gate.rerun {
                gate.running = false;
                gate.rerun = false;
                return result;
            }
            gate.rerun = false;
        }
    }

    fn rebuild_once(&self, cancellable: Option<&Cancellable>) -> Result<()> {
        let (sources, expression) = {
            let state = self.state.lock().unwrap();
            (
                state
                    .sources
                    .iter()
                    .map(|entry| (Arc::clone(&entry.folder), entry.prefix.clone()))
                    .collect::<Vec<_>>(),
                state.expression.clone(),
            )
        };
        debug!(folder = self.name.as_str(), sources = sources.len(), "vee rebuild");

        // membership: (vuid, source folder, source uid)
        let mut membership: Vec<(String, Arc<dyn Folder>, String)> = Vec::new();

        if !expression.trim().is_empty() && !sources.is_empty() {
            // one search per source store, results merged
            let mut searches: Vec<(StoreSearch, Vec<(Arc<dyn Folder>, String)>)> = Vec::new();
            for (folder, prefix) in &sources {
                let store = folder.parent_store();
                let position = searches
                    .iter()
                    .position(|(search, _)| search.store().uid() == store.uid());
                let position = match position {
                    Some(position) => position,
                    None => {
                        let search = StoreSearch::new(store);
                        search.set_expression(&expression);
                        searches.push((search, Vec::new()));
                        searches.len() - 1
                    }
                };
                searches[position].0.add_folder(Arc::clone(folder));
                searches[position].1.push((Arc::clone(folder), prefix.clone()));
            }

            for (search, _) in &searches {
                search.rebuild(cancellable)?;
            }

            let (kind, thread_flags) = searches[0].0.get_match_threads_kind();
            if kind != MatchThreadsKind::None {
                let mut items = Vec::new();
                let merged: Arc<SearchIndex> = searches[0].0.ref_result_index();
                for (position, (search, _)) in searches.iter().enumerate() {
                    search.add_match_threads_items(&mut items, cancellable)?;
                    if position > 0 {
                        let other = search.ref_result_index();
                        merged.move_from_existing(&other);
                    }
                }
                merged.apply_match_threads(&items, kind, thread_flags);
                for (search, _) in &searches {
                    search.set_result_index(&merged);
                }
            }

            for (search, group) in &searches {
                for item in search.get_items()? {
                    let Some((folder, prefix)) = group
                        .iter()
                        .find(|(folder, _)| folder.full_name() == item.folder_name)
                    else {
                        continue;
                    };
                    membership.push((
                        format!("{}{}", prefix, item.uid),
                        Arc::clone(folder),
                        item.uid,
                    ));
                }
            }
        }

        // diff against the current map
        let new_vuids: HashSet<&str> = membership.iter().map(|(vuid, _, _)| vuid.as_str()).collect();
        let stale: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .vuid_map
                .keys()
                .filter(|vuid| !new_vuids.contains(vuid.as_str()))
                .cloned()
                .collect()
        };
        for vuid in &stale {
            self.state.lock().unwrap().vuid_map.remove(vuid);
            self.summary.remove_uid(vuid);
        }
        for (vuid, folder, uid) in &membership {
            let known = self.state.lock().unwrap().vuid_map.contains_key(vuid);
            if !known {
                self.add_entry_from_source(folder, uid, vuid);
            }
        }

        // emission after the summary is consistent
        self.summary.flush_changes();
        Ok(())
    }
}

impl Folder for VeeFolder {
    fn full_name(&self) -> &str {
        &self.name
    }

    fn parent_store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.parent_store)
    }

    fn summary(&self) -> &Arc<FolderSummary> {
        &self.summary
    }

    fn get_message_sync(
        &self,
        uid: &str,
        cancellable: Option<&Cancellable>,
    ) -> Result<MimeMessage> {
        let (source, source_uid) = self
            .vuid_to_source(uid)
            .ok_or_else(|| StoreError::not_found(format!("no message '{}'", uid)))?;
        source.get_message_sync(&source_uid, cancellable)
    }

    fn search_body_sync(&self, words: &[String]) -> Result<Vec<String>> {
        let entries: Vec<(String, Arc<dyn Folder>, String)> = {
            let state = self.state.lock().unwrap();
            state
                .vuid_map
                .iter()
                .map(|(vuid, (folder, uid))| (vuid.clone(), Arc::clone(folder), uid.clone()))
                .collect()
        };
        let mut by_source: HashMap<usize, (Arc<dyn Folder>, HashSet<String>)> = HashMap::new();
        let sources = self.list_sources();
        for (position, source) in sources.iter().enumerate() {
            let matched: HashSet<String> = source.search_body_sync(words)?.into_iter().collect();
            by_source.insert(position, (Arc::clone(source), matched));
        }
        let mut out = Vec::new();
        for (vuid, folder, uid) in entries {
            let matched = by_source.values().any(|(source, uids)| {
                Arc::ptr_eq(source, &folder) && uids.contains(&uid)
            });
            if matched {
                out.push(vuid);
            }
        }
        Ok(out)
    }

    fn synchronize_sync(&self, expunge: bool, _cancellable: Option<&Cancellable>) -> Result<()> {
        if expunge {
            return Err(StoreError::invalid(
                "expunge is forbidden on a virtual folder; expunge its sources",
            ));
        }
        self.summary.flush_changes();
        Ok(())
    }
}

impl std::fmt::Debug for VeeFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VeeFolder")
            .field("name", &self.name)
            .field("sources", &self.list_sources().len())
            .finish()
    }
}
