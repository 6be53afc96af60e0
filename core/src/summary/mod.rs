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

//! Per-folder summary: an in-memory map of refcounted `MessageInfo` entries
//! with load-on-demand from the store database, dirty tracking, incremental
//! counters and coalesced change signals.

mod extension;

pub use extension::{ImapInfoState, InfoExtension};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::error::Result;
use crate::search::util;
use crate::store::flags;
use crate::store::ChangeInfo;
use crate::storedb::{CountKind, MessageRecord, StoreDb};

/// Listener invoked with each coalesced `changed` signal.
pub type ChangeListener = Arc<dyn Fn(&ChangeInfo) + Send + Sync>;

/// Incrementally maintained counters of a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounts {
    pub saved: u32,
    pub unread: u32,
    pub deleted: u32,
    pub junk: u32,
    pub junk_not_deleted: u32,
    pub visible: u32,
}

impl SummaryCounts {
    fn apply(&mut self, msg_flags: u32, delta: i64) {
        let bump = |count: &mut u32| {
            *count = (*count as i64 + delta).max(0) as u32;
        };
        bump(&mut self.saved);
        if msg_flags & flags::SEEN == 0 {
            bump(&mut self.unread);
        }
        if msg_flags & flags::DELETED != 0 {
            bump(&mut self.deleted);
        }
        if msg_flags & flags::JUNK != 0 {
            bump(&mut self.junk);
            if msg_flags & flags::DELETED == 0 {
                bump(&mut self.junk_not_deleted);
            }
        }
        if msg_flags & (flags::DELETED | flags::JUNK) == 0 {
            bump(&mut self.visible);
        }
    }
}

struct SummaryInner {
    loaded: HashMap<String, MessageInfo>,
    /// Removed-but-not-saved uids; `save` turns these into deletions.
    tombstones: HashSet<String>,
    counts: SummaryCounts,
    pending: ChangeInfo,
    flushing: bool,
}

/// The summary of one folder. Created once per folder; shared by handle.
pub struct FolderSummary {
    store_db: Option<Arc<StoreDb>>,
    folder_name: String,
    inner: Mutex<SummaryInner>,
    listeners: Mutex<Vec<(usize, ChangeListener)>>,
    next_listener_id: AtomicUsize,
}

impl FolderSummary {
    /// Create a database-backed summary; counters reconcile from the
    /// database when the folder already exists there.
    pub fn new(store_db: Arc<StoreDb>, folder_name: impl Into<String>) -> Arc<Self> {
        let summary = Arc::new(Self {
            store_db: Some(store_db),
            folder_name: folder_name.into(),
            inner: Mutex::new(SummaryInner {
                loaded: HashMap::new(),
                tombstones: HashSet::new(),
                counts: SummaryCounts::default(),
                pending: ChangeInfo::new(),
                flushing: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicUsize::new(1),
        });
        let _ = summary.reload_counts();
        summary
    }

    /// Create a memory-only summary (virtual folders); save/load are no-ops
    /// against the database.
    pub fn new_memory(folder_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            store_db: None,
            folder_name: folder_name.into(),
            inner: Mutex::new(SummaryInner {
                loaded: HashMap::new(),
                tombstones: HashSet::new(),
                counts: SummaryCounts::default(),
                pending: ChangeInfo::new(),
                flushing: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicUsize::new(1),
        })
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    pub fn store_db(&self) -> Option<&Arc<StoreDb>> {
        self.store_db.as_ref()
    }

    // --- change signal plumbing ---

    pub fn add_change_listener(&self, listener: ChangeListener) -> usize {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    pub fn remove_change_listener(&self, id: usize) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    fn queue_change(&self, apply: impl FnOnce(&mut ChangeInfo)) {
        let mut inner = self.inner.lock().unwrap();
        apply(&mut inner.pending);
    }

    /// Deliver the coalesced pending changes. Listeners run without any
    /// summary lock held; changes queued by listeners are delivered by the
    /// same call, so emission never re-enters.
    pub fn flush_changes(&self) {
        loop {
            let batch = {
                let mut inner = self.inner.lock().unwrap();
                if inner.flushing || inner.pending.is_empty() {
                    return;
                }
                inner.flushing = true;
                std::mem::take(&mut inner.pending)
            };
            let listeners: Vec<ChangeListener> = self
                .listeners
                .lock()
                .unwrap()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect();
            for listener in &listeners {
                listener(&batch);
            }
            self.inner.lock().unwrap().flushing = false;
        }
    }

    /// True when changes are queued but not yet delivered.
    pub fn has_pending_changes(&self) -> bool {
        !self.inner.lock().unwrap().pending.is_empty()
    }

    // --- entry access ---

    /// O(1) lookup of an already-loaded entry; never touches disk.
    pub fn peek_loaded(&self, uid: &str) -> Option<MessageInfo> {
        self.inner.lock().unwrap().loaded.get(uid).cloned()
    }

    /// Loaded entry, or one loaded on demand from the database.
    pub fn get(self: &Arc<Self>, uid: &str) -> Option<MessageInfo> {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(info) = inner.loaded.get(uid) {
                return Some(info.clone());
            }
            if inner.tombstones.contains(uid) {
                return None;
            }
        }
        let store_db = self.store_db.as_ref()?;
        let record = store_db.read_message(&self.folder_name, uid).ok()?;
        let info = MessageInfo::from_record(record);
        info.attach(self);
        let mut inner = self.inner.lock().unwrap();
        // racing loader may have inserted meanwhile; keep the first
        Some(
            inner
                .loaded
                .entry(uid.to_string())
                .or_insert(info)
                .clone(),
        )
    }

    /// Insert an entry without touching disk; it is dirty until saved. An
    /// existing entry is replaced only with `force`.
    pub fn add(self: &Arc<Self>, info: MessageInfo, force: bool) {
        let uid = info.uid();
        info.attach(self);
        info.mark_dirty();
        let msg_flags = info.flags();
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.loaded.get(&uid) {
            if !force {
                return;
            }
            let old_flags = existing.flags();
            inner.counts.apply(old_flags, -1);
            inner.counts.apply(msg_flags, 1);
            inner.loaded.insert(uid.clone(), info);
            inner.pending.change_uid(&uid);
            return;
        }
        inner.tombstones.remove(&uid);
        inner.counts.apply(msg_flags, 1);
        inner.loaded.insert(uid.clone(), info);
        inner.pending.add_uid(&uid);
    }

    /// Flag lookup without materializing an entry when it is not loaded.
    pub fn get_info_flags(&self, uid: &str) -> Option<u32> {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(info) = inner.loaded.get(uid) {
                return Some(info.flags());
            }
            if inner.tombstones.contains(uid) {
                return None;
            }
        }
        let store_db = self.store_db.as_ref()?;
        store_db
            .read_message(&self.folder_name, uid)
            .ok()
            .map(|record| record.flags)
    }

    /// Evict an entry and queue its deletion for the next `save`.
    pub fn remove_uid(&self, uid: &str) {
        let mut inner = self.inner.lock().unwrap();
        let existed_loaded = inner.loaded.remove(uid);
        let in_db = self
            .store_db
            .as_ref()
            .map(|db| db.read_message(&self.folder_name, uid).is_ok())
            .unwrap_or(false);
        if existed_loaded.is_none() && !in_db {
            return;
        }
        let msg_flags = match &existed_loaded {
            Some(info) => info.flags(),
            None => self
                .store_db
                .as_ref()
                .and_then(|db| db.read_message(&self.folder_name, uid).ok())
                .map(|r| r.flags)
                .unwrap_or(0),
        };
        inner.counts.apply(msg_flags, -1);
        if in_db {
            inner.tombstones.insert(uid.to_string());
        }
        inner.pending.remove_uid(uid);
    }

    /// Evict everything, truncate the message table, zero the counters.
    pub fn clear(&self) -> Result<()> {
        let uids = self.dup_uids();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.loaded.clear();
            inner.tombstones.clear();
            inner.counts = SummaryCounts::default();
            for uid in &uids {
                inner.pending.remove_uid(uid);
            }
        }
        if let Some(store_db) = &self.store_db {
            store_db.clear_folder(&self.folder_name)?;
        }
        self.flush_changes();
        Ok(())
    }

    /// Drop a clean cache entry; a dirty entry stays. Used by stress tests
    /// and cache trimming.
    pub fn unload_uid(&self, uid: &str) {
        let mut inner = self.inner.lock().unwrap();
        let clean = inner
            .loaded
            .get(uid)
            .map(|info| !info.is_dirty())
            .unwrap_or(false);
        if clean {
            inner.loaded.remove(uid);
        }
    }

    /// All UIDs: database rows plus unsaved additions, minus tombstones.
    pub fn dup_uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        if let Some(store_db) = &self.store_db {
            let _ = store_db.read_messages(&self.folder_name, |record| {
                if seen.insert(record.uid.clone()) {
                    uids.push(record.uid.clone());
                }
                Ok(true)
            });
        }
        let inner = self.inner.lock().unwrap();
        for uid in inner.loaded.keys() {
            if seen.insert(uid.clone()) {
                uids.push(uid.clone());
            }
        }
        uids.retain(|uid| !inner.tombstones.contains(uid));
        uids
    }

    pub fn counts(&self) -> SummaryCounts {
        self.inner.lock().unwrap().counts
    }

    pub fn saved_count(&self) -> u32 {
        self.counts().saved
    }

    pub fn unread_count(&self) -> u32 {
        self.counts().unread
    }

    pub fn deleted_count(&self) -> u32 {
        self.counts().deleted
    }

    pub fn junk_count(&self) -> u32 {
        self.counts().junk
    }

    pub fn junk_not_deleted_count(&self) -> u32 {
        self.counts().junk_not_deleted
    }

    pub fn visible_count(&self) -> u32 {
        self.counts().visible
    }

    // --- persistence ---

    /// Flush dirty entries and tombstones in one transaction, refresh the
    /// folder's counter columns, then deliver pending change signals.
    pub fn save(&self) -> Result<()> {
        let Some(store_db) = &self.store_db else {
            self.flush_changes();
            return Ok(());
        };

        let (dirty, tombstones) = {
            let mut inner = self.inner.lock().unwrap();
            let dirty: Vec<MessageInfo> = inner
                .loaded
                .values()
                .filter(|info| info.is_dirty())
                .cloned()
                .collect();
            let tombstones: Vec<String> = inner.tombstones.drain().collect();
            (dirty, tombstones)
        };

        store_db.db().begin_transaction()?;
        let written: Result<()> = (|| {
            self.ensure_folder_record(store_db)?;
            for info in &dirty {
                let record = info.record();
                if record.uid.is_empty() {
                    warn!(folder = self.folder_name.as_str(), "skipping info without uid");
                    continue;
                }
                store_db.write_message(&self.folder_name, &record)?;
                // a mutation racing this write keeps the entry dirty
                info.clear_dirty_if(record.dirty);
            }
            if !tombstones.is_empty() {
                store_db.delete_messages(&self.folder_name, &tombstones)?;
            }
            let counts = self.inner.lock().unwrap().counts;
            store_db.db().exec_statement(&format!(
                "UPDATE folders SET saved_count={}, unread_count={}, deleted_count={}, \
                 junk_count={}, jnd_count={}, visible_count={} WHERE folder_name={}",
                counts.saved,
                counts.unread,
                counts.deleted,
                counts.junk,
                counts.junk_not_deleted,
                counts.visible,
                crate::db::quote_literal(&self.folder_name)
            ))?;
            Ok(())
        })();
        match written {
            Ok(()) => store_db.db().end_transaction()?,
            Err(err) => {
                let _ = store_db.db().abort_transaction();
                // deletions stay queued for the next save
                let mut inner = self.inner.lock().unwrap();
                for uid in tombstones {
                    inner.tombstones.insert(uid);
                }
                return Err(err);
            }
        }
        self.flush_changes();
        Ok(())
    }

    fn ensure_folder_record(&self, store_db: &StoreDb) -> Result<()> {
        if store_db.get_folder_id(&self.folder_name)? == 0 {
            let record = crate::storedb::FolderRecord {
                folder_name: self.folder_name.clone(),
                ..Default::default()
            };
            store_db.write_folder(&self.folder_name, &record)?;
        }
        Ok(())
    }

    /// Reconcile counters from the database.
    pub fn load(&self) -> Result<()> {
        self.reload_counts()
    }

    fn reload_counts(&self) -> Result<()> {
        let Some(store_db) = &self.store_db else {
            return Ok(());
        };
        if store_db.get_folder_id(&self.folder_name)? == 0 {
            return Ok(());
        }
        let counts = SummaryCounts {
            saved: store_db.count_messages(&self.folder_name, CountKind::Total)?,
            unread: store_db.count_messages(&self.folder_name, CountKind::Unread)?,
            deleted: store_db.count_messages(&self.folder_name, CountKind::Deleted)?,
            junk: store_db.count_messages(&self.folder_name, CountKind::Junk)?,
            junk_not_deleted: store_db
                .count_messages(&self.folder_name, CountKind::JunkNotDeleted)?,
            visible: store_db
                .count_messages(&self.folder_name, CountKind::NotJunkNotDeleted)?,
        };
        self.inner.lock().unwrap().counts = counts;
        Ok(())
    }

    /// Remove every DELETED message, persist, and report them removed.
    /// Returns the expunged UIDs.
    pub fn expunge_deleted(&self) -> Result<Vec<String>> {
        let mut expunged = Vec::new();
        for uid in self.dup_uids() {
            if let Some(msg_flags) = self.get_info_flags(&uid) {
                if msg_flags & flags::DELETED != 0 {
                    self.remove_uid(&uid);
                    expunged.push(uid);
                }
            }
        }
        self.save()?;
        Ok(expunged)
    }

    /// Counter adjustment driven by an info mutation.
    fn info_flags_changed(&self, uid: &str, old_flags: u32, new_flags: u32) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.counts.apply(old_flags, -1);
            inner.counts.apply(new_flags, 1);
        }
        self.queue_change(|pending| pending.change_uid(uid));
    }

    fn info_changed(&self, uid: &str) {
        self.queue_change(|pending| pending.change_uid(uid));
    }
}

impl std::fmt::Debug for FolderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderSummary")
            .field("folder", &self.folder_name)
            .field("counts", &self.counts())
            .finish()
    }
}

// --- message info ---

struct InfoState {
    record: MessageRecord,
    dirty: bool,
    headers: Option<Vec<(String, String)>>,
    extension: InfoExtension,
}

struct InfoCore {
    uid: String,
    state: Mutex<InfoState>,
    summary: Mutex<Weak<FolderSummary>>,
    /// Virtual-folder entries mirror mutations into their source info first.
    mirror: Mutex<Option<MessageInfo>>,
}

/// One summary row. Cloning shares the underlying entry; mutations serialize
/// on a per-info lock while reads take snapshots.
#[derive(Clone)]
pub struct MessageInfo {
    core: Arc<InfoCore>,
}

impl MessageInfo {
    pub fn new(uid: impl Into<String>) -> Self {
        let uid = uid.into();
        let record = MessageRecord { uid: uid.clone(), ..Default::default() };
        Self::from_record(record)
    }

    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            core: Arc::new(InfoCore {
                uid: record.uid.clone(),
                state: Mutex::new(InfoState {
                    record,
                    dirty: false,
                    headers: None,
                    extension: InfoExtension::None,
                }),
                summary: Mutex::new(Weak::new()),
                mirror: Mutex::new(None),
            }),
        }
    }

    /// Build an IMAP-flavored info: the server flag shadow is rebuilt from
    /// the record's `bdata` column, where it is persisted.
    pub fn from_record_imap(record: MessageRecord) -> Self {
        let info = Self::from_record(record);
        {
            let mut state = info.core.state.lock().unwrap();
            state.extension = InfoExtension::imap_from_bdata(&state.record.bdata);
        }
        info
    }

    fn attach(&self, summary: &Arc<FolderSummary>) {
        *self.core.summary.lock().unwrap() = Arc::downgrade(summary);
    }

    /// Designate the source entry this (virtual) info mirrors into.
    pub(crate) fn set_mirror(&self, source: MessageInfo) {
        *self.core.mirror.lock().unwrap() = Some(source);
    }

    pub(crate) fn mirror(&self) -> Option<MessageInfo> {
        self.core.mirror.lock().unwrap().clone()
    }

    pub fn uid(&self) -> String {
        self.core.uid.clone()
    }

    /// Snapshot of the persisted record, with the extension's persistent
    /// part folded into `bdata`.
    pub fn record(&self) -> MessageRecord {
        let state = self.core.state.lock().unwrap();
        let mut record = state.record.clone();
        if state.extension != InfoExtension::None {
            record.bdata = state.extension.to_bdata();
        }
        record
    }

    /// The protocol-specific extension data, if any.
    pub fn extension(&self) -> InfoExtension {
        self.core.state.lock().unwrap().extension.clone()
    }

    /// Server flag shadow of an IMAP info; None for base infos.
    pub fn server_flags(&self) -> Option<u32> {
        match &self.core.state.lock().unwrap().extension {
            InfoExtension::Imap(state) => Some(state.server_flags),
            InfoExtension::None => None,
        }
    }

    /// Update the IMAP server flag shadow; a base info becomes IMAP-flavored.
    /// Returns true when the value changed.
    pub fn set_server_flags(&self, server_flags: u32) -> bool {
        let mut state = self.core.state.lock().unwrap();
        match &mut state.extension {
            InfoExtension::Imap(imap) => {
                if imap.server_flags == server_flags {
                    return false;
                }
                imap.server_flags = server_flags;
            }
            extension @ InfoExtension::None => {
                *extension = InfoExtension::Imap(ImapInfoState {
                    server_flags,
                    ..Default::default()
                });
            }
        }
        state.dirty = true;
        state.record.dirty = state.record.dirty.wrapping_add(1);
        true
    }

    /// Replace the transient server keyword shadow of an IMAP info.
    pub fn set_server_user_flags(&self, user_flags: Vec<String>) {
        let mut state = self.core.state.lock().unwrap();
        match &mut state.extension {
            InfoExtension::Imap(imap) => imap.server_user_flags = user_flags,
            extension @ InfoExtension::None => {
                *extension = InfoExtension::Imap(ImapInfoState {
                    server_user_flags: user_flags,
                    ..Default::default()
                });
            }
        }
    }

    /// Replace the transient server annotation shadow of an IMAP info.
    pub fn set_server_user_tags(&self, user_tags: Vec<(String, String)>) {
        let mut state = self.core.state.lock().unwrap();
        match &mut state.extension {
            InfoExtension::Imap(imap) => imap.server_user_tags = user_tags,
            extension @ InfoExtension::None => {
                *extension = InfoExtension::Imap(ImapInfoState {
                    server_user_tags: user_tags,
                    ..Default::default()
                });
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.core.state.lock().unwrap().dirty
    }

    fn mark_dirty(&self) {
        let mut state = self.core.state.lock().unwrap();
        state.dirty = true;
        state.record.dirty = state.record.dirty.wrapping_add(1);
    }

    fn clear_dirty_if(&self, dirty_counter: u32) {
        let mut state = self.core.state.lock().unwrap();
        if state.record.dirty == dirty_counter {
            state.dirty = false;
        }
    }

    pub fn flags(&self) -> u32 {
        self.core.state.lock().unwrap().record.flags
    }

    /// Update `mask` bits to `values`. Returns true when anything changed.
    /// Mirrored into the source info first for virtual entries.
    pub fn set_flags(&self, mask: u32, values: u32) -> bool {
        if let Some(mirror) = self.mirror() {
            mirror.set_flags(mask, values);
        }
        let (old_flags, new_flags) = {
            let mut state = self.core.state.lock().unwrap();
            let old_flags = state.record.flags;
            let new_flags = (old_flags & !mask) | (values & mask);
            if new_flags == old_flags {
                return false;
            }
            state.record.flags = new_flags;
            state.dirty = true;
            state.record.dirty = state.record.dirty.wrapping_add(1);
            (old_flags, new_flags)
        };
        if let Some(summary) = self.core.summary.lock().unwrap().upgrade() {
            summary.info_flags_changed(&self.core.uid, old_flags, new_flags);
        }
        true
    }

    pub fn size(&self) -> u32 {
        self.core.state.lock().unwrap().record.size
    }

    pub fn set_size(&self, size: u32) {
        self.mutate(|record| record.size = size);
    }

    pub fn subject(&self) -> String {
        self.core.state.lock().unwrap().record.subject.clone()
    }

    pub fn set_subject(&self, subject: impl Into<String>) {
        let subject = subject.into();
        self.mutate(move |record| record.subject = subject);
    }

    pub fn labels(&self) -> String {
        self.core.state.lock().unwrap().record.labels.clone()
    }

    /// Add or remove a label word; mirrored for virtual entries.
    pub fn set_user_flag(&self, name: &str, set: bool) -> bool {
        if let Some(mirror) = self.mirror() {
            mirror.set_user_flag(name, set);
        }
        let changed = {
            let mut state = self.core.state.lock().unwrap();
            let mut words: Vec<&str> = state.record.labels.split_whitespace().collect();
            let present = words.iter().any(|w| *w == name);
            if set == present {
                false
            } else {
                if set {
                    words.push(name);
                } else {
                    words.retain(|w| *w != name);
                }
                state.record.labels = words.join(" ");
                state.dirty = true;
                state.record.dirty = state.record.dirty.wrapping_add(1);
                true
            }
        };
        if changed {
            if let Some(summary) = self.core.summary.lock().unwrap().upgrade() {
                summary.info_changed(&self.core.uid);
            }
        }
        changed
    }

    pub fn user_tag(&self, name: &str) -> Option<String> {
        let state = self.core.state.lock().unwrap();
        util::user_tag_value(&state.record.usertags, name)
    }

    /// Set (or with an empty value remove) a user tag; mirrored for virtual
    /// entries.
    pub fn set_user_tag(&self, name: &str, value: &str) -> bool {
        if let Some(mirror) = self.mirror() {
            mirror.set_user_tag(name, value);
        }
        let changed = {
            let mut state = self.core.state.lock().unwrap();
            let mut tags = util::parse_user_tags(&state.record.usertags);
            let existing = tags.iter().position(|(n, _)| n.eq_ignore_ascii_case(name));
            let changed = match (existing, value.is_empty()) {
                (Some(pos), true) => {
                    tags.remove(pos);
                    true
                }
                (Some(pos), false) => {
                    if tags[pos].1 == value {
                        false
                    } else {
                        tags[pos].1 = value.to_string();
                        true
                    }
                }
                (None, true) => false,
                (None, false) => {
                    tags.push((name.to_string(), value.to_string()));
                    true
                }
            };
            if changed {
                state.record.usertags = util::encode_user_tags(&tags);
                state.dirty = true;
                state.record.dirty = state.record.dirty.wrapping_add(1);
            }
            changed
        };
        if changed {
            if let Some(summary) = self.core.summary.lock().unwrap().upgrade() {
                summary.info_changed(&self.core.uid);
            }
        }
        changed
    }

    /// Headers cached on the info by the producing driver, when available.
    pub fn headers(&self) -> Option<Vec<(String, String)>> {
        self.core.state.lock().unwrap().headers.clone()
    }

    pub fn set_headers(&self, headers: Vec<(String, String)>) {
        self.core.state.lock().unwrap().headers = Some(headers);
    }

    fn mutate(&self, apply: impl FnOnce(&mut MessageRecord)) {
        {
            let mut state = self.core.state.lock().unwrap();
            apply(&mut state.record);
            state.dirty = true;
            state.record.dirty = state.record.dirty.wrapping_add(1);
        }
        if let Some(summary) = self.core.summary.lock().unwrap().upgrade() {
            summary.info_changed(&self.core.uid);
        }
    }
}

impl std::fmt::Debug for MessageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageInfo")
            .field("uid", &self.core.uid)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storedb::FolderRecord;

    fn open_summary() -> (tempfile::TempDir, Arc<StoreDb>, Arc<FolderSummary>) {
        let dir = tempfile::tempdir().unwrap();
        let store_db = Arc::new(StoreDb::new(dir.path().join("store.db"), None).unwrap());
        store_db
            .write_folder("f1", &FolderRecord { folder_name: "f1".into(), ..Default::default() })
            .unwrap();
        let summary = FolderSummary::new(Arc::clone(&store_db), "f1");
        (dir, store_db, summary)
    }

    fn add_info(summary: &Arc<FolderSummary>, uid: &str, subject: &str, msg_flags: u32) {
        let info = MessageInfo::new(uid);
        info.set_subject(subject);
        info.set_flags(!0, msg_flags);
        summary.add(info, true);
    }

    #[test]
    fn counts_track_additions_and_flags() {
        let (_dir, _db, summary) = open_summary();

        add_info(&summary, "1", "s1", 0);
        let counts = summary.counts();
        assert_eq!(counts.saved, 1);
        assert_eq!(counts.unread, 1);
        assert_eq!(counts.visible, 1);
        assert_eq!(counts.deleted, 0);
        assert_eq!(counts.junk, 0);

        summary.save().unwrap();
        summary.load().unwrap();
        assert_eq!(summary.saved_count(), 1);
        assert_eq!(summary.unread_count(), 1);
        assert_eq!(summary.visible_count(), 1);

        add_info(&summary, "2", "s2", flags::SEEN);
        assert_eq!(summary.saved_count(), 2);
        assert_eq!(summary.unread_count(), 1);
        assert_eq!(summary.visible_count(), 2);

        summary.save().unwrap();
        summary.load().unwrap();
        assert_eq!(summary.saved_count(), 2);
        assert_eq!(summary.unread_count(), 1);
        assert_eq!(summary.visible_count(), 2);
    }

    #[test]
    fn save_then_reload_roundtrips() {
        let (_dir, store_db, summary) = open_summary();
        add_info(&summary, "11", "hello", flags::SEEN);
        summary.save().unwrap();

        let record = store_db.read_message("f1", "11").unwrap();
        assert_eq!(record.subject, "hello");
        assert_eq!(record.flags, flags::SEEN);

        summary.unload_uid("11");
        assert!(summary.peek_loaded("11").is_none());
        let info = summary.get("11").unwrap();
        assert_eq!(info.uid(), "11");
        assert_eq!(info.subject(), "hello");
        assert!(summary.peek_loaded("11").is_some());
        assert_eq!(summary.get_info_flags("11"), Some(flags::SEEN));
    }

    #[test]
    fn remove_uid_persists_as_deletion() {
        let (_dir, store_db, summary) = open_summary();
        add_info(&summary, "11", "one", 0);
        add_info(&summary, "12", "two", 0);
        summary.save().unwrap();

        summary.remove_uid("11");
        assert!(summary.get("11").is_none());
        assert_eq!(summary.dup_uids(), ["12"]);
        // still in the database until saved
        assert!(store_db.read_message("f1", "11").is_ok());
        summary.save().unwrap();
        assert!(store_db.read_message("f1", "11").is_err());
        assert_eq!(summary.saved_count(), 1);
    }

    #[test]
    fn clear_truncates() {
        let (_dir, store_db, summary) = open_summary();
        add_info(&summary, "11", "one", 0);
        summary.save().unwrap();
        summary.clear().unwrap();
        assert_eq!(summary.counts(), SummaryCounts::default());
        assert!(summary.dup_uids().is_empty());
        assert_eq!(
            store_db.count_messages("f1", CountKind::Total).unwrap(),
            0
        );
    }

    #[test]
    fn change_signals_coalesce_per_flush() {
        let (_dir, _db, summary) = open_summary();
        let seen: Arc<Mutex<Vec<ChangeInfo>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        summary.add_change_listener(Arc::new(move |changes| {
            seen2.lock().unwrap().push(changes.clone());
        }));

        add_info(&summary, "11", "one", 0);
        add_info(&summary, "12", "two", 0);
        assert!(seen.lock().unwrap().is_empty());

        summary.flush_changes();
        let batches = seen.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        let mut added = batches[0].added.clone();
        added.sort();
        assert_eq!(added, ["11", "12"]);

        let info = summary.peek_loaded("11").unwrap();
        info.set_flags(flags::SEEN, flags::SEEN);
        summary.flush_changes();
        let batches = seen.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].changed, ["11"]);
    }

    #[test]
    fn imap_extension_persists_server_flags() {
        let (_dir, store_db, summary) = open_summary();

        let info = MessageInfo::new("11");
        info.set_server_flags(flags::SEEN | flags::ANSWERED);
        info.set_server_user_flags(vec!["$Phishing".into()]);
        summary.add(info, true);
        summary.save().unwrap();

        let record = store_db.read_message("f1", "11").unwrap();
        assert_eq!(record.bdata, (flags::SEEN | flags::ANSWERED).to_string());

        // reload through the IMAP constructor: the numeric shadow survives,
        // the transient lists do not
        let reloaded = MessageInfo::from_record_imap(record);
        assert_eq!(reloaded.server_flags(), Some(flags::SEEN | flags::ANSWERED));
        match reloaded.extension() {
            InfoExtension::Imap(state) => {
                assert!(state.server_user_flags.is_empty());
                assert!(state.server_user_tags.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        // base infos have no shadow
        assert_eq!(MessageInfo::new("x").server_flags(), None);
    }

    #[test]
    fn expunge_reports_removed() {
        let (_dir, _db, summary) = open_summary();
        add_info(&summary, "11", "one", 0);
        add_info(&summary, "12", "two", flags::DELETED);
        summary.save().unwrap();

        let removed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let removed2 = Arc::clone(&removed);
        summary.add_change_listener(Arc::new(move |changes| {
            removed2.lock().unwrap().extend(changes.removed.iter().cloned());
        }));

        let expunged = summary.expunge_deleted().unwrap();
        assert_eq!(expunged, ["12"]);
        assert_eq!(&*removed.lock().unwrap(), &["12".to_string()]);
        assert_eq!(summary.dup_uids(), ["11"]);
    }
}
