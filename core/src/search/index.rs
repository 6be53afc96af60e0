/*
 * index.rs
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

//! Search result / match indexes: sets of (store, folder id, uid) triples,
//! addressable from expressions through a process-unique token, with the
//! match-threads expansion applied over a thread tree.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::thread::{ThreadFlags, ThreadTree, Threadable};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// How a `match-threads` search expands its raw matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchThreadsKind {
    None,
    /// Only matches whose thread has no other messages.
    Single,
    /// Every message of any thread containing a match.
    All,
    /// Matches and their descendants.
    Replies,
    /// Matches, their descendants and their ancestors.
    RepliesAndParents,
}

impl MatchThreadsKind {
    /// Parse the MODE string of `(match-threads MODE ...)`: a comma list of
    /// an optional `no-subject` and a kind keyword.
    pub fn parse_mode(mode: &str) -> (MatchThreadsKind, ThreadFlags) {
        let mut kind = MatchThreadsKind::None;
        let mut subject = true;
        for token in mode.split(',') {
            match token.trim().to_ascii_lowercase().as_str() {
                "no-subject" => subject = false,
                "single" => kind = MatchThreadsKind::Single,
                "all" => kind = MatchThreadsKind::All,
                "replies" => kind = MatchThreadsKind::Replies,
                "replies_parents" => kind = MatchThreadsKind::RepliesAndParents,
                _ => {}
            }
        }
        if kind == MatchThreadsKind::None {
            return (kind, ThreadFlags::NONE);
        }
        (kind, ThreadFlags { subject, sort: false })
    }
}

/// One thread candidate handed to `apply_match_threads`: the message's
/// location plus the minimal columns the thread builder needs.
#[derive(Debug, Clone)]
pub struct MatchThreadsItem {
    pub store_uid: String,
    pub folder_id: u32,
    pub uid: String,
    pub subject: String,
    pub message_id: u64,
    pub references: Vec<u64>,
    pub dsent: i64,
    pub dreceived: i64,
}

impl Threadable for MatchThreadsItem {
    fn subject(&self) -> &str {
        &self.subject
    }
    fn message_id(&self) -> u64 {
        self.message_id
    }
    fn references(&self) -> &[u64] {
        &self.references
    }
    fn date_sent(&self) -> i64 {
        self.dsent
    }
    fn date_received(&self) -> i64 {
        self.dreceived
    }
}

type Entry = (String, u32, String);

/// A set of (store uid, folder id, uid) triples. Used both as the result
/// index of a search and as an explicit operand of `(in-match-index "...")`.
pub struct SearchIndex {
    token: u64,
    entries: Mutex<HashSet<Entry>>,
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchIndex {
    pub fn new() -> Self {
        Self {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            entries: Mutex::new(HashSet::new()),
        }
    }

    /// Process-unique handle referenced by `(in-match-index "<token>")`.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn add(&self, store_uid: &str, folder_id: u32, uid: &str) {
        self.entries.lock().unwrap().insert((
            store_uid.to_string(),
            folder_id,
            uid.to_string(),
        ));
    }

    /// Remove one entry; true when it was present.
    pub fn remove(&self, store_uid: &str, folder_id: u32, uid: &str) -> bool {
        self.entries.lock().unwrap().remove(&(
            store_uid.to_string(),
            folder_id,
            uid.to_string(),
        ))
    }

    pub fn contains(&self, store_uid: &str, folder_id: u32, uid: &str) -> bool {
        self.entries.lock().unwrap().contains(&(
            store_uid.to_string(),
            folder_id,
            uid.to_string(),
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every entry of `other` into this index. Draining an index into
    /// itself is a no-op.
    pub fn move_from_existing(&self, other: &SearchIndex) {
        if std::ptr::eq(self, other) {
            return;
        }
        let drained: Vec<Entry> = other.entries.lock().unwrap().drain().collect();
        self.entries.lock().unwrap().extend(drained);
    }

    /// Snapshot of the entries, for installing results into a search.
    pub(crate) fn snapshot(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub(crate) fn replace(&self, entries: HashSet<Entry>) {
        *self.entries.lock().unwrap() = entries;
    }

    /// Expand the indexed matches over the thread forest of `items` according
    /// to `kind`. Entries for messages outside `items` are kept untouched
    /// only when they cannot participate in any thread (they are dropped,
    /// matching the original engine which rebuilt the set from the tree).
    pub fn apply_match_threads(
        &self,
        items: &[MatchThreadsItem],
        kind: MatchThreadsKind,
        thread_flags: ThreadFlags,
    ) {
        if kind == MatchThreadsKind::None {
            return;
        }
        let tree = ThreadTree::build(items, thread_flags);

        let matched: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| self.contains(&item.store_uid, item.folder_id, &item.uid))
            .map(|(index, _)| index)
            .collect();

        let mut expanded: HashSet<usize> = HashSet::new();
        for &index in &matched {
            let Some(node) = tree.node_of_item(index) else {
                expanded.insert(index);
                continue;
            };
            match kind {
                MatchThreadsKind::None => unreachable!(),
                MatchThreadsKind::Single => {
                    if node.thread_item_count() == 1 {
                        expanded.insert(index);
                    }
                }
                MatchThreadsKind::All => {
                    let mut thread_items = Vec::new();
                    node.root().subtree_items(&mut thread_items);
                    expanded.extend(thread_items);
                }
                MatchThreadsKind::Replies => {
                    let mut subtree = Vec::new();
                    node.subtree_items(&mut subtree);
                    expanded.extend(subtree);
                }
                MatchThreadsKind::RepliesAndParents => {
                    let mut members = Vec::new();
                    node.subtree_items(&mut members);
                    node.ancestor_items(&mut members);
                    expanded.extend(members);
                }
            }
        }

        let entries: HashSet<Entry> = expanded
            .into_iter()
            .map(|index| {
                let item = &items[index];
                (item.store_uid.clone(), item.folder_id, item.uid.clone())
            })
            .collect();
        self.replace(entries);
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("token", &self.token)
            .field("len", &self.len())
            .finish()
    }
}
