/*
 * folder.rs
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

//! Folder trait: the surface the core requires from every message container,
//! real or virtual. All operations block; change notification goes through
//! the folder's summary.

use std::sync::Arc;

use crate::cancellable::Cancellable;
use crate::error::Result;
use crate::store::message::MimeMessage;
use crate::store::store::Store;
use crate::summary::{FolderSummary, MessageInfo};

/// A container of messages identified by a path-like name within a store.
pub trait Folder: Send + Sync {
    /// Stable path-like name within the parent store.
    fn full_name(&self) -> &str;

    /// The store owning this folder.
    fn parent_store(&self) -> Arc<dyn Store>;

    /// The folder's summary; at most one per folder.
    fn summary(&self) -> &Arc<FolderSummary>;

    /// All message UIDs currently in the folder.
    fn dup_uids(&self) -> Vec<String> {
        self.summary().dup_uids()
    }

    /// Cached-or-loaded info for one message; None when unknown.
    fn get_message_info(&self, uid: &str) -> Option<MessageInfo> {
        self.summary().get(uid)
    }

    /// Fetch the full message. Implementations may download on demand.
    fn get_message_sync(
        &self,
        uid: &str,
        cancellable: Option<&Cancellable>,
    ) -> Result<MimeMessage>;

    /// UIDs of messages whose named header contains all of `words`.
    /// Implementations without a header index may return every UID; the
    /// search engine re-checks candidates itself.
    fn search_header_sync(&self, header_name: &str, words: &[String]) -> Result<Vec<String>> {
        let _ = (header_name, words);
        Ok(self.dup_uids())
    }

    /// UIDs of messages whose body contains all of `words`. Implementations
    /// may synthesize this by downloading messages.
    fn search_body_sync(&self, words: &[String]) -> Result<Vec<String>>;

    /// Flush pending state; with `expunge`, physically drop DELETED messages
    /// and report them removed through the summary's `changed` signal.
    fn synchronize_sync(&self, expunge: bool, cancellable: Option<&Cancellable>) -> Result<()>;
}
