/*
 * lib.rs
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

//! Core backend for schedario: a persistent message-summary store over
//! SQLite, an s-expression search engine with virtual folders, and a vCard
//! codec for the contact side.

pub mod cancellable;
pub mod config;
pub mod db;
pub mod error;
pub mod search;
pub mod store;
pub mod storedb;
pub mod summary;
pub mod thread;
pub mod vcard;
pub mod vee;

pub use cancellable::Cancellable;
pub use config::Config;
pub use db::Db;
pub use error::{ErrorKind, Result, StoreError};
pub use search::{MatchThreadsItem, MatchThreadsKind, SearchIndex, SearchItem, StoreSearch};
pub use store::{flags, ChangeInfo, Folder, LocalStore, MimeMessage, Session, Store};
pub use storedb::{CountKind, FolderRecord, MessageRecord, StoreDb};
pub use summary::{FolderSummary, ImapInfoState, InfoExtension, MessageInfo, SummaryCounts};
pub use thread::{ThreadFlags, ThreadTree, Threadable};
pub use vcard::{Vcard, VcardAttribute, VcardEncoding, VcardParam, VcardVersion};
pub use vee::{vuid_prefix, VeeFolder, VeeOpFlags};
