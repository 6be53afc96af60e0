/*
 * store.rs
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

//! Store and Session traits plus `LocalStore`, the concrete database-backed
//! store protocol drivers register their folders with.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cancellable::Cancellable;
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::storedb::StoreDb;
use crate::store::folder::Folder;

/// An account-scoped collection of folders sharing one database file.
pub trait Store: Send + Sync {
    /// Stable identifier of the store within the process.
    fn uid(&self) -> &str;

    /// The store's summary database.
    fn store_db(&self) -> &Arc<StoreDb>;

    /// The session providing external services, when available.
    fn session(&self) -> Option<Arc<dyn Session>>;

    /// Look up an opened folder by its full name.
    fn get_folder(&self, name: &str) -> Result<Arc<dyn Folder>>;
}

/// External services provided by the surrounding application.
pub trait Session: Send + Sync {
    /// Whether the address book `book_uid` contains `email`.
    fn addressbook_contains_sync(&self, book_uid: &str, email: &str) -> bool;
}

/// Database-backed store; folders are produced elsewhere (protocol drivers)
/// and registered here so searches and virtual folders can resolve them.
pub struct LocalStore {
    uid: String,
    db: Arc<StoreDb>,
    session: Option<Arc<dyn Session>>,
    folders: Mutex<HashMap<String, Arc<dyn Folder>>>,
}

impl LocalStore {
    /// Open the store database named by `config`, migrating when needed.
    pub fn open(
        config: &Config,
        session: Option<Arc<dyn Session>>,
        cancellable: Option<&Cancellable>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = StoreDb::new(config.db_filename(), cancellable)?;
        Ok(Arc::new(Self {
            uid: config.store_uid.clone(),
            db: Arc::new(db),
            session,
            folders: Mutex::new(HashMap::new()),
        }))
    }

    /// Make a folder resolvable through `get_folder`.
    pub fn register_folder(&self, folder: Arc<dyn Folder>) {
        self.folders
            .lock()
            .unwrap()
            .insert(folder.full_name().to_string(), folder);
    }

    pub fn unregister_folder(&self, name: &str) {
        self.folders.lock().unwrap().remove(name);
    }
}

impl Store for LocalStore {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn store_db(&self) -> &Arc<StoreDb> {
        &self.db
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        self.session.clone()
    }

    fn get_folder(&self, name: &str) -> Result<Arc<dyn Folder>> {
        self.folders
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("no folder '{}'", name)))
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").field("uid", &self.uid).finish()
    }
}
