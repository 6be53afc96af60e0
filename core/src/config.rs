/*
 * config.rs
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

//! Per-store configuration. There is no process-global state: every store is
//! opened from an explicit `Config`, which can be loaded from and saved to a
//! JSON file kept next to the database.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Configuration handed to `LocalStore::open` and `VeeFolder::new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the store's database file.
    pub data_dir: PathBuf,
    /// Stable identifier of the store; seeds the virtual-folder UID prefix.
    pub store_uid: String,
    /// Whether virtual folders rebuild automatically when sources change.
    #[serde(default = "default_true")]
    pub vfolder_auto_update: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>, store_uid: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            store_uid: store_uid.into(),
            vfolder_auto_update: true,
        }
    }

    /// Path of the store database file inside `data_dir`.
    pub fn db_filename(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.store_uid))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| StoreError::parse(err.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|err| StoreError::io(err.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }
}
