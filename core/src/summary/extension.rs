/*
 * extension.rs
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

//! Per-protocol message-info extensions. A sealed enum instead of open
//! subclassing: the base info plus the IMAP variant, which shadows the
//! server-side flag state so a sync can diff local edits against it. The
//! numeric server flags persist in the record's `bdata` column; server user
//! flags and tags are session state and reset on load.

/// Protocol-specific extra fields of a `MessageInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoExtension {
    None,
    Imap(ImapInfoState),
}

impl Default for InfoExtension {
    fn default() -> Self {
        InfoExtension::None
    }
}

/// Server-side shadows kept by the IMAP driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImapInfoState {
    /// System flags as last reported by the server.
    pub server_flags: u32,
    /// Server-side keywords; not persisted.
    pub server_user_flags: Vec<String>,
    /// Server-side annotations; not persisted.
    pub server_user_tags: Vec<(String, String)>,
}

impl InfoExtension {
    /// Serialize the persistent part into the `bdata` column value.
    pub(crate) fn to_bdata(&self) -> String {
        match self {
            InfoExtension::None => String::new(),
            InfoExtension::Imap(state) => state.server_flags.to_string(),
        }
    }

    /// Rebuild the IMAP extension from a `bdata` column value; the transient
    /// server lists start empty.
    pub(crate) fn imap_from_bdata(bdata: &str) -> Self {
        let server_flags = bdata
            .split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
        InfoExtension::Imap(ImapInfoState {
            server_flags,
            server_user_flags: Vec::new(),
            server_user_tags: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdata_roundtrip_keeps_server_flags_only() {
        let extension = InfoExtension::Imap(ImapInfoState {
            server_flags: 0b10110,
            server_user_flags: vec!["$Phishing".into()],
            server_user_tags: vec![("k".into(), "v".into())],
        });
        let bdata = extension.to_bdata();
        assert_eq!(bdata, "22");

        match InfoExtension::imap_from_bdata(&bdata) {
            InfoExtension::Imap(state) => {
                assert_eq!(state.server_flags, 22);
                assert!(state.server_user_flags.is_empty());
                assert!(state.server_user_tags.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn base_infos_write_empty_bdata() {
        assert_eq!(InfoExtension::None.to_bdata(), "");
        match InfoExtension::imap_from_bdata("") {
            InfoExtension::Imap(state) => assert_eq!(state.server_flags, 0),
            other => panic!("unexpected {:?}", other),
        }
    }
}
