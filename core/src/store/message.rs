/*
 * message.rs
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

//! Message content holder and folder change sets.

/// A fetched message as the core consumes it: ordered headers plus a
/// plain-text body. MIME decoding is the protocol driver's business.
#[derive(Debug, Clone, Default)]
pub struct MimeMessage {
    headers: Vec<(String, String)>,
    body: String,
}

impl MimeMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// First header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }
}

/// Sets of UIDs delivered with a folder's `changed` signal. Successive
/// changes within one propagation turn coalesce into a single instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeInfo {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn add_uid(&mut self, uid: &str) {
        if let Some(pos) = self.removed.iter().position(|u| u == uid) {
            // re-added within the same turn: listeners saw it before, so it changed
            self.removed.remove(pos);
            if !self.changed.iter().any(|u| u == uid) {
                self.changed.push(uid.to_string());
            }
            return;
        }
        if !self.added.iter().any(|u| u == uid) && !self.changed.iter().any(|u| u == uid) {
            self.added.push(uid.to_string());
        }
    }

    pub fn change_uid(&mut self, uid: &str) {
        if self.added.iter().any(|u| u == uid)
            || self.removed.iter().any(|u| u == uid)
            || self.changed.iter().any(|u| u == uid)
        {
            return;
        }
        self.changed.push(uid.to_string());
    }

    pub fn remove_uid(&mut self, uid: &str) {
        if let Some(pos) = self.added.iter().position(|u| u == uid) {
            // added and removed in one turn cancels out
            self.added.remove(pos);
            return;
        }
        if let Some(pos) = self.changed.iter().position(|u| u == uid) {
            self.changed.remove(pos);
        }
        if !self.removed.iter().any(|u| u == uid) {
            self.removed.push(uid.to_string());
        }
    }

    /// Fold another change set into this one, in order.
    pub fn merge(&mut self, other: &ChangeInfo) {
        for uid in &other.removed {
            self.remove_uid(uid);
        }
        for uid in &other.added {
            self.add_uid(uid);
        }
        for uid in &other.changed {
            self.change_uid(uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut msg = MimeMessage::new();
        msg.add_header("Subject", "hello");
        msg.add_header("X-Custom-Header", "value");
        assert_eq!(msg.header("subject"), Some("hello"));
        assert_eq!(msg.header("x-custom-header"), Some("value"));
        assert_eq!(msg.header("received"), None);
    }

    #[test]
    fn change_info_coalesces() {
        let mut info = ChangeInfo::new();
        info.add_uid("1");
        info.add_uid("1");
        info.change_uid("1");
        assert_eq!(info.added, ["1"]);
        assert!(info.changed.is_empty());

        info.remove_uid("1");
        assert!(info.is_empty());

        info.change_uid("2");
        info.remove_uid("2");
        assert_eq!(info.removed, ["2"]);
        assert!(info.changed.is_empty());

        info.add_uid("2");
        assert!(info.removed.is_empty());
        assert_eq!(info.changed, ["2"]);
    }
}
