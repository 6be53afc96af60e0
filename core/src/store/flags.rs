/*
 * flags.rs
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

//! System message flags, stored as a 32-bit set in the message record.

pub const ANSWERED: u32 = 1 << 0;
pub const DELETED: u32 = 1 << 1;
pub const DRAFT: u32 = 1 << 2;
pub const FLAGGED: u32 = 1 << 3;
pub const SEEN: u32 = 1 << 4;
pub const ATTACHMENTS: u32 = 1 << 5;
pub const ANSWERED_ALL: u32 = 1 << 6;
pub const JUNK: u32 = 1 << 7;
pub const SECURE: u32 = 1 << 8;
pub const NOTJUNK: u32 = 1 << 9;
pub const FORWARDED: u32 = 1 << 10;

/// Set on an info whose flags changed but are not yet saved; never persisted
/// into the flags column.
pub const FOLDER_FLAGGED: u32 = 1 << 16;

/// Mask of the flags that are persisted and mirrored between folders.
pub const SYSTEM_MASK: u32 = ANSWERED
    | DELETED
    | DRAFT
    | FLAGGED
    | SEEN
    | ATTACHMENTS
    | ANSWERED_ALL
    | JUNK
    | SECURE
    | NOTJUNK
    | FORWARDED;

/// Resolve a `(system-flag "...")` keyword; unknown names yield 0.
pub fn from_name(name: &str) -> u32 {
    match name.to_ascii_lowercase().as_str() {
        "answered" => ANSWERED,
        "deleted" => DELETED,
        "draft" => DRAFT,
        "flagged" | "important" => FLAGGED,
        "seen" | "read" => SEEN,
        "attachments" | "attachment" => ATTACHMENTS,
        "answeredall" | "answered-all" => ANSWERED_ALL,
        "junk" => JUNK,
        "secure" => SECURE,
        "notjunk" | "not-junk" => NOTJUNK,
        "forwarded" => FORWARDED,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(from_name("Seen"), SEEN);
        assert_eq!(from_name("DELETED"), DELETED);
        assert_eq!(from_name("not-junk"), NOTJUNK);
        assert_eq!(from_name("bogus"), 0);
    }

    #[test]
    fn folder_flagged_outside_system_mask() {
        assert_eq!(SYSTEM_MASK & FOLDER_FLAGGED, 0);
    }
}
