/*
 * consts.rs
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

//! Permitted properties and parameters per vCard version. Names starting
//! with `X-` are always allowed alongside these.

pub const VCARD_21_PROPERTIES: &[&str] = &[
    "ADR", "AGENT", "BDAY", "EMAIL", "FN", "GEO", "KEY", "LABEL", "LOGO", "MAILER",
    "N", "NOTE", "ORG", "PHOTO", "REV", "ROLE", "SOUND", "TEL", "TITLE", "TZ",
    "UID", "URL", "VERSION",
];

pub const VCARD_21_PARAMETERS: &[&str] = &["CHARSET", "ENCODING", "LANGUAGE", "TYPE", "VALUE"];

pub const VCARD_30_PROPERTIES: &[&str] = &[
    "ADR", "AGENT", "BDAY", "CATEGORIES", "CLASS", "EMAIL", "FN", "GEO", "KEY",
    "LABEL", "LOGO", "MAILER", "N", "NAME", "NICKNAME", "NOTE", "ORG", "PHOTO",
    "PRODID", "PROFILE", "REV", "ROLE", "SORT-STRING", "SOUND", "SOURCE", "TEL",
    "TITLE", "TZ", "UID", "URL", "VERSION",
];

pub const VCARD_30_PARAMETERS: &[&str] = &["CONTEXT", "ENCODING", "LANGUAGE", "TYPE", "VALUE"];

pub const VCARD_40_PROPERTIES: &[&str] = &[
    "ADR", "ANNIVERSARY", "BDAY", "BIRTHPLACE", "CALADRURI", "CALURI", "CATEGORIES",
    "CLIENTPIDMAP", "CONTACT-URI", "CREATED", "DEATHDATE", "DEATHPLACE", "EMAIL",
    "EXPERTISE", "FBURL", "FN", "GENDER", "GEO", "GRAMGENDER", "HOBBY", "IMPP",
    "INTEREST", "KEY", "KIND", "LANG", "LOGO", "MEMBER", "N", "NICKNAME", "NOTE",
    "ORG", "ORG-DIRECTORY", "PHOTO", "PRODID", "PRONOUNS", "RELATED", "REV", "ROLE",
    "SOCIALPROFILE", "SOUND", "SOURCE", "TEL", "TITLE", "TZ", "UID", "URL",
    "VERSION", "XML",
];

pub const VCARD_40_PARAMETERS: &[&str] = &[
    "ALTID", "CALSCALE", "GEO", "LABEL", "LANGUAGE", "MEDIATYPE", "PID", "PREF",
    "SORT-AS", "TYPE", "TZ", "VALUE",
];

/// Whether `name` is permitted by `allowed` (or is an X- extension).
pub(crate) fn is_allowed(name: &str, allowed: &[&str]) -> bool {
    if name.len() >= 2 && name[..2].eq_ignore_ascii_case("x-") {
        return true;
    }
    allowed.iter().any(|a| a.eq_ignore_ascii_case(name))
}

/// Attributes whose value never splits on `;`.
pub(crate) fn is_single_value_type(name: &str) -> bool {
    ["KEY", "LOGO", "PHOTO", "SOUND", "TZ"]
        .iter()
        .any(|a| a.eq_ignore_ascii_case(name))
}
