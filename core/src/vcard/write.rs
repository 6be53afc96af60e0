/*
 * write.rs
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

//! vCard serializers. Output is byte-exact per version: CRLF line endings,
//! 75-column folding with one leading space on continuations, and a trailing
//! `END:VCARD` without CRLF.

use super::consts::{is_allowed, VCARD_21_PARAMETERS, VCARD_21_PROPERTIES};
use super::{Vcard, VcardEncoding, VcardVersion};

const CRLF: &str = "\r\n";

/// Quoted-printable encode with optional 75-column soft wrapping.
pub(super) fn qp_encode(text: &str, can_wrap: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut count = 0usize;
    for &byte in text.as_bytes() {
        let plain = (33..=60).contains(&byte) || (62..=126).contains(&byte);
        if plain {
            if can_wrap && count == 75 {
                out.push_str("=");
                out.push_str(CRLF);
                out.push(' ');
                count = 1;
            }
            out.push(byte as char);
            count += 1;
        } else {
            if can_wrap && count >= 73 {
                out.push_str("=");
                out.push_str(CRLF);
                out.push(' ');
                count = 1;
            }
            out.push_str(&format!("={:02X}", byte));
            count += 3;
        }
    }
    out
}

/// Quoted-printable decode, honoring soft line breaks.
pub(super) fn qp_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'=' && matches!(bytes.get(i + 1), Some(b'\r') | Some(b'\n')) {
            i += 2;
            if bytes.get(i) == Some(&b'\n') {
                i += 1;
            }
            continue;
        }
        if c == b'=' && i + 2 < bytes.len() + 1 {
            if let (Some(&a), Some(&b)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                let hex = |x: u8| match x.to_ascii_uppercase() {
                    d @ b'0'..=b'9' => Some(d - b'0'),
                    d @ b'A'..=b'F' => Some(d - b'A' + 10),
                    _ => None,
                };
                match (hex(a), hex(b)) {
                    (Some(high), Some(low)) => {
                        out.push((high << 4) | low);
                        i += 3;
                        continue;
                    }
                    _ => {
                        out.push(b'=');
                        out.push(a);
                        out.push(b);
                        i += 3;
                        continue;
                    }
                }
            }
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// RFC-2426 value escaping.
pub(super) fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => {}
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

fn escape_semicolons(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == ';' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Fold a content line at 75 characters with CRLF + space continuations.
fn fold_line(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= 75 {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + 8);
    let mut start = 0usize;
    let mut limit = 75usize;
    while start < chars.len() {
        let end = (start + limit).min(chars.len());
        out.extend(&chars[start..end]);
        if end < chars.len() {
            out.push_str(CRLF);
            out.push(' ');
        }
        start = end;
        limit = 74;
    }
    out
}

/// The vCard 2.1 emitter: allow-listed properties only, empty attributes
/// omitted, quoted-printable applied when a value embeds a newline.
pub(super) fn to_string_21(card: &mut Vcard) -> String {
    let mut out = String::new();
    out.push_str("BEGIN:VCARD");
    out.push_str(CRLF);
    out.push_str("VERSION:2.1");
    out.push_str(CRLF);

    for attribute in card.attributes() {
        if attribute.name().eq_ignore_ascii_case("version") {
            continue;
        }
        if !is_allowed(attribute.name(), VCARD_21_PROPERTIES) {
            continue;
        }
        let empty = attribute.values().iter().all(|v| v.is_empty());
        if empty {
            continue;
        }
        let encode = attribute.values().iter().any(|v| v.contains('\n'));

        let mut line = String::new();
        if let Some(group) = attribute.group() {
            line.push_str(group);
            line.push('.');
        }
        line.push_str(attribute.name());

        for param in attribute.params() {
            if !is_allowed(param.name(), VCARD_21_PARAMETERS) {
                continue;
            }
            line.push(';');
            line.push_str(param.name());
            for (position, value) in param.values().iter().enumerate() {
                if position > 0 {
                    line.push(';');
                    line.push_str(param.name());
                }
                line.push('=');
                line.push_str(&escape_semicolons(value));
            }
        }
        if encode {
            line.push_str(";ENCODING=QUOTED-PRINTABLE");
        }
        line.push(':');

        for (position, value) in attribute.values().iter().enumerate() {
            if position > 0 {
                line.push(';');
            }
            if encode {
                line.push_str(&qp_encode(value, true));
            } else {
                line.push_str(value);
            }
        }

        out.push_str(&line);
        out.push_str(CRLF);
    }

    out.push_str("END:VCARD");
    out
}

/// The shared 3.0/4.0 emitter: RFC escaping, comma-joined parameter values
/// with quoting, quoted-printable decoded before writing, 75-column folding.
pub(super) fn to_string_generic(
    card: &mut Vcard,
    version: VcardVersion,
    valid_properties: &[&str],
    valid_parameters: &[&str],
) -> String {
    let mut out = String::new();
    out.push_str("BEGIN:VCARD");
    out.push_str(CRLF);
    out.push_str("VERSION:");
    out.push_str(version.as_str());
    out.push_str(CRLF);

    for attribute in card.attributes() {
        if attribute.name().eq_ignore_ascii_case("version") {
            continue;
        }
        if !is_allowed(attribute.name(), valid_properties) {
            continue;
        }

        let is_qp = attribute.encoding() == VcardEncoding::Qp;
        let is_categories = attribute.name().eq_ignore_ascii_case("categories");

        let mut line = String::new();
        if let Some(group) = attribute.group() {
            line.push_str(group);
            line.push('.');
        }
        line.push_str(attribute.name());

        for param in attribute.params() {
            // quoted-printable was eliminated after 2.1; the value is
            // decoded below and the parameter dropped
            if is_qp && param.name().eq_ignore_ascii_case("encoding") {
                continue;
            }
            if !is_allowed(param.name(), valid_parameters) {
                continue;
            }
            line.push(';');
            line.push_str(param.name());
            if param.values().is_empty() {
                continue;
            }
            line.push('=');
            for (position, value) in param.values().iter().enumerate() {
                if position > 0 {
                    line.push(',');
                }
                let needs_quotes = value.chars().any(|ch| !ch.is_alphanumeric());
                if needs_quotes {
                    line.push('"');
                    line.push_str(&escape_value(value));
                    line.push('"');
                } else {
                    line.push_str(value);
                }
            }
        }
        line.push(':');

        for (position, value) in attribute.values().iter().enumerate() {
            if position > 0 {
                line.push(if is_categories { ',' } else { ';' });
            }
            let decoded;
            let value = if is_qp {
                decoded = qp_decode(value);
                &decoded
            } else {
                value
            };
            line.push_str(&escape_value(value));
        }

        out.push_str(&fold_line(&line));
        out.push_str(CRLF);
    }

    out.push_str("END:VCARD");
    out
}
