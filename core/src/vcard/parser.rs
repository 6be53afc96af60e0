/*
 * parser.rs
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

//! Tolerant line-based vCard parser. This is not a validator: malformed
//! input is repaired silently and the worst outcome is an empty card.
//! Handles CR, LF and CR-LF endings, RFC-2425 folding and quoted-printable
//! soft line breaks.

use super::consts::is_single_value_type;
use super::{VcardAttribute, VcardEncoding, VcardParam};

/// Parse `text` into attributes. BEGIN/END markers are consumed when present
/// and tolerated when missing; with `ignore_uid` any UID attribute of the
/// input is skipped (it was supplied out of band).
pub(super) fn parse(text: &str, ignore_uid: bool) -> Vec<VcardAttribute> {
    let mut attributes = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0usize;
    let mut first = true;

    while pos < bytes.len() {
        let Some(attribute) = read_attribute(bytes, &mut pos) else {
            continue;
        };
        let name = attribute.name().to_ascii_lowercase();
        if name == "begin" && first {
            first = false;
            continue;
        }
        first = false;
        if name == "end" {
            break;
        }
        if ignore_uid && name == "uid" {
            continue;
        }
        attributes.push(attribute);
    }

    attributes
}

/// Skip a line break (plus folding whitespace) at `pos`, honoring
/// quoted-printable soft breaks (`=` before the line end).
fn skip_newline(bytes: &[u8], pos: usize, quoted_printable: bool) -> usize {
    let mut p = pos;
    if quoted_printable && bytes.get(p) == Some(&b'=') {
        let next = bytes.get(p + 1).copied();
        if next == Some(b'\r') || next == Some(b'\n') {
            p += 2;
            if let Some(&second) = bytes.get(p) {
                if (second == b'\r' || second == b'\n') && Some(second) != next {
                    p += 1;
                    if matches!(bytes.get(p), Some(b' ' | b'\t')) {
                        p += 1;
                    }
                }
            }
            return p;
        }
        return pos;
    }
    if matches!(bytes.get(p), Some(b'\r' | b'\n')) {
        let first = bytes[p];
        let next = bytes.get(p + 1).copied();
        if (next == Some(b'\r') || next == Some(b'\n')) && next != Some(first) {
            if matches!(bytes.get(p + 2), Some(b' ' | b'\t')) {
                return p + 3;
            }
        } else if matches!(next, Some(b' ' | b'\t')) {
            return p + 2;
        }
    }
    pos
}

fn at_line_end(bytes: &[u8], pos: usize) -> bool {
    matches!(bytes.get(pos), None | Some(b'\r') | Some(b'\n'))
}

fn skip_to_next_line(bytes: &[u8], pos: &mut usize) {
    while !at_line_end(bytes, *pos) {
        *pos += 1;
    }
    while matches!(bytes.get(*pos), Some(b'\r' | b'\n')) {
        *pos += 1;
    }
}

fn lossy(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read one attribute, leaving `pos` at the start of the next line. None for
/// lines that carry nothing usable.
fn read_attribute(bytes: &[u8], pos: &mut usize) -> Option<VcardAttribute> {
    let mut group: Option<String> = None;
    let mut name: Option<String> = None;
    let mut buf: Vec<u8> = Vec::new();

    // group and name
    let mut p = skip_newline(bytes, *pos, false);
    loop {
        if at_line_end(bytes, p) {
            break;
        }
        let c = bytes[p];
        match c {
            b':' | b';' => {
                if buf.is_empty() {
                    // a (group.)?[:;] line carries no name
                    *pos = p;
                    skip_to_next_line(bytes, pos);
                    return None;
                }
                name = Some(lossy(std::mem::take(&mut buf)));
                break;
            }
            b'.' => {
                if !buf.is_empty() {
                    group = Some(lossy(std::mem::take(&mut buf)));
                }
                p += 1;
            }
            b'-' | b'_' => {
                buf.push(c);
                p += 1;
            }
            c if c.is_ascii_alphanumeric() => {
                buf.push(c);
                p += 1;
            }
            _ => {
                // junk inside the name; drop the whole line
                *pos = p;
                skip_to_next_line(bytes, pos);
                return None;
            }
        }
        p = skip_newline(bytes, p, false);
    }

    let name = match name {
        Some(name) => name,
        None => {
            *pos = p;
            skip_to_next_line(bytes, pos);
            return None;
        }
    };

    let mut attribute = VcardAttribute::new(group.as_deref(), name);
    let mut quoted_printable = false;
    let mut charset: Option<String> = None;

    if bytes.get(p) == Some(&b';') {
        p += 1;
        read_params(bytes, &mut p, &mut attribute, &mut quoted_printable, &mut charset);
    }
    if bytes.get(p) == Some(&b':') {
        p += 1;
        read_value(bytes, &mut p, &mut attribute, quoted_printable, charset.as_deref());
    } else {
        skip_to_next_line(bytes, &mut p);
    }

    *pos = p;

    if attribute.values().is_empty() {
        return None;
    }
    Some(attribute)
}

/// Parameter list: `NAME=VALUE(,VALUE)*` pairs or bare legacy values, with
/// quoting and escapes in quoted values. Consumes up to and including the
/// terminating ':'.
fn read_params(
    bytes: &[u8],
    pos: &mut usize,
    attribute: &mut VcardAttribute,
    quoted_printable: &mut bool,
    charset: &mut Option<String>,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut param: Option<VcardParam> = None;
    let mut in_quote = false;
    let mut p = skip_newline(bytes, *pos, *quoted_printable);

    let consume_param =
        |attribute: &mut VcardAttribute,
         param: VcardParam,
         quoted_printable: &mut bool,
         charset: &mut Option<String>| {
            let first = param.values().first().map(|v| v.as_str()).unwrap_or("");
            if param.name().eq_ignore_ascii_case("encoding")
                && first.eq_ignore_ascii_case("quoted-printable")
            {
                *quoted_printable = true;
            } else if param.name().eq_ignore_ascii_case("charset")
                && !first.eq_ignore_ascii_case("utf-8")
            {
                *charset = Some(first.to_string());
            } else {
                attribute.add_param(param);
            }
        };

    while !at_line_end(bytes, p) {
        let c = bytes[p];
        if c == b'"' {
            in_quote = !in_quote;
            p += 1;
        } else if in_quote || c == b'-' || c == b'_' || c.is_ascii_alphanumeric() {
            if in_quote && c == b'\\' {
                p = skip_newline(bytes, p + 1, *quoted_printable);
                match bytes.get(p) {
                    Some(b'n') | Some(b'N') => buf.push(b'\n'),
                    Some(b'r') | Some(b'R') => buf.push(b'\r'),
                    Some(b';') => buf.push(b';'),
                    Some(b',') => buf.push(b','),
                    Some(b'\\') => buf.push(b'\\'),
                    Some(&other) => {
                        buf.push(b'\\');
                        buf.push(other);
                    }
                    None => buf.push(b'\\'),
                }
                if !at_line_end(bytes, p) {
                    p += 1;
                }
            } else {
                buf.push(c);
                p += 1;
            }
        } else if c == b'=' {
            if !buf.is_empty() {
                param = Some(VcardParam::new(lossy(std::mem::take(&mut buf))));
                p += 1;
            } else {
                // = with no name; resync at the next delimiter
                while !at_line_end(bytes, p) && bytes[p] != b':' && bytes[p] != b';' {
                    p += 1;
                }
                match bytes.get(p) {
                    Some(b';') => p += 1,
                    Some(b':') => {}
                    _ => {
                        skip_to_next_line(bytes, &mut p);
                        *pos = p;
                        return;
                    }
                }
            }
        } else if c == b';' || c == b':' || c == b',' {
            let colon = c == b':';
            let comma = c == b',';
            match param.take() {
                Some(mut current) => {
                    if !buf.is_empty() {
                        current.add_value(lossy(std::mem::take(&mut buf)));
                    }
                    if comma {
                        // more values of the same parameter follow
                        param = Some(current);
                        p += 1;
                        continue;
                    }
                    if current.values().is_empty() {
                        // PARAM= with nothing; drop it
                    } else {
                        consume_param(attribute, current, quoted_printable, charset);
                    }
                    if !colon {
                        p += 1;
                    }
                }
                None => {
                    if !buf.is_empty() {
                        let value = lossy(std::mem::take(&mut buf));
                        // bare legacy parameter values
                        let bare = if value.eq_ignore_ascii_case("quoted-printable") {
                            *quoted_printable = true;
                            None
                        } else if value.eq_ignore_ascii_case("base64") {
                            Some(VcardParam::with_value("ENCODING", "b"))
                        } else {
                            Some(VcardParam::with_value("TYPE", value))
                        };
                        if let Some(bare) = bare {
                            consume_param(attribute, bare, quoted_printable, charset);
                        }
                    }
                    if !colon {
                        p += 1;
                    }
                }
            }
            if colon {
                break;
            }
        } else if param.is_some() {
            // SAFE-CHAR parameter value
            buf.push(c);
            p += 1;
        } else {
            // invalid character in a parameter spec; resync
            buf.clear();
            while !at_line_end(bytes, p) && bytes[p] != b':' && bytes[p] != b';' {
                p += 1;
            }
        }
        p = skip_newline(bytes, p, *quoted_printable);
    }

    *pos = p;
}

/// Attribute value list, with unescaping, QP decoding and the per-type value
/// splitting rules. Consumes the rest of the logical line.
fn read_value(
    bytes: &[u8],
    pos: &mut usize,
    attribute: &mut VcardAttribute,
    quoted_printable: bool,
    charset: Option<&str>,
) {
    let single_value = is_single_value_type(attribute.name());
    let is_categories = attribute.name().eq_ignore_ascii_case("categories");

    let mut buf: Vec<u8> = Vec::new();
    let mut p = skip_newline(bytes, *pos, quoted_printable);

    while !at_line_end(bytes, p) {
        let c = bytes[p];
        if quoted_printable && c == b'=' {
            p += 1;
            p = skip_newline(bytes, p, quoted_printable);
            let Some(&a) = bytes.get(p) else { break };
            p += 1;
            p = skip_newline(bytes, p, quoted_printable);
            let Some(&b) = bytes.get(p) else {
                buf.push(b'=');
                buf.push(a);
                break;
            };
            p += 1;
            let (high, low) = (hex_value(a), hex_value(b));
            match (high, low) {
                (Some(high), Some(low)) => buf.push((high << 4) | low),
                _ => {
                    buf.push(b'=');
                    buf.push(a);
                    buf.push(b);
                }
            }
        } else if c == b'\\' {
            p += 1;
            if at_line_end(bytes, p) && bytes.get(p).is_none() {
                buf.push(b'\\');
                break;
            }
            p = skip_newline(bytes, p, quoted_printable);
            match bytes.get(p) {
                Some(b'n') | Some(b'N') => buf.push(b'\n'),
                Some(b'r') | Some(b'R') => buf.push(b'\r'),
                Some(b';') => buf.push(b';'),
                Some(b',') => buf.push(b','),
                Some(b'\\') => buf.push(b'\\'),
                Some(&other) => {
                    // unknown escape passes through with the backslash
                    buf.push(b'\\');
                    buf.push(other);
                }
                None => {
                    buf.push(b'\\');
                    break;
                }
            }
            p += 1;
        } else if (c == b';' && !single_value) || (c == b',' && is_categories) {
            attribute.add_value(decode_charset(std::mem::take(&mut buf), charset));
            p += 1;
        } else {
            buf.push(c);
            p += 1;
        }
        p = skip_newline(bytes, p, quoted_printable);
    }

    attribute.add_value(decode_charset(buf, charset));

    skip_to_next_line(bytes, &mut p);
    *pos = p;
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Charset conversion is a black-box service; without one, non-UTF-8 input
/// degrades to a lossy decode.
fn decode_charset(buf: Vec<u8>, _charset: Option<&str>) -> String {
    lossy(buf)
}
