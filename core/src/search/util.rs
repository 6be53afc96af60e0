/*
 * util.rs
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

//! Search helpers shared between the SQL functions and the in-process
//! evaluator: message-ID hashing, the `part` column codec, user-tag decoding,
//! word matching, soundex, date handling and subject normalization.

use chrono::DateTime;
use md5::{Digest, Md5};

/// Iterate the alphanumeric words of a header value.
pub fn split_words(value: &str) -> impl Iterator<Item = &str> {
    value.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

/// True when every whitespace-separated word of `words` appears as a whole
/// word in `value`, case-insensitively.
pub fn header_has_words(value: &str, words: &str) -> bool {
    words.split_whitespace().all(|needle| {
        split_words(value).any(|word| word.eq_ignore_case(needle))
    })
}

trait EqIgnoreCase {
    fn eq_ignore_case(&self, other: &str) -> bool;
}

impl EqIgnoreCase for &str {
    fn eq_ignore_case(&self, other: &str) -> bool {
        self.to_lowercase() == other.to_lowercase()
    }
}

/// `header-matches` semantics: the whole trimmed value equals the needle
/// case-insensitively, or any `<addr-spec>` inside it does.
pub fn header_value_matches(value: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if value.trim().eq_ignore_case(needle) {
        return true;
    }
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let tail = &rest[open + 1..];
        match tail.find('>') {
            Some(close) => {
                if tail[..close].trim().eq_ignore_case(needle) {
                    return true;
                }
                rest = &tail[close + 1..];
            }
            None => break,
        }
    }
    false
}

/// Simplified soundex: first letter plus up to three consonant-class digits,
/// vowels dropped before collapsing repeats.
pub fn soundex(word: &str) -> String {
    let mut out = String::with_capacity(4);
    let mut last_code = 0u8;
    for ch in word.chars() {
        let lower = ch.to_ascii_lowercase();
        if !lower.is_ascii_alphabetic() {
            continue;
        }
        let code = match lower {
            'b' | 'f' | 'p' | 'v' => b'1',
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => b'2',
            'd' | 't' => b'3',
            'l' => b'4',
            'm' | 'n' => b'5',
            'r' => b'6',
            _ => 0,
        };
        if out.is_empty() {
            out.push(lower.to_ascii_uppercase());
            last_code = code;
            continue;
        }
        if code == 0 {
            continue;
        }
        if code != last_code {
            if out.len() >= 4 {
                break;
            }
            out.push(code as char);
        }
        last_code = code;
    }
    while !out.is_empty() && out.len() < 4 {
        out.push('0');
    }
    out
}

/// Decode the count-prefixed `usertags` serialization:
/// `N len-name len-value ...` where values may contain spaces.
pub fn parse_user_tags(serialized: &str) -> Vec<(String, String)> {
    let mut tags = Vec::new();
    let text = serialized.trim_start();
    let Some(space) = text.find(' ').or(if text.is_empty() { None } else { Some(text.len()) })
    else {
        return tags;
    };
    let Ok(count) = text[..space.min(text.len())].parse::<usize>() else {
        return tags;
    };
    let mut rest = text.get(space..).unwrap_or("");

    let mut read_token = |rest: &mut &str| -> Option<String> {
        let trimmed = rest.trim_start();
        let dash = trimmed.find('-')?;
        let len: usize = trimmed[..dash].parse().ok()?;
        let data_start = dash + 1;
        let token = trimmed.get(data_start..data_start + len)?;
        let out = token.to_string();
        *rest = &trimmed[data_start + len..];
        Some(out)
    };

    for _ in 0..count {
        let Some(name) = read_token(&mut rest) else { break };
        let Some(value) = read_token(&mut rest) else { break };
        tags.push((name, value));
    }
    tags
}

/// Value of user tag `name`, or None when absent. The legacy "label" tag
/// falls back to the first word of the labels column when asked through
/// `user_tag_value_with_labels`.
pub fn user_tag_value(serialized: &str, name: &str) -> Option<String> {
    parse_user_tags(serialized)
        .into_iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Like `user_tag_value`, with the legacy fallback: the "label" tag reads
/// the first word of the labels column when no tag of that name exists.
pub fn user_tag_with_labels(serialized: &str, labels: &str, name: &str) -> Option<String> {
    match user_tag_value(serialized, name) {
        Some(value) => Some(value),
        None if name.eq_ignore_ascii_case("label") => {
            labels.split_whitespace().next().map(|word| word.to_string())
        }
        None => None,
    }
}

/// Serialize user tags back into the count-prefixed form.
pub fn encode_user_tags(tags: &[(String, String)]) -> String {
    let mut out = tags.len().to_string();
    for (name, value) in tags {
        out.push_str(&format!(" {}-{} {}-{}", name.len(), name, value.len(), value));
    }
    out
}

/// Parse an RFC-2822 date (or raw epoch seconds) into epoch seconds;
/// 0 when unparsable.
pub fn make_time(value: &str) -> i64 {
    let value = value.trim();
    if value.is_empty() {
        return 0;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return dt.timestamp();
    }
    value.parse::<i64>().unwrap_or(0)
}

/// Compare two timestamps quantized to whole days: -1, 0 or +1.
pub fn compare_date(a: i64, b: i64) -> i64 {
    let day_a = a.div_euclid(86_400);
    let day_b = b.div_euclid(86_400);
    match day_a.cmp(&day_b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// Fold an RFC-2822 message-ID into a 64-bit hash: the local part keeps its
/// case, the host part is folded, and the first eight bytes of the MD5
/// digest are taken big-endian.
pub fn hash_message_id(message_id: &str) -> u64 {
    let trimmed = message_id.trim();
    let inner = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);
    let normalized = match inner.rfind('@') {
        Some(at) => {
            let (local, host) = inner.split_at(at);
            format!("{}{}", local, host.to_lowercase())
        }
        None => inner.to_string(),
    };
    let digest = Md5::digest(normalized.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("md5 digest is 16 bytes"))
}

pub fn msgid_split(id: u64) -> (u32, u32) {
    ((id >> 32) as u32, id as u32)
}

pub fn msgid_join(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// First `hi lo` pair of a `part` column value.
pub fn part_first_msgid(part: &str) -> Option<(u32, u32)> {
    let mut tokens = part.split_whitespace();
    let hi = tokens.next()?.parse().ok()?;
    let lo = tokens.next()?.parse().ok()?;
    Some((hi, lo))
}

/// Decode a `part` column value into (message id, referenced ids).
pub fn part_decode(part: &str) -> Option<(u64, Vec<u64>)> {
    let mut tokens = part.split_whitespace();
    let hi: u32 = tokens.next()?.parse().ok()?;
    let lo: u32 = tokens.next()?.parse().ok()?;
    let count: usize = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    let mut references = Vec::with_capacity(count);
    for _ in 0..count {
        let rhi: u32 = tokens.next()?.parse().ok()?;
        let rlo: u32 = tokens.next()?.parse().ok()?;
        references.push(msgid_join(rhi, rlo));
    }
    Some((msgid_join(hi, lo), references))
}

/// Encode a message id and its references into the `part` column form.
pub fn part_encode(id: u64, references: &[u64]) -> String {
    let (hi, lo) = msgid_split(id);
    let mut out = format!("{} {} {}", hi, lo, references.len());
    for reference in references {
        let (rhi, rlo) = msgid_split(*reference);
        out.push_str(&format!(" {} {}", rhi, rlo));
    }
    out
}

/// Strip reply/forward prefixes ("Re:", "Re[2]:", "Fw:", "Fwd:") and
/// surrounding whitespace from a subject for thread linkage.
pub fn normalize_subject(subject: &str) -> &str {
    let mut rest = subject.trim();
    loop {
        let lower = rest.to_lowercase();
        let prefix_len = ["re", "fwd", "fw"].iter().find_map(|prefix| {
            let tail = lower.strip_prefix(prefix)?;
            let mut consumed = prefix.len();
            let mut chars = tail.chars().peekable();
            if chars.peek() == Some(&'[') {
                let close = tail.find(']')?;
                if !tail[1..close].chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                consumed += close + 1;
                chars = tail[close + 1..].chars().peekable();
            }
            if chars.peek() == Some(&':') {
                consumed += 1;
                Some(consumed)
            } else {
                None
            }
        });
        match prefix_len {
            Some(len) => rest = rest[len..].trim_start(),
            None => break,
        }
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_has_words() {
        assert!(header_has_words("Different Subject Message", "message different"));
        assert!(header_has_words("Different Subject Message", "subject message different"));
        assert!(!header_has_words("Different Subject Message", "esag different"));
        assert!(header_has_words("Message 11", "messagE"));
    }

    #[test]
    fn matches_full_or_address() {
        assert!(header_value_matches("Subject 13", "subJECt 13"));
        assert!(header_value_matches("Gwendoline <gwen@no.where>", "gwen@no.where"));
        assert!(!header_value_matches("loki@no.where", "loki"));
        assert!(header_value_matches(
            "Tony <tony@no.where>, Peeeter <peter@no.where>",
            "peter@no.where"
        ));
    }

    #[test]
    fn soundex_collapses_after_vowel_removal() {
        assert_eq!(soundex("mase"), soundex("Message"));
        assert_ne!(soundex("mase"), soundex("Subject"));
    }

    #[test]
    fn user_tags_roundtrip() {
        let tags = parse_user_tags(
            "3 9-follow-up 9-Follow-Up 6-due-by 31-Thu, 15 May 2025 11:35:00 +0000 12-completed-on 0-",
        );
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], ("follow-up".into(), "Follow-Up".into()));
        assert_eq!(tags[1].1, "Thu, 15 May 2025 11:35:00 +0000");
        assert_eq!(tags[2], ("completed-on".into(), "".into()));

        assert_eq!(user_tag_value("1 3-nm1 2-12", "nm1").as_deref(), Some("12"));
        assert_eq!(user_tag_value("1 3-nm1 2-12", "other"), None);
        assert_eq!(user_tag_value("0", "any"), None);

        let encoded = encode_user_tags(&tags);
        assert_eq!(parse_user_tags(&encoded), tags);
    }

    #[test]
    fn time_and_dates() {
        let t = make_time("Thu, 15 May 2025 11:35:00 +0000");
        assert_eq!(t, 1_747_308_900);
        assert_eq!(make_time("not a date"), 0);
        assert_eq!(make_time("12345"), 12_345);

        assert_eq!(compare_date(t, t + 3600), 0);
        assert_eq!(compare_date(t, t + 86_400), -1);
        assert_eq!(compare_date(t + 86_400, t), 1);
    }

    #[test]
    fn message_id_hash_host_case_insensitive() {
        assert_eq!(hash_message_id("<a@b>"), hash_message_id("<a@B>"));
        assert_ne!(hash_message_id("<a@b>"), hash_message_id("<A@b>"));
        assert_ne!(hash_message_id("<123>"), hash_message_id("<456>"));
    }

    #[test]
    fn part_codec() {
        let id = msgid_join(1, 3);
        let refs = [msgid_join(9, 9), msgid_join(1, 2)];
        let encoded = part_encode(id, &refs);
        assert_eq!(encoded, "1 3 2 9 9 1 2");
        let (decoded_id, decoded_refs) = part_decode(&encoded).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded_refs, refs);

        assert_eq!(part_first_msgid("12 34 0"), Some((12, 34)));
        assert_eq!(part_decode("garbage"), None);
    }

    #[test]
    fn subject_normalization() {
        assert_eq!(normalize_subject("Re: reply to nonexistent 88"), "reply to nonexistent 88");
        assert_eq!(normalize_subject("RE[2]:  Fwd: hello"), "hello");
        assert_eq!(normalize_subject("Regards"), "Regards");
        assert_eq!(normalize_subject("  plain "), "plain");
    }
}
