/*
 * mod.rs
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

//! vCard parsing, serialization (2.1, 3.0, 4.0) and lossless cross-version
//! conversion. Parsing is lazy: constructing from text stores the text only;
//! attributes materialize on first access.

mod consts;
mod convert;
mod parser;
mod write;

use base64::Engine as _;

pub use consts::*;

/// Supported wire versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcardVersion {
    V21,
    V30,
    V40,
}

impl VcardVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            VcardVersion::V21 => "2.1",
            VcardVersion::V30 => "3.0",
            VcardVersion::V40 => "4.0",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "2.1" => Some(VcardVersion::V21),
            "3.0" => Some(VcardVersion::V30),
            "4.0" => Some(VcardVersion::V40),
            _ => None,
        }
    }
}

/// How an attribute's values are stored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VcardEncoding {
    #[default]
    Raw,
    Base64,
    Qp,
}

/// A named parameter with an ordered list of values. Parameter names and
/// values compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcardParam {
    name: String,
    values: Vec<String>,
}

impl VcardParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), values: Vec::new() }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut param = Self::new(name);
        param.add_value(value);
        param
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Append a value, deduplicated case-insensitively.
    pub fn add_value(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !self.values.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
            self.values.push(value);
        }
    }
}

/// One vCard content line: optional group, name, parameters, values and the
/// transfer encoding of the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcardAttribute {
    group: Option<String>,
    name: String,
    params: Vec<VcardParam>,
    values: Vec<String>,
    encoding: VcardEncoding,
}

impl VcardAttribute {
    pub fn new(group: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            group: group.map(|g| g.to_string()),
            name: name.into(),
            params: Vec::new(),
            values: Vec::new(),
            encoding: VcardEncoding::Raw,
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// First value, if any.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(|v| v.as_str())
    }

    pub fn add_value(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }

    pub fn remove_values(&mut self) {
        self.values.clear();
    }

    pub fn is_single_valued(&self) -> bool {
        self.values.len() == 1
    }

    pub fn encoding(&self) -> VcardEncoding {
        self.encoding
    }

    pub(crate) fn set_encoding(&mut self, encoding: VcardEncoding) {
        self.encoding = encoding;
    }

    pub fn params(&self) -> &[VcardParam] {
        &self.params
    }

    /// Values of the named parameter; None when absent.
    pub fn param(&self, name: &str) -> Option<&[String]> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.values.as_slice())
    }

    /// Add a parameter; when one with the same name exists the values merge
    /// into it, deduplicated case-insensitively. The ENCODING parameter also
    /// updates the attribute's encoding tag.
    pub fn add_param(&mut self, param: VcardParam) {
        if param.name.eq_ignore_ascii_case("encoding") {
            if let Some(value) = param.values.first() {
                self.encoding = match value.to_ascii_lowercase().as_str() {
                    "b" | "base64" => VcardEncoding::Base64,
                    "quoted-printable" => VcardEncoding::Qp,
                    _ => VcardEncoding::Raw,
                };
            }
        }
        match self
            .params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&param.name))
        {
            Some(existing) => {
                for value in param.values {
                    existing.add_value(value);
                }
            }
            None => self.params.push(param),
        }
    }

    pub fn remove_param(&mut self, name: &str) {
        if name.eq_ignore_ascii_case("encoding") {
            self.encoding = VcardEncoding::Raw;
        }
        self.params.retain(|p| !p.name.eq_ignore_ascii_case(name));
    }

    pub fn remove_params(&mut self) {
        self.params.clear();
        self.encoding = VcardEncoding::Raw;
    }

    /// The first value decoded according to the attribute's encoding.
    pub fn value_decoded(&self) -> Option<Vec<u8>> {
        let value = self.value()?;
        match self.encoding {
            VcardEncoding::Raw => Some(value.as_bytes().to_vec()),
            VcardEncoding::Base64 => {
                let stripped: String =
                    value.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(stripped.as_bytes())
                    .ok()
            }
            VcardEncoding::Qp => Some(write::qp_decode(value).into_bytes()),
        }
    }
}

/// A vCard: an ordered list of attributes, lazily parsed from text.
#[derive(Debug, Clone, Default)]
pub struct Vcard {
    raw: Option<String>,
    attributes: Vec<VcardAttribute>,
    version_cache: Option<VcardVersion>,
}

impl Vcard {
    /// An empty, fully materialized vCard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `text` for lazy parsing; no attribute materializes until first
    /// access.
    pub fn from_string(text: impl Into<String>) -> Self {
        Self { raw: Some(text.into()), attributes: Vec::new(), version_cache: None }
    }

    /// Like `from_string`, with the UID known out of band so that
    /// `get_attribute("UID")` needs no parse.
    pub fn from_string_with_uid(text: impl Into<String>, uid: impl Into<String>) -> Self {
        let mut uid_attr = VcardAttribute::new(None, "UID");
        uid_attr.add_value(uid);
        Self {
            raw: Some(text.into()),
            attributes: vec![uid_attr],
            version_cache: None,
        }
    }

    /// Whether the attributes have been materialized.
    pub fn is_parsed(&self) -> bool {
        self.raw.is_none()
    }

    fn ensure_parsed(&mut self) {
        if let Some(raw) = self.raw.take() {
            // a pre-set UID survives; the parsed one is skipped then
            let ignore_uid = !self.attributes.is_empty();
            let mut parsed = parser::parse(&raw, ignore_uid);
            self.attributes.append(&mut parsed);
        }
    }

    /// The attributes in order, parsing on first access.
    pub fn attributes(&mut self) -> &[VcardAttribute] {
        self.ensure_parsed();
        &self.attributes
    }

    /// First attribute of the given name. `UID` resolves without forcing a
    /// parse when supplied at construction.
    pub fn get_attribute(&mut self, name: &str) -> Option<&VcardAttribute> {
        if !self.is_parsed() {
            // a UID supplied at construction resolves without parsing
            if let Some(position) = self
                .attributes
                .iter()
                .position(|a| a.name.eq_ignore_ascii_case(name))
            {
                return self.attributes.get(position);
            }
            self.ensure_parsed();
        }
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn add_attribute(&mut self, attribute: VcardAttribute) {
        self.ensure_parsed();
        if attribute.name.eq_ignore_ascii_case("version") {
            self.version_cache = None;
        }
        self.attributes.push(attribute);
    }

    pub fn add_attribute_with_value(
        &mut self,
        mut attribute: VcardAttribute,
        value: impl Into<String>,
    ) {
        attribute.add_value(value);
        self.add_attribute(attribute);
    }

    /// Remove the first attribute matching group and name.
    pub fn remove_attribute(&mut self, group: Option<&str>, name: &str) {
        self.ensure_parsed();
        if name.eq_ignore_ascii_case("version") {
            self.version_cache = None;
        }
        if let Some(position) = self.attributes.iter().position(|a| {
            a.name.eq_ignore_ascii_case(name)
                && match (group, a.group.as_deref()) {
                    (None, _) => true,
                    (Some(g), Some(ag)) => g.eq_ignore_ascii_case(ag),
                    (Some(_), None) => false,
                }
        }) {
            self.attributes.remove(position);
        }
    }

    /// Remove every attribute with the given name.
    pub fn remove_attributes(&mut self, name: &str) {
        self.ensure_parsed();
        if name.eq_ignore_ascii_case("version") {
            self.version_cache = None;
        }
        self.attributes.retain(|a| !a.name.eq_ignore_ascii_case(name));
    }

    /// The vCard's version: sniffed from the unparsed text when possible,
    /// else read from the VERSION attribute. None when a VERSION attribute
    /// carries an unknown value; a card without VERSION reports 4.0.
    pub fn version(&mut self) -> Option<VcardVersion> {
        if let Some(version) = self.version_cache {
            return Some(version);
        }
        if let Some(raw) = &self.raw {
            for (needle, version) in [
                ("VERSION:4.0", VcardVersion::V40),
                ("VERSION:3.0", VcardVersion::V30),
                ("VERSION:2.1", VcardVersion::V21),
            ] {
                let found = raw.lines().any(|line| line.trim().eq_ignore_ascii_case(needle));
                if found {
                    self.version_cache = Some(version);
                    return Some(version);
                }
            }
        }
        self.ensure_parsed();
        for attribute in &self.attributes {
            if attribute.group.is_none() && attribute.name.eq_ignore_ascii_case("version") {
                let version = attribute.value().and_then(VcardVersion::from_str);
                self.version_cache = version;
                return version;
            }
        }
        self.version_cache = Some(VcardVersion::V40);
        self.version_cache
    }

    /// Serialize in the given version, converting first when needed.
    pub fn to_string_version(&mut self, version: VcardVersion) -> String {
        match version {
            VcardVersion::V21 => {
                let mut converted = convert::convert(self, VcardVersion::V21);
                write::to_string_21(&mut converted)
            }
            VcardVersion::V30 => {
                let mut converted = convert::convert(self, VcardVersion::V30);
                write::to_string_generic(
                    &mut converted,
                    VcardVersion::V30,
                    VCARD_30_PROPERTIES,
                    VCARD_30_PARAMETERS,
                )
            }
            VcardVersion::V40 => {
                let mut converted = convert::convert(self, VcardVersion::V40);
                write::to_string_generic(
                    &mut converted,
                    VcardVersion::V40,
                    VCARD_40_PROPERTIES,
                    VCARD_40_PARAMETERS,
                )
            }
        }
    }

    /// Serialize in the card's own version (4.0 when unknown). Unparsed
    /// cards return their original text byte-exact.
    pub fn to_string(&mut self) -> String {
        if let Some(raw) = &self.raw {
            if self.attributes.is_empty() {
                return raw.clone();
            }
        }
        let version = self.version().unwrap_or(VcardVersion::V40);
        self.to_string_version(version)
    }

    /// A copy converted to `to_version`; converting to the card's own
    /// version yields a plain materialized copy.
    pub fn convert(&mut self, to_version: VcardVersion) -> Vcard {
        convert::convert(self, to_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_parse_and_uid_fast_path() {
        let text = "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:John Doe\r\nEND:VCARD";
        let mut card = Vcard::from_string_with_uid(text, "uid-1");
        assert!(!card.is_parsed());
        assert_eq!(card.get_attribute("UID").unwrap().value(), Some("uid-1"));
        assert!(!card.is_parsed());

        assert_eq!(card.get_attribute("FN").unwrap().value(), Some("John Doe"));
        assert!(card.is_parsed());
        // the supplied UID shadowed a parsed one
        let uids: Vec<_> = card
            .attributes()
            .iter()
            .filter(|a| a.name().eq_ignore_ascii_case("uid"))
            .collect();
        assert_eq!(uids.len(), 1);
    }

    #[test]
    fn version_sniffed_without_parsing() {
        let mut card =
            Vcard::from_string("BEGIN:VCARD\r\nVERSION:2.1\r\nN:Doe;John\r\nEND:VCARD");
        assert_eq!(card.version(), Some(VcardVersion::V21));
        assert!(!card.is_parsed());
    }

    #[test]
    fn version_cache_cleared_on_any_version_mutation() {
        let mut card = Vcard::new();
        let mut version = VcardAttribute::new(None, "VERSION");
        version.add_value("3.0");
        card.add_attribute(version);
        assert_eq!(card.version(), Some(VcardVersion::V30));

        // adding a second VERSION must invalidate the cache too
        let mut version = VcardAttribute::new(None, "VERSION");
        version.add_value("4.0");
        card.remove_attributes("VERSION");
        card.add_attribute(version);
        assert_eq!(card.version(), Some(VcardVersion::V40));

        card.remove_attributes("VERSION");
        assert_eq!(card.version(), Some(VcardVersion::V40));
    }

    #[test]
    fn param_merge_deduplicates() {
        let mut attr = VcardAttribute::new(None, "TEL");
        attr.add_param(VcardParam::with_value("TYPE", "HOME"));
        attr.add_param(VcardParam::with_value("type", "home"));
        attr.add_param(VcardParam::with_value("TYPE", "VOICE"));
        assert_eq!(attr.params().len(), 1);
        assert_eq!(attr.param("type").unwrap(), &["HOME", "VOICE"]);
    }

    #[test]
    fn encoding_tag_follows_encoding_param() {
        let mut attr = VcardAttribute::new(None, "PHOTO");
        attr.add_param(VcardParam::with_value("ENCODING", "b"));
        assert_eq!(attr.encoding(), VcardEncoding::Base64);
        attr.add_value("aGVsbG8=");
        assert_eq!(attr.value_decoded().unwrap(), b"hello");

        attr.remove_param("ENCODING");
        assert_eq!(attr.encoding(), VcardEncoding::Raw);
    }
}
