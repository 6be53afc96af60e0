/*
 * convert.rs
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

//! Bidirectional vCard version conversion: property/parameter renames, IMPP
//! scheme mapping, ADR/LABEL shuffling, KIND:group markers, date reshaping,
//! inline data vs `data:` URIs and encoding normalization. 2.1 to 4.0 chains
//! through 3.0 and back.

use base64::Engine as _;

use super::consts::{
    is_allowed, VCARD_21_PARAMETERS, VCARD_21_PROPERTIES, VCARD_30_PARAMETERS,
    VCARD_30_PROPERTIES, VCARD_40_PARAMETERS, VCARD_40_PROPERTIES,
};
use super::{write, Vcard, VcardAttribute, VcardEncoding, VcardParam, VcardVersion};

/// Property and parameter names that gained a bare 4.0 spelling; in 3.0 they
/// carry the X-EVOLUTION- prefix (with two historical exceptions).
const RENAMES_30_40: &[(&str, &str)] = &[
    // properties
    ("X-EVOLUTION-ANNIVERSARY", "ANNIVERSARY"),
    ("X-EVOLUTION-SOCIALPROFILE", "SOCIALPROFILE"),
    ("X-EVOLUTION-SOURCE", "SOURCE"),
    ("X-EVOLUTION-KIND", "KIND"),
    ("X-EVOLUTION-XML", "XML"),
    ("X-EVOLUTION-GENDER", "GENDER"),
    ("X-EVOLUTION-IMPP", "IMPP"),
    ("X-EVOLUTION-LANG", "LANG"),
    ("X-EVOLUTION-MEMBER", "MEMBER"),
    ("X-EVOLUTION-RELATED", "RELATED"),
    ("X-EVOLUTION-CLIENTPIDMAP", "CLIENTPIDMAP"),
    ("X-EVOLUTION-CALADRURI", "CALADRURI"),
    ("X-EVOLUTION-BIRTHPLACE", "BIRTHPLACE"),
    ("X-EVOLUTION-DEATHPLACE", "DEATHPLACE"),
    ("X-EVOLUTION-DEATHDATE", "DEATHDATE"),
    ("X-EVOLUTION-EXPERTISE", "EXPERTISE"),
    ("X-EVOLUTION-HOBBY", "HOBBY"),
    ("X-EVOLUTION-INTEREST", "INTEREST"),
    ("X-EVOLUTION-ORG-DIRECTORY", "ORG-DIRECTORY"),
    ("X-EVOLUTION-CONTACT-URI", "CONTACT-URI"),
    ("X-EVOLUTION-CREATED", "CREATED"),
    ("X-EVOLUTION-GRAMGENDER", "GRAMGENDER"),
    ("X-EVOLUTION-PRONOUNS", "PRONOUNS"),
    // parameters
    ("X-EVOLUTION-LANGUAGE", "LANGUAGE"),
    ("X-EVOLUTION-PREF", "PREF"),
    ("X-EVOLUTION-ALTID", "ALTID"),
    ("X-EVOLUTION-PID", "PID"),
    ("X-EVOLUTION-MEDIATYPE", "MEDIATYPE"),
    ("X-EVOLUTION-CALSCALE", "CALSCALE"),
    ("X-EVOLUTION-SORT-AS", "SORT-AS"),
];

/// Legacy instant-messaging attributes and their 4.0 IMPP URI schemes.
const IMPP_SCHEMES: &[(&str, &str)] = &[
    ("X-AIM", "aim:"),
    ("X-GADUGADU", "gadugadu:"),
    ("X-GOOGLE-TALK", "googletalk:"),
    ("X-GROUPWISE", "groupwise:"),
    ("X-ICQ", "icq:"),
    ("X-JABBER", "jabber:"),
    ("X-MATRIX", "matrix:"),
    ("X-MSN", "msn:"),
    ("X-SKYPE", "skype:"),
    ("X-TWITTER", "twitter:"),
    ("X-YAHOO", "yahoo:"),
];

fn rename_for(name: &str, to_version: VcardVersion) -> Option<&'static str> {
    RENAMES_30_40.iter().find_map(|(in_30, in_40)| match to_version {
        VcardVersion::V40 if in_30.eq_ignore_ascii_case(name) => Some(*in_40),
        VcardVersion::V30 if in_40.eq_ignore_ascii_case(name) => Some(*in_30),
        _ => None,
    })
}

fn impp_scheme_for_attr(name: &str) -> Option<&'static str> {
    IMPP_SCHEMES
        .iter()
        .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
        .map(|(_, scheme)| *scheme)
}

fn attr_for_impp_scheme(scheme: &str) -> Option<&'static str> {
    IMPP_SCHEMES
        .iter()
        .find(|(_, s)| s.eq_ignore_ascii_case(scheme))
        .map(|(attr, _)| *attr)
}

fn is_date_attr(name: &str) -> bool {
    ["X-EVOLUTION-ANNIVERSARY", "ANNIVERSARY", "BDAY", "DEATHDATE"]
        .iter()
        .any(|a| a.eq_ignore_ascii_case(name))
}

/// Reshape dates between YYYY-MM-DD (2.1/3.0) and YYYYMMDD (4.0).
fn convert_date_value(attribute: &mut VcardAttribute, to_version: VcardVersion) {
    let Some(value) = attribute.value().map(|v| v.to_string()) else {
        return;
    };
    let bytes = value.as_bytes();
    if to_version == VcardVersion::V40 {
        if bytes.len() == 10 && bytes[4] == b'-' && bytes[7] == b'-' {
            let compact = format!("{}{}{}", &value[..4], &value[5..7], &value[8..10]);
            attribute.remove_values();
            attribute.add_value(compact);
        }
    } else if bytes.len() == 8 && bytes.iter().all(|b| b.is_ascii_digit()) {
        let dashed = format!("{}-{}-{}", &value[..4], &value[4..6], &value[6..8]);
        attribute.remove_values();
        attribute.add_value(dashed);
    }
}

fn decode_qp_values(attribute: &mut VcardAttribute) {
    if attribute.encoding() != VcardEncoding::Qp {
        return;
    }
    let decoded: Vec<String> = attribute
        .values()
        .iter()
        .map(|value| write::qp_decode(value))
        .collect();
    attribute.remove_param("ENCODING");
    attribute.remove_values();
    for value in decoded {
        attribute.add_value(value);
    }
    attribute.set_encoding(VcardEncoding::Raw);
}

/// Split a `data:[mime][;base64],payload` URI.
fn split_data_uri(uri: &str) -> Option<(Option<String>, bool, &str)> {
    let rest = uri.strip_prefix("data:").or_else(|| {
        if uri.len() >= 5 && uri[..5].eq_ignore_ascii_case("data:") {
            Some(&uri[5..])
        } else {
            None
        }
    })?;
    let comma = rest.find(',')?;
    let (meta, payload) = (&rest[..comma], &rest[comma + 1..]);
    let mut mime_type = None;
    let mut is_base64 = false;
    for part in meta.split(';') {
        if part.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        } else if !part.is_empty() {
            mime_type = Some(part.to_string());
        }
    }
    Some((mime_type, is_base64, payload))
}

/// Convert `card` to `to_version`. Converting to the card's own version
/// yields a plain materialized copy.
pub(super) fn convert(card: &mut Vcard, to_version: VcardVersion) -> Vcard {
    let from_version = card.version().unwrap_or(VcardVersion::V40);
    if from_version == to_version {
        let mut copy = Vcard::new();
        for attribute in card.attributes() {
            copy.add_attribute(attribute.clone());
        }
        return copy;
    }
    match (from_version, to_version) {
        (VcardVersion::V21, VcardVersion::V30) => convert_step(card, VcardVersion::V30),
        (VcardVersion::V21, VcardVersion::V40) => {
            let mut intermediate = convert_step(card, VcardVersion::V30);
            convert_step(&mut intermediate, VcardVersion::V40)
        }
        (VcardVersion::V40, VcardVersion::V21) => {
            let mut intermediate = convert_step(card, VcardVersion::V30);
            convert_step(&mut intermediate, VcardVersion::V21)
        }
        (_, _) => convert_step(card, to_version),
    }
}

fn convert_step(card: &mut Vcard, to_version: VcardVersion) -> Vcard {
    let (valid_properties, valid_parameters): (&[&str], &[&str]) = match to_version {
        VcardVersion::V21 => (VCARD_21_PROPERTIES, VCARD_21_PARAMETERS),
        VcardVersion::V30 => (VCARD_30_PROPERTIES, VCARD_30_PARAMETERS),
        VcardVersion::V40 => (VCARD_40_PROPERTIES, VCARD_40_PARAMETERS),
    };
    let use_renames = to_version != VcardVersion::V21;

    // LABEL attributes get folded into matching ADRs on the way to 4.0
    let labels: Vec<VcardAttribute> = card
        .attributes()
        .iter()
        .filter(|a| a.name().eq_ignore_ascii_case("LABEL"))
        .cloned()
        .collect();
    let mut used_labels: Vec<bool> = vec![false; labels.len()];

    let mut converted = Vcard::new();
    let mut version_attr = VcardAttribute::new(None, "VERSION");
    version_attr.add_value(to_version.as_str());
    converted.add_attribute(version_attr);

    let from_is_21 = card.version() == Some(VcardVersion::V21);
    let source: Vec<VcardAttribute> = card.attributes().to_vec();
    for attribute in source {
        if attribute.name().eq_ignore_ascii_case("VERSION") {
            continue;
        }
        let mut new_name: String = attribute.name().to_string();
        if use_renames {
            if let Some(renamed) = rename_for(&new_name, to_version) {
                new_name = renamed.to_string();
            }
        }
        if !is_allowed(&new_name, valid_properties) {
            continue;
        }
        if attribute.values().iter().all(|v| v.is_empty()) {
            continue;
        }

        let mut new_attr = attribute.clone();
        let keep = match to_version {
            VcardVersion::V21 => {
                if is_date_attr(&new_name) {
                    convert_date_value(&mut new_attr, VcardVersion::V21);
                }
                true
            }
            VcardVersion::V30 => {
                if from_is_21 {
                    decode_qp_values(&mut new_attr);
                    true
                } else {
                    convert_40_to_30_attr(
                        &mut converted,
                        &mut new_attr,
                        &mut new_name,
                    )
                }
            }
            VcardVersion::V40 => convert_30_to_40_attr(
                &mut converted,
                &mut new_attr,
                &mut new_name,
                &labels,
                &mut used_labels,
            ),
        };
        if !keep {
            continue;
        }

        if !new_name.eq_ignore_ascii_case(new_attr.name()) {
            new_attr.set_name(new_name);
        }
        filter_params(&mut new_attr, valid_parameters);
        converted.add_attribute(new_attr);
    }

    converted
}

fn filter_params(attribute: &mut VcardAttribute, valid_parameters: &[&str]) {
    let removable: Vec<String> = attribute
        .params()
        .iter()
        .filter(|param| !is_allowed(param.name(), valid_parameters))
        .map(|param| param.name().to_string())
        .collect();
    for name in removable {
        attribute.remove_param(&name);
    }
}

fn convert_30_to_40_attr(
    converted: &mut Vcard,
    new_attr: &mut VcardAttribute,
    new_name: &mut String,
    labels: &[VcardAttribute],
    used_labels: &mut [bool],
) -> bool {
    let original_name = new_attr.name().to_string();

    if original_name.eq_ignore_ascii_case("ADR") {
        // LABEL became a parameter of ADR in 4.0
        let wanted: Vec<String> = new_attr
            .param("TYPE")
            .map(|values| values.to_vec())
            .unwrap_or_default();
        for (position, label) in labels.iter().enumerate() {
            if used_labels[position] {
                continue;
            }
            let label_types: Vec<String> = label
                .param("TYPE")
                .map(|values| values.to_vec())
                .unwrap_or_default();
            let all_found = wanted.iter().all(|t| {
                label_types.iter().any(|lt| lt.eq_ignore_ascii_case(t))
            });
            if !all_found {
                continue;
            }
            if let Some(value) = label.value_decoded() {
                let value = String::from_utf8_lossy(&value).into_owned();
                if !value.is_empty() {
                    new_attr.remove_param("LABEL");
                    new_attr.add_param(VcardParam::with_value("LABEL", value));
                }
            }
            used_labels[position] = true;
            break;
        }
        return true;
    }
    if original_name.eq_ignore_ascii_case("LABEL") {
        // folded into an ADR above (or dropped: 4.0 has no LABEL property)
        return false;
    }
    if new_name.eq_ignore_ascii_case("KIND") {
        // an earlier X-EVOLUTION-LIST marker wins
        return converted.get_attribute("KIND").is_none();
    }
    if original_name.eq_ignore_ascii_case("X-EVOLUTION-LIST") {
        let truthy = new_attr
            .value()
            .map(|v| v.eq_ignore_ascii_case("TRUE"))
            .unwrap_or(false);
        if truthy && converted.get_attribute("KIND").is_none() {
            let kind = VcardAttribute::new(None, "KIND");
            converted.add_attribute_with_value(kind, "group");
        }
        return false;
    }
    if original_name.eq_ignore_ascii_case("PHOTO") || original_name.eq_ignore_ascii_case("LOGO") {
        convert_image_to_40(new_attr);
        return true;
    }
    if is_date_attr(new_name) {
        convert_date_value(new_attr, VcardVersion::V40);
        return true;
    }
    if let Some(scheme) = impp_scheme_for_attr(&original_name) {
        // X-AIM and friends become IMPP URIs
        if !new_attr.is_single_valued() {
            return false;
        }
        let Some(decoded) = new_attr.value_decoded() else {
            return false;
        };
        let value = String::from_utf8_lossy(&decoded).into_owned();
        if value.is_empty() {
            return false;
        }
        *new_name = "IMPP".to_string();
        new_attr.remove_values();
        new_attr.add_value(format!("{}{}", scheme, value));
        return true;
    }
    true
}

fn convert_40_to_30_attr(
    converted: &mut Vcard,
    new_attr: &mut VcardAttribute,
    new_name: &mut String,
) -> bool {
    let original_name = new_attr.name().to_string();

    if original_name.eq_ignore_ascii_case("ADR") {
        // the LABEL parameter becomes its own attribute again
        if let Some(values) = new_attr.param("LABEL") {
            if values.len() == 1 {
                let mut label = VcardAttribute::new(new_attr.group(), "LABEL");
                label.add_value(values[0].clone());
                if let Some(types) = new_attr.param("TYPE") {
                    let mut param = VcardParam::new("TYPE");
                    let mut any = false;
                    for value in types {
                        if !value.is_empty() {
                            param.add_value(value.clone());
                            any = true;
                        }
                    }
                    if any {
                        label.add_param(param);
                    }
                }
                converted.add_attribute(label);
            }
        }
        new_attr.remove_param("LABEL");
        return true;
    }
    if original_name.eq_ignore_ascii_case("KIND") {
        // X-EVOLUTION-KIND via rename; a group kind also leaves the list marker
        let grouplike = new_attr
            .value()
            .map(|v| v.eq_ignore_ascii_case("group"))
            .unwrap_or(false);
        if grouplike {
            let list = VcardAttribute::new(None, "X-EVOLUTION-LIST");
            converted.add_attribute_with_value(list, "TRUE");
        }
        return true;
    }
    if original_name.eq_ignore_ascii_case("IMPP") {
        if !new_attr.is_single_valued() {
            return true;
        }
        let Some(decoded) = new_attr.value_decoded() else {
            return true;
        };
        let value = String::from_utf8_lossy(&decoded).into_owned();
        let Some(split) = value.find(':') else {
            return true;
        };
        let (scheme, rest) = value.split_at(split + 1);
        match attr_for_impp_scheme(scheme) {
            Some(legacy) => {
                *new_name = legacy.to_string();
                new_attr.remove_values();
                new_attr.add_value(rest);
            }
            None => {
                *new_name = "X-EVOLUTION-IMPP".to_string();
            }
        }
        return true;
    }
    if original_name.eq_ignore_ascii_case("PHOTO") || original_name.eq_ignore_ascii_case("LOGO") {
        convert_image_to_30(new_attr);
        return true;
    }
    if is_date_attr(new_name) {
        convert_date_value(new_attr, VcardVersion::V30);
        return true;
    }
    true
}

/// Inline base64 photo/logo data becomes a `data:` URI in 4.0.
fn convert_image_to_40(attribute: &mut VcardAttribute) {
    let is_uri = attribute
        .param("VALUE")
        .and_then(|values| values.first().cloned())
        .map(|value| value.eq_ignore_ascii_case("uri"))
        .unwrap_or(false);
    if is_uri {
        return;
    }
    let base64_encoded = attribute
        .param("ENCODING")
        .and_then(|values| values.first().cloned())
        .map(|value| {
            value.eq_ignore_ascii_case("b") || value.eq_ignore_ascii_case("base64")
        })
        .unwrap_or(false);
    if !base64_encoded {
        return;
    }
    let Some(content) = attribute.value().map(|v| v.to_string()) else {
        return;
    };
    if content.is_empty() {
        return;
    }
    let mut data_uri = String::from("data:");
    if let Some(types) = attribute.param("TYPE") {
        if let Some(image_type) = types.first() {
            data_uri.push_str(&format!("image/{}", image_type));
            data_uri.push(';');
        }
    }
    data_uri.push_str("base64,");
    data_uri.push_str(&content);
    attribute.remove_params();
    attribute.remove_values();
    attribute.add_value(data_uri);
}

/// A `data:` URI becomes inline base64 data in 3.0; other URIs get VALUE=uri.
fn convert_image_to_30(attribute: &mut VcardAttribute) {
    let Some(value) = attribute.value().map(|v| v.to_string()) else {
        return;
    };
    match split_data_uri(&value) {
        Some((mime_type, true, payload)) => {
            // keep only well-formed base64 payloads inline
            let stripped: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            if base64::engine::general_purpose::STANDARD
                .decode(stripped.as_bytes())
                .is_err()
            {
                return;
            }
            let payload = payload.to_string();
            attribute.remove_params();
            attribute.remove_values();
            attribute.add_value(payload);
            attribute.add_param(VcardParam::with_value("ENCODING", "b"));
            if let Some(mime_type) = mime_type {
                if let Some(slash) = mime_type.find('/') {
                    let subtype = &mime_type[slash + 1..];
                    if !subtype.is_empty() {
                        attribute.add_param(VcardParam::with_value("TYPE", subtype));
                    }
                }
            }
        }
        _ => {
            if !value.is_empty() && attribute.param("VALUE").is_none() {
                attribute.add_param(VcardParam::with_value("VALUE", "uri"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_30(lines: &[&str]) -> Vcard {
        let mut text = String::from("BEGIN:VCARD\r\nVERSION:3.0\r\n");
        for line in lines {
            text.push_str(line);
            text.push_str("\r\n");
        }
        text.push_str("END:VCARD");
        Vcard::from_string(text)
    }

    #[test]
    fn x_aim_becomes_impp_and_back() {
        let mut card = card_30(&["X-AIM:jd42"]);
        let mut v4 = card.convert(VcardVersion::V40);
        let impp = v4.get_attribute("IMPP").expect("IMPP present");
        assert_eq!(impp.value(), Some("aim:jd42"));

        let mut back = v4.convert(VcardVersion::V30);
        let aim = back.get_attribute("X-AIM").expect("X-AIM restored");
        assert_eq!(aim.value(), Some("jd42"));
        assert!(back.get_attribute("IMPP").is_none());
    }

    #[test]
    fn anniversary_renames_and_reshapes() {
        let mut card = card_30(&["X-EVOLUTION-ANNIVERSARY:2001-02-03"]);
        let mut v4 = card.convert(VcardVersion::V40);
        let anniversary = v4.get_attribute("ANNIVERSARY").unwrap();
        assert_eq!(anniversary.value(), Some("20010203"));

        let mut back = v4.convert(VcardVersion::V30);
        let legacy = back.get_attribute("X-EVOLUTION-ANNIVERSARY").unwrap();
        assert_eq!(legacy.value(), Some("2001-02-03"));
    }

    #[test]
    fn kind_group_and_list_marker() {
        let mut card = card_30(&["X-EVOLUTION-LIST:TRUE"]);
        let mut v4 = card.convert(VcardVersion::V40);
        assert_eq!(v4.get_attribute("KIND").unwrap().value(), Some("group"));
        assert!(v4.get_attribute("X-EVOLUTION-LIST").is_none());

        let mut back = v4.convert(VcardVersion::V30);
        assert_eq!(
            back.get_attribute("X-EVOLUTION-LIST").unwrap().value(),
            Some("TRUE")
        );
    }

    #[test]
    fn adr_label_shuffles() {
        let mut card = card_30(&[
            "ADR;TYPE=HOME:;;123 Main;Town;;;",
            "LABEL;TYPE=HOME:123 Main St.",
        ]);
        let mut v4 = card.convert(VcardVersion::V40);
        let adr = v4.get_attribute("ADR").unwrap();
        assert_eq!(adr.param("LABEL").unwrap(), &["123 Main St."]);
        assert!(v4.get_attribute("LABEL").is_none());

        let mut back = v4.convert(VcardVersion::V30);
        let label = back.get_attribute("LABEL").unwrap();
        assert_eq!(label.value(), Some("123 Main St."));
        assert!(back.get_attribute("ADR").unwrap().param("LABEL").is_none());
    }

    #[test]
    fn photo_inline_to_data_uri_and_back() {
        let mut card = card_30(&["PHOTO;ENCODING=b;TYPE=JPEG:aGVsbG8="]);
        let mut v4 = card.convert(VcardVersion::V40);
        let photo = v4.get_attribute("PHOTO").unwrap();
        assert_eq!(photo.value(), Some("data:image/JPEG;base64,aGVsbG8="));

        let mut back = v4.convert(VcardVersion::V30);
        let photo = back.get_attribute("PHOTO").unwrap();
        assert_eq!(photo.value(), Some("aGVsbG8="));
        assert_eq!(photo.param("ENCODING").unwrap(), &["b"]);
        assert_eq!(photo.param("TYPE").unwrap(), &["JPEG"]);
    }

    #[test]
    fn chain_21_to_40() {
        let mut card = Vcard::from_string(
            "BEGIN:VCARD\r\nVERSION:2.1\r\nN:Doe;John\r\nTEL;HOME:+1 555 0100\r\nEND:VCARD",
        );
        let mut v4 = card.convert(VcardVersion::V40);
        assert_eq!(v4.version(), Some(VcardVersion::V40));
        assert_eq!(v4.get_attribute("N").unwrap().values(), &["Doe", "John"]);
        assert_eq!(
            v4.get_attribute("TEL").unwrap().param("TYPE").unwrap(),
            &["HOME"]
        );
    }

    #[test]
    fn convert_to_own_version_copies() {
        let mut card = card_30(&["FN:John"]);
        let mut copy = card.convert(VcardVersion::V30);
        assert_eq!(copy.get_attribute("FN").unwrap().value(), Some("John"));
        assert_eq!(copy.version(), Some(VcardVersion::V30));
    }
}
