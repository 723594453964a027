//! Minimal X.509 reader: walks the DER structure of a peer certificate far
//! enough to pull out issuer/subject common names and the validity window.

use chrono::{DateTime, NaiveDate, Utc};

use super::model::CertificateInfo;

const TAG_INTEGER: u8 = 0x02;
const TAG_OID: u8 = 0x06;
const TAG_UTC_TIME: u8 = 0x17;
const TAG_GENERALIZED_TIME: u8 = 0x18;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_EXPLICIT_VERSION: u8 = 0xa0;

// 2.5.4.3
const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];
// 2.5.4.10
const OID_ORGANIZATION: [u8; 3] = [0x55, 0x04, 0x0a];

struct Tlv<'a> {
    tag: u8,
    value: &'a [u8],
}

fn read_tlv(input: &[u8]) -> Option<(Tlv<'_>, &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;

    let (len, rest) = if first & 0x80 == 0 {
        (first as usize, rest)
    } else {
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 || rest.len() < count {
            return None;
        }
        let len = rest[..count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, &rest[count..])
    };

    if rest.len() < len {
        return None;
    }
    Some((
        Tlv {
            tag,
            value: &rest[..len],
        },
        &rest[len..],
    ))
}

fn expect_tlv(input: &[u8], tag: u8) -> Option<(Tlv<'_>, &[u8])> {
    let (tlv, rest) = read_tlv(input)?;
    (tlv.tag == tag).then_some((tlv, rest))
}

/// Parses a DER encoded certificate, computing expiry relative to `now`.
/// Returns `None` when the structure is not a recognisable certificate.
pub fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Option<CertificateInfo> {
    let (certificate, _) = expect_tlv(der, TAG_SEQUENCE)?;
    let (tbs, _) = expect_tlv(certificate.value, TAG_SEQUENCE)?;

    let mut fields = tbs.value;
    if fields.first() == Some(&TAG_EXPLICIT_VERSION) {
        let (_, rest) = read_tlv(fields)?;
        fields = rest;
    }
    let (_serial, rest) = expect_tlv(fields, TAG_INTEGER)?;
    let (_signature, rest) = expect_tlv(rest, TAG_SEQUENCE)?;
    let (issuer, rest) = expect_tlv(rest, TAG_SEQUENCE)?;
    let (validity, rest) = expect_tlv(rest, TAG_SEQUENCE)?;
    let (subject, _) = expect_tlv(rest, TAG_SEQUENCE)?;

    let (not_before, rest) = read_tlv(validity.value)?;
    let (not_after, _) = read_tlv(rest)?;
    let not_before = parse_time(&not_before)?;
    let not_after = parse_time(&not_after)?;

    Some(CertificateInfo {
        issuer: name_attribute(issuer.value),
        subject: name_attribute(subject.value),
        not_before,
        not_after,
        days_until_expiry: (not_after - now).num_days(),
        is_valid: now >= not_before && now <= not_after,
    })
}

/// Common name of an X.501 Name, falling back to the organization.
fn name_attribute(name: &[u8]) -> Option<String> {
    find_attribute(name, &OID_COMMON_NAME).or_else(|| find_attribute(name, &OID_ORGANIZATION))
}

fn find_attribute(mut name: &[u8], oid: &[u8]) -> Option<String> {
    while let Some((rdn, rest)) = read_tlv(name) {
        name = rest;
        if rdn.tag != TAG_SET {
            continue;
        }
        let mut attributes = rdn.value;
        while let Some((attribute, rest)) = expect_tlv(attributes, TAG_SEQUENCE) {
            attributes = rest;
            let Some((id, value)) = expect_tlv(attribute.value, TAG_OID) else {
                continue;
            };
            if id.value != oid {
                continue;
            }
            let (value, _) = read_tlv(value)?;
            return String::from_utf8(value.value.to_vec()).ok();
        }
    }
    None
}

fn parse_time(tlv: &Tlv<'_>) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(tlv.value).ok()?;
    let text = text.strip_suffix('Z')?;
    if !text.is_ascii() {
        return None;
    }

    let (year, rest) = match tlv.tag {
        TAG_UTC_TIME if text.len() >= 12 => {
            let yy: i32 = text[0..2].parse().ok()?;
            // RFC 5280: 50..99 are 19xx
            let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };
            (year, &text[2..])
        }
        TAG_GENERALIZED_TIME if text.len() >= 14 => (text[0..4].parse().ok()?, &text[4..]),
        _ => return None,
    };

    let field = |range: std::ops::Range<usize>| -> Option<u32> { rest.get(range)?.parse().ok() };
    NaiveDate::from_ymd_opt(year, field(0..2)?, field(2..4)?)?
        .and_hms_opt(field(4..6)?, field(6..8)?, field(8..10)?)
        .map(|dt| dt.and_utc())
}
