//! HL7 timestamps and intervals

use crate::error::{ConversionError, Result};
use crate::source::SourceNode;
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Value, json};

/// Precision of a parsed timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Point in time rendered as a FHIR date or dateTime string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instant {
    pub value: String,
    pub precision: Precision,
}

impl Instant {
    /// Parse `YYYY[MM[DD[HH[MM[SS[.S+]]]]]][+/-ZZZZ]`
    pub fn parse_hl7(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (main, offset) = match raw.char_indices().skip(4).find(|(_, c)| *c == '+' || *c == '-') {
            Some((i, _)) => (&raw[..i], Some(&raw[i..])),
            None => (raw, None),
        };
        let (digits, fraction) = match main.split_once('.') {
            Some((digits, fraction)) => (digits, Some(fraction)),
            None => (main, None),
        };

        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let precision = match digits.len() {
            4 => Precision::Year,
            6 => Precision::Month,
            8 => Precision::Day,
            10 => Precision::Hour,
            12 => Precision::Minute,
            14 => Precision::Second,
            _ => return None,
        };
        if let Some(fraction) = fraction
            && (precision != Precision::Second
                || fraction.is_empty()
                || !fraction.bytes().all(|b| b.is_ascii_digit()))
        {
            return None;
        }

        let field = |range: std::ops::Range<usize>| digits.get(range).and_then(|s| s.parse::<u32>().ok());
        let year = digits[..4].parse::<i32>().ok()?;
        let month = field(4..6).unwrap_or(1);
        let day = field(6..8).unwrap_or(1);
        let hour = field(8..10).unwrap_or(0);
        let minute = field(10..12).unwrap_or(0);
        let second = field(12..14).unwrap_or(0);

        NaiveDate::from_ymd_opt(year, month, day)?;
        NaiveTime::from_hms_opt(hour, minute, second)?;

        let mut value = match precision {
            Precision::Year => format!("{year:04}"),
            Precision::Month => format!("{year:04}-{month:02}"),
            _ => format!("{year:04}-{month:02}-{day:02}"),
        };
        if precision >= Precision::Hour {
            value.push_str(&format!("T{hour:02}:{minute:02}:{second:02}"));
            if let Some(fraction) = fraction {
                value.push('.');
                value.push_str(fraction);
            }
            if let Some(offset) = offset {
                value.push_str(&parse_offset(offset)?);
            }
        } else if offset.is_some_and(|o| parse_offset(o).is_none()) {
            return None;
        }

        Some(Self { value, precision })
    }
}

fn parse_offset(offset: &str) -> Option<String> {
    let (sign, rest) = offset.split_at(1);
    if rest.len() != 4 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = rest[..2].parse().ok()?;
    let minutes: u32 = rest[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(format!("{sign}{hours:02}:{minutes:02}"))
}

/// Closed period with both bounds present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub start: Instant,
    pub end: Instant,
}

impl Interval {
    pub fn to_fhir(&self) -> Value {
        json!({ "start": self.start.value, "end": self.end.value })
    }
}

/// Either a point in time or a period
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effective {
    Instant(Instant),
    Period(Interval),
}

/// Parse the node's `value` attribute; `None` when the attribute is absent
pub fn to_instant(node: SourceNode<'_>) -> Result<Option<Instant>> {
    match node.attribute("value").map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => Instant::parse_hl7(raw)
            .map(Some)
            .ok_or_else(|| ConversionError::unrecognized(raw, "timestamp", node)),
        None => Ok(None),
    }
}

/// Interval from `low` and `high`, only when both carry a value
pub fn to_interval(node: SourceNode<'_>) -> Result<Option<Interval>> {
    let bound = |name: &str| {
        node.child(name)
            .filter(|b| b.attribute("value").is_some_and(|v| !v.trim().is_empty()))
    };
    let (Some(low), Some(high)) = (bound("low"), bound("high")) else {
        return Ok(None);
    };

    match (to_instant(low)?, to_instant(high)?) {
        (Some(start), Some(end)) => Ok(Some(Interval { start, end })),
        _ => Ok(None),
    }
}

/// Period when both bounds exist, otherwise the node's own value or its `low`
pub fn to_effective(node: SourceNode<'_>) -> Result<Option<Effective>> {
    if let Some(interval) = to_interval(node)? {
        return Ok(Some(Effective::Period(interval)));
    }
    if let Some(instant) = to_instant(node)? {
        return Ok(Some(Effective::Instant(instant)));
    }
    match node.child("low") {
        Some(low) => Ok(to_instant(low)?.map(Effective::Instant)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::source::SourceTree;

    fn parse(fragment: &str) -> SourceTree {
        SourceTree::parse_str(&format!(r#"<root xmlns="urn:hl7-org:v3">{fragment}</root>"#))
            .unwrap()
    }

    #[test]
    fn test_parse_hl7_precisions() {
        let cases = [
            ("2020", "2020", Precision::Year),
            ("202003", "2020-03", Precision::Month),
            ("20200315", "2020-03-15", Precision::Day),
            ("202003151030-0500", "2020-03-15T10:30:00-05:00", Precision::Minute),
            ("20200315103045.25+0100", "2020-03-15T10:30:45.25+01:00", Precision::Second),
        ];
        for (raw, expected, precision) in cases {
            let instant = Instant::parse_hl7(raw).unwrap();
            assert_eq!(instant.value, expected, "{raw}");
            assert_eq!(instant.precision, precision, "{raw}");
        }
    }

    #[test]
    fn test_parse_hl7_rejects_invalid_calendar_values() {
        assert_eq!(Instant::parse_hl7("20201301"), None);
        assert_eq!(Instant::parse_hl7("20200230"), None);
        assert_eq!(Instant::parse_hl7("2020031525"), None);
        assert_eq!(Instant::parse_hl7("20200"), None);
        assert_eq!(Instant::parse_hl7("2020.5"), None);
    }

    #[test]
    fn test_interval_requires_both_bounds() {
        let tree = parse(r#"<effectiveTime><low value="20200101"/></effectiveTime>"#);
        let node = tree.root().child("effectiveTime").unwrap();
        assert_eq!(to_interval(node).unwrap(), None);

        let effective = to_effective(node).unwrap().unwrap();
        assert!(matches!(effective, Effective::Instant(i) if i.value == "2020-01-01"));
    }

    #[test]
    fn test_interval_with_both_bounds() {
        let tree = parse(
            r#"<effectiveTime><low value="20200101"/><high value="20200201"/></effectiveTime>"#,
        );
        let node = tree.root().child("effectiveTime").unwrap();
        let interval = to_interval(node).unwrap().unwrap();

        assert_eq!(interval.start.value, "2020-01-01");
        assert_eq!(interval.end.value, "2020-02-01");
    }

    #[test]
    fn test_interval_ignores_empty_bound() {
        let tree = parse(
            r#"<effectiveTime><low value="20200101"/><high nullFlavor="UNK"/></effectiveTime>"#,
        );
        let node = tree.root().child("effectiveTime").unwrap();
        assert_eq!(to_interval(node).unwrap(), None);
    }

    #[test]
    fn test_malformed_timestamp_is_unrecognized() {
        let tree = parse(r#"<effectiveTime value="yesterday"/>"#);
        let err = to_instant(tree.root().child("effectiveTime").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnrecognizedValue);
    }
}
