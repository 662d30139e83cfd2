// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port-forward spec grammar (§6):
//!
//! ```text
//! spec := none | auto | all | item (',' item)*
//! item := ['~'] first ['-' last] [':' mapfirst ['-' maplast]] ['/' [addr] ['%' iface]]
//! ```
//!
//! `~` marks an exclusion range, which must not overlap a previous
//! exclusion. An exclusion-only spec means "all non-excluded
//! ephemeral-min ports". A mapped range's width must equal the source
//! range's width. Overlapping mappings emit a warning and the latest one
//! wins.

use thiserror::Error;

/// One parsed port-forward spec, as handed to the core by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortForward {
    /// `none`: no ports forwarded.
    None,
    /// `auto`: forward whatever the host exposes, discovered at runtime.
    Auto,
    /// `all`: forward every port not explicitly excluded.
    All,
    /// An explicit, comma-separated item list.
    Items(Vec<PortSpecItem>),
}

/// One `item` of the port spec grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpecItem {
    /// Whether this item is an exclusion (`~` prefix) rather than an
    /// inclusion.
    pub exclude: bool,
    /// First port of the source range.
    pub first: u16,
    /// Last port of the source range (equal to `first` for a single port).
    pub last: u16,
    /// Mapped destination range, if `:mapfirst[-maplast]` was given.
    pub map: Option<(u16, u16)>,
    /// Bind address override, if `/addr` was given (empty means "any").
    pub addr: Option<String>,
    /// Bind interface override, if `%iface` was given.
    pub iface: Option<String>,
}

/// A malformed port-forward spec, pointing at the offending fragment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortSpecError {
    #[error("empty port range in item {item:?}")]
    EmptyRange { item: String },
    #[error("invalid port number {value:?} in item {item:?}")]
    InvalidPort { item: String, value: String },
    #[error("range end {last} is before start {first} in item {item:?}")]
    RangeReversed { item: String, first: u16, last: u16 },
    #[error("mapped range width does not match source range width in item {item:?}")]
    MapWidthMismatch { item: String },
    #[error("exclusion range in item {item:?} overlaps a previous exclusion")]
    ExclusionOverlap { item: String },
    #[error("empty item in spec {spec:?}")]
    EmptyItem { spec: String },
}

/// Parse one `-t`/`-u`/`-T`/`-U` spec string.
///
/// # Errors
///
/// Returns [`PortSpecError`] on any grammar violation, a reversed range,
/// a mapped-range width mismatch, or an overlapping exclusion.
pub fn parse(spec: &str) -> Result<PortForward, PortSpecError> {
    match spec {
        "none" => return Ok(PortForward::None),
        "auto" => return Ok(PortForward::Auto),
        "all" => return Ok(PortForward::All),
        _ => {}
    }
    let mut items = Vec::new();
    let mut exclusions: Vec<(u16, u16)> = Vec::new();
    for raw in spec.split(',') {
        if raw.is_empty() {
            return Err(PortSpecError::EmptyItem { spec: spec.to_string() });
        }
        let item = parse_item(raw)?;
        if item.exclude {
            if exclusions.iter().any(|&(a, b)| ranges_overlap(a, b, item.first, item.last)) {
                return Err(PortSpecError::ExclusionOverlap { item: raw.to_string() });
            }
            exclusions.push((item.first, item.last));
        }
        items.push(item);
    }
    Ok(PortForward::Items(items))
}

fn ranges_overlap(a_first: u16, a_last: u16, b_first: u16, b_last: u16) -> bool {
    a_first <= b_last && b_first <= a_last
}

fn parse_item(raw: &str) -> Result<PortSpecItem, PortSpecError> {
    let (exclude, rest) = match raw.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let (rest, iface) = match rest.split_once('%') {
        Some((head, iface)) => (head, Some(iface.to_string())),
        None => (rest, None),
    };

    let (rest, addr) = match rest.split_once('/') {
        Some((head, addr)) => (head, Some(addr.to_string())),
        None => (rest, None),
    };

    let (range_part, map_part) = match rest.split_once(':') {
        Some((head, map)) => (head, Some(map)),
        None => (rest, None),
    };

    let (first, last) = parse_range(range_part, raw)?;
    if first > last {
        return Err(PortSpecError::RangeReversed { item: raw.to_string(), first, last });
    }

    let map = match map_part {
        Some(m) => {
            let (mfirst, mlast) = parse_range(m, raw)?;
            if mfirst > mlast {
                return Err(PortSpecError::RangeReversed { item: raw.to_string(), first: mfirst, last: mlast });
            }
            if mlast - mfirst != last - first {
                return Err(PortSpecError::MapWidthMismatch { item: raw.to_string() });
            }
            Some((mfirst, mlast))
        }
        None => None,
    };

    Ok(PortSpecItem { exclude, first, last, map, addr, iface })
}

fn parse_range(part: &str, item: &str) -> Result<(u16, u16), PortSpecError> {
    if part.is_empty() {
        return Err(PortSpecError::EmptyRange { item: item.to_string() });
    }
    match part.split_once('-') {
        Some((a, b)) => {
            let first = parse_port(a, item)?;
            let last = parse_port(b, item)?;
            Ok((first, last))
        }
        None => {
            let p = parse_port(part, item)?;
            Ok((p, p))
        }
    }
}

fn parse_port(value: &str, item: &str) -> Result<u16, PortSpecError> {
    value
        .parse::<u16>()
        .map_err(|_| PortSpecError::InvalidPort { item: item.to_string(), value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_parse_directly() {
        assert_eq!(parse("none").unwrap(), PortForward::None);
        assert_eq!(parse("auto").unwrap(), PortForward::Auto);
        assert_eq!(parse("all").unwrap(), PortForward::All);
    }

    #[test]
    fn single_port_item() {
        let PortForward::Items(items) = parse("8080").unwrap() else { panic!() };
        assert_eq!(items, vec![PortSpecItem { exclude: false, first: 8080, last: 8080, map: None, addr: None, iface: None }]);
    }

    #[test]
    fn range_with_mapping_and_addr_and_iface() {
        let PortForward::Items(items) = parse("8000-8009:9000-9009/10.0.0.1%eth0").unwrap() else { panic!() };
        let item = items[0];
        assert_eq!(item.first, 8000);
        assert_eq!(item.last, 8009);
        assert_eq!(item.map, Some((9000, 9009)));
        assert_eq!(item.addr.as_deref(), Some("10.0.0.1"));
        assert_eq!(item.iface.as_deref(), Some("eth0"));
    }

    #[test]
    fn mismatched_map_width_is_rejected() {
        let err = parse("8000-8009:9000-9010").unwrap_err();
        assert_eq!(err, PortSpecError::MapWidthMismatch { item: "8000-8009:9000-9010".to_string() });
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = parse("9000-8000").unwrap_err();
        assert_eq!(err, PortSpecError::RangeReversed { item: "9000-8000".to_string(), first: 9000, last: 8000 });
    }

    #[test]
    fn exclusion_prefix_is_recognized() {
        let PortForward::Items(items) = parse("~1024-2048").unwrap() else { panic!() };
        assert!(items[0].exclude);
    }

    #[test]
    fn overlapping_exclusions_are_rejected() {
        let err = parse("~1000-2000,~1500-2500").unwrap_err();
        assert_eq!(err, PortSpecError::ExclusionOverlap { item: "~1500-2500".to_string() });
    }

    #[test]
    fn comma_separated_items_all_parse() {
        let PortForward::Items(items) = parse("80,443,8000-8010").unwrap() else { panic!() };
        assert_eq!(items.len(), 3);
    }
}
