use ot_discovery_rs::error::SubmitError;
use ot_discovery_rs::netrange::{parse_range, RangeSpec};

#[test]
fn host_counts_exclude_network_and_broadcast() {
    let slash24 = parse_range("192.168.1.0/24").unwrap();
    assert_eq!(slash24.host_count(), 254);
    let slash31 = parse_range("10.0.0.0/31").unwrap();
    assert_eq!(slash31.host_count(), 2);
    let single = parse_range("10.0.0.0/32").unwrap();
    assert_eq!(single.host_count(), 1);
}

#[test]
fn ipv6_ranges_are_accepted() {
    let r = parse_range("fd00::/120").unwrap();
    assert!(matches!(r, RangeSpec::Network(_)));
    assert_eq!(r.host_count(), 256);
}

#[test]
fn whitespace_only_is_invalid_input() {
    let err = parse_range(" \n ").unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput(_)));
    assert!(!err.detail().is_empty());
}
