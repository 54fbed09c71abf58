use crate::types::{Device, RawScanResult, NO_PROTOCOL, UNKNOWN_VENDOR};

/// Map raw backend host records to inventory devices, preserving order.
pub fn normalize(raw: &[RawScanResult]) -> Vec<Device> {
    raw.iter().map(normalize_one).collect()
}

/// Map one raw host record to a [`Device`]. Never fails: absent data becomes a sentinel.
pub fn normalize_one(raw: &RawScanResult) -> Device {
    let display_name = if raw.vendor == UNKNOWN_VENDOR {
        format!("Device @{}", raw.address)
    } else {
        format!("{} Device", raw.vendor)
    };
    let primary_protocol = raw
        .services
        .first()
        .map(|s| s.protocol.clone())
        .unwrap_or_else(|| NO_PROTOCOL.to_string());

    Device {
        id: raw.address.clone(),
        address: raw.address.clone(),
        hardware_id: raw.hardware_id.clone(),
        vendor: raw.vendor.clone(),
        risk_level: raw.risk_level,
        display_name,
        primary_protocol,
        open_ports: raw.services.iter().map(|s| s.port).collect(),
    }
}
