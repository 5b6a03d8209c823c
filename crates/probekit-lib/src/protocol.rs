//! Protocol constants shared by the Bus Auditor and Zigbee Auditor.
//!
//! Both firmwares expose numbered services. A request goes out as a vendor
//! control transfer whose `bRequest` is the service code; responses come back
//! as short frames on the bulk IN endpoint (scans) or in the data stage of a
//! control IN transfer (status queries).
//!
//! ## Frame shapes
//!
//! - `[0x80|svc, 0x00]`: end of scan.
//! - `[0x80|svc, len, status]`: status frame (`status == 0`: accepted).
//! - `[0x80|svc, len, 0x00, payload...]`: data frame, `len` = payload bytes.

use crate::error::ProbeError;

// ── USB control transfer parameters ──

/// `bmRequestType` for device-to-host vendor requests (device recipient).
pub const REQUEST_TYPE_IN: u8 = 0xC0;

/// `bmRequestType` for host-to-device vendor requests (device recipient).
pub const REQUEST_TYPE_OUT: u8 = 0x40;

/// Timeout per USB control transfer in milliseconds.
pub const CONTROL_TIMEOUT_MS: u64 = 1000;

/// Default timeout per bulk read in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Configuration value selected after reset.
pub const USB_CONFIGURATION: u8 = 1;

/// Interface carrying the service endpoints.
pub const USB_INTERFACE: u8 = 0;

/// Bulk IN endpoint carrying response frames.
pub const BULK_IN_ENDPOINT: u8 = 0x81;

// ── Frame layout ──

/// High bit OR'd into the service code of every response frame.
pub const RESPONSE_FLAG: u8 = 0x80;

/// `[service, length, status]`.
pub const FRAME_HEADER_SIZE: usize = 3;

/// `[service, 0x00]`.
pub const END_MARKER_SIZE: usize = 2;

/// Status byte for "no error".
pub const STATUS_OK: u8 = 0;

// ── Services common to both families ──

/// Firmware/hardware revision query.
pub const SVC_GET_DEVICE_INFO: u8 = 0x01;

/// Capability bitmask query.
pub const SVC_GET_SERVICES: u8 = 0x02;

/// `[0x81, 5, status, fw_major, fw_minor, fw_patch, hw_major, hw_minor]`.
pub const DEVICE_INFO_LEN: usize = 8;

/// `[0x82, 4, status, mask: u32 LE]`.
pub const SERVICES_LEN: usize = 7;

// ── Device error table ──

/// Messages for the status byte of a failed service call, indexed by code.
pub const ERROR_MESSAGES: [&str; 10] = [
    "No error",
    "Invalid service",
    "Device busy",
    "Invalid parameter",
    "Invalid length",
    "Service not active",
    "Operation timed out",
    "Hardware fault",
    "Buffer overflow",
    "Application error",
];

/// Service byte carried by every response to `service`.
pub fn response_byte(service: u8) -> u8 {
    RESPONSE_FLAG | service
}

/// Translate a non-zero status byte through the family's error table.
///
/// Codes outside the table are themselves a protocol violation.
pub fn device_error(code: u8, table: &'static [&'static str]) -> ProbeError {
    match table.get(code as usize) {
        Some(message) => ProbeError::Service { code, message },
        None => ProbeError::MalformedResponse(format!(
            "status code {code} outside the {}-entry error table",
            table.len()
        )),
    }
}
