//! Unified error type for the probekit-lib crate.
//!
//! [`ProbeError`] wraps the transport error and carries the protocol-level
//! failure kinds (unsupported service, device-reported error, malformed
//! response, argument validation, radio state, sniffer desync).
//! `From` impls allow `?` to propagate across module boundaries seamlessly.

use std::fmt;
use std::time::Duration;

use crate::transport::TransportError;

/// Argument rejections, detected before any USB I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A scan pin lies outside the probe's channel range.
    PinOutOfRange { pin: u8, max: u8 },
    /// `start` and `end` name the same channel.
    SamePins(u8),
    /// `start` is above `end`.
    StartAfterEnd { start: u8, end: u8 },
    /// Voltage is not one of the supported target levels.
    InvalidVoltage(String),
    /// The range is too narrow to carry every signal role of the scan.
    InsufficientChannels { required: usize, available: usize },
    /// IEEE 802.15.4 channel outside the 2.4 GHz band (11..=26).
    InvalidChannel(u8),
    /// Channel page other than 0.
    InvalidPage(u8),
    /// Channel mask is empty or names channels outside 11..=26.
    InvalidChannelMask(u32),
    /// Packet length outside the allowed bounds.
    PayloadLength { len: usize, max: usize },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::PinOutOfRange { pin, max } => {
                write!(f, "pin {pin} is out of range (0-{max})")
            }
            ValidationError::SamePins(pin) => {
                write!(f, "start and end pin are both {pin}")
            }
            ValidationError::StartAfterEnd { start, end } => {
                write!(f, "start pin {start} is greater than end pin {end}")
            }
            ValidationError::InvalidVoltage(v) => {
                write!(f, "invalid voltage \"{v}\" (expected 3.3, 1.8 or 1.2)")
            }
            ValidationError::InsufficientChannels {
                required,
                available,
            } => write!(
                f,
                "insufficient channels: scan needs at least {required}, range has {available}"
            ),
            ValidationError::InvalidChannel(ch) => {
                write!(f, "invalid channel {ch} (expected 11-26)")
            }
            ValidationError::InvalidPage(page) => {
                write!(f, "invalid channel page {page} (only page 0 is supported)")
            }
            ValidationError::InvalidChannelMask(mask) => {
                write!(f, "invalid channel mask 0x{mask:08x}")
            }
            ValidationError::PayloadLength { len, max } => {
                write!(f, "invalid payload length {len} (expected 1-{max})")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Unified error type for probekit-lib operations.
#[derive(Debug)]
pub enum ProbeError {
    /// USB transfer failure.
    Transport(TransportError),
    /// The firmware does not advertise the named service.
    ServiceNotSupported(&'static str),
    /// Error reported by the device through a status frame.
    Service { code: u8, message: &'static str },
    /// Response shape or length inconsistency.
    MalformedResponse(String),
    /// Bad argument, rejected before any I/O.
    Validation(ValidationError),
    /// Operation requires the radio to be powered on.
    RadioOff,
    /// Sniffer stream desynchronized; the caller must reset the device.
    Buffer(String),
    /// Poll loop aborted through a cancel token.
    Cancelled,
    /// Poll loop ran past its caller-supplied deadline.
    DeadlineExceeded(Duration),
    /// No matching USB device attached.
    NotFound,
    /// Standard I/O error (config persistence).
    Io(std::io::Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Transport(e) => write!(f, "{e}"),
            ProbeError::ServiceNotSupported(name) => {
                write!(f, "Service not supported by firmware: {name}")
            }
            ProbeError::Service { code, message } => {
                write!(f, "Device error {code}: {message}")
            }
            ProbeError::MalformedResponse(e) => write!(f, "Malformed response: {e}"),
            ProbeError::Validation(e) => write!(f, "Invalid argument: {e}"),
            ProbeError::RadioOff => write!(f, "Radio is off"),
            ProbeError::Buffer(e) => write!(f, "Sniffer buffer error: {e}"),
            ProbeError::Cancelled => write!(f, "Operation cancelled"),
            ProbeError::DeadlineExceeded(d) => {
                write!(f, "Operation timed out after {:.1}s", d.as_secs_f64())
            }
            ProbeError::NotFound => write!(f, "Probe device not found"),
            ProbeError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Transport(e) => Some(e),
            ProbeError::Validation(e) => Some(e),
            ProbeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ProbeError {
    fn from(e: TransportError) -> Self {
        ProbeError::Transport(e)
    }
}

impl From<ValidationError> for ProbeError {
    fn from(e: ValidationError) -> Self {
        ProbeError::Validation(e)
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        ProbeError::Io(e)
    }
}

/// Crate-level Result alias using [`ProbeError`].
pub type Result<T> = std::result::Result<T, ProbeError>;
