//! probekit: USB protocol core for the Bus Auditor and Zigbee Auditor probes.

pub mod bus;
pub mod config;
pub mod error;
pub mod family;
pub mod frame;
pub mod poll;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod zigbee;

pub use error::{ProbeError, ValidationError};
