//! Device families: per-probe constants and service catalogs.

use std::fmt::Debug;
use std::hash::Hash;

use serde::Serialize;

use crate::bus::BusFamily;
use crate::transport::list_matching;
use crate::zigbee::ZigbeeFamily;

/// A service exposed by one family's firmware.
pub trait Service: Copy + Eq + Hash + Debug + 'static {
    /// Every service of the family, in capability-bit order.
    const ALL: &'static [Self];

    /// `bRequest` code of the service.
    fn code(self) -> u8;

    /// Bit in the GET_SERVICES capability mask.
    fn bit(self) -> u8;

    /// Firmware name, e.g. `JTAG_IDCODE_SCAN`.
    fn name(self) -> &'static str;
}

/// Static description of a probe family.
pub trait Family: 'static {
    type Service: Service;

    /// Human-readable family name.
    const NAME: &'static str;
    const VENDOR_ID: u16;
    const PRODUCT_ID: u16;
    /// Status byte → message table.
    const ERROR_MESSAGES: &'static [&'static str];
}

/// Family tag for listing attached devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    BusAuditor,
    ZigbeeAuditor,
}

impl FamilyKind {
    pub fn name(self) -> &'static str {
        match self {
            FamilyKind::BusAuditor => BusFamily::NAME,
            FamilyKind::ZigbeeAuditor => ZigbeeFamily::NAME,
        }
    }

    fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        let ids = (vendor_id, product_id);
        if ids == (BusFamily::VENDOR_ID, BusFamily::PRODUCT_ID) {
            Some(FamilyKind::BusAuditor)
        } else if ids == (ZigbeeFamily::VENDOR_ID, ZigbeeFamily::PRODUCT_ID) {
            Some(FamilyKind::ZigbeeAuditor)
        } else {
            None
        }
    }
}

/// An attached probe found during enumeration.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub family: FamilyKind,
    pub path: String,
    pub serial: Option<String>,
    pub product: Option<String>,
}

/// List every attached Bus Auditor and Zigbee Auditor.
///
/// Enumeration failures yield an empty list.
pub fn enumerate_devices() -> Vec<DiscoveredDevice> {
    let ids = [
        (BusFamily::VENDOR_ID, BusFamily::PRODUCT_ID),
        (ZigbeeFamily::VENDOR_ID, ZigbeeFamily::PRODUCT_ID),
    ];
    list_matching(&ids)
        .into_iter()
        .filter_map(|info| {
            let family = FamilyKind::from_ids(info.vendor_id, info.product_id)?;
            Some(DiscoveredDevice {
                family,
                path: info.path,
                serial: info.serial,
                product: info.product,
            })
        })
        .collect()
}
