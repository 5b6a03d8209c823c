//! Zigbee Auditor service catalog.

use crate::family::{Family, Service};
use crate::protocol;

/// Zigbee Auditor (IEEE 802.15.4 radio probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZigbeeFamily;

impl Family for ZigbeeFamily {
    type Service = ZigbeeService;

    const NAME: &'static str = "Zigbee Auditor";
    const VENDOR_ID: u16 = 0x1915;
    const PRODUCT_ID: u16 = 0x521A;
    const ERROR_MESSAGES: &'static [&'static str] = &protocol::ERROR_MESSAGES;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZigbeeService {
    SetMacPower,
    GetMacStatus,
    SetChannel,
    RawCapture,
    RawInject,
    NetworkScan,
}

impl Service for ZigbeeService {
    const ALL: &'static [Self] = &[
        ZigbeeService::SetMacPower,
        ZigbeeService::GetMacStatus,
        ZigbeeService::SetChannel,
        ZigbeeService::RawCapture,
        ZigbeeService::RawInject,
        ZigbeeService::NetworkScan,
    ];

    fn code(self) -> u8 {
        match self {
            ZigbeeService::SetMacPower => 0x10,
            ZigbeeService::GetMacStatus => 0x11,
            ZigbeeService::SetChannel => 0x20,
            ZigbeeService::RawCapture => 0x30,
            ZigbeeService::RawInject => 0x31,
            ZigbeeService::NetworkScan => 0x40,
        }
    }

    fn bit(self) -> u8 {
        match self {
            ZigbeeService::SetMacPower => 0,
            ZigbeeService::GetMacStatus => 1,
            ZigbeeService::SetChannel => 2,
            ZigbeeService::RawCapture => 3,
            ZigbeeService::RawInject => 4,
            ZigbeeService::NetworkScan => 5,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ZigbeeService::SetMacPower => "SET_MAC_POWER",
            ZigbeeService::GetMacStatus => "GET_MAC_STATUS",
            ZigbeeService::SetChannel => "SET_CH_CHNG",
            ZigbeeService::RawCapture => "RAW_CAPTURE",
            ZigbeeService::RawInject => "RAW_INJECT",
            ZigbeeService::NetworkScan => "NWK_SCAN",
        }
    }
}

/// `[0x91, 1, status, flags]`.
pub const MAC_STATUS_LEN: usize = 4;

/// MAC status flag: radio powered.
pub const MAC_FLAG_RADIO_ON: u8 = 0x01;

/// MAC status flag: raw capture running.
pub const MAC_FLAG_SNIFFING: u8 = 0x02;
