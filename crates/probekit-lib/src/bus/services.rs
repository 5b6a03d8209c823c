//! Bus Auditor service catalog.

use crate::family::{Family, Service};
use crate::protocol;

/// Bus Auditor (JTAG/SWD/UART/I2C discovery probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFamily;

impl Family for BusFamily {
    type Service = BusService;

    const NAME: &'static str = "Bus Auditor";
    const VENDOR_ID: u16 = 0x0483;
    const PRODUCT_ID: u16 = 0xBA20;
    const ERROR_MESSAGES: &'static [&'static str] = &protocol::ERROR_MESSAGES;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusService {
    JtagIdcodeScan,
    JtagIdcodeScanTrst,
    JtagPatternScan,
    JtagPatternScanTrst,
    SwdIdcodeScan,
    UartTxScan,
    UartTxRxScan,
    I2cAddrScan,
}

impl BusService {
    pub fn jtag_idcode(trst: bool) -> Self {
        if trst {
            BusService::JtagIdcodeScanTrst
        } else {
            BusService::JtagIdcodeScan
        }
    }

    pub fn jtag_pattern(trst: bool) -> Self {
        if trst {
            BusService::JtagPatternScanTrst
        } else {
            BusService::JtagPatternScan
        }
    }
}

impl Service for BusService {
    const ALL: &'static [Self] = &[
        BusService::JtagIdcodeScan,
        BusService::JtagIdcodeScanTrst,
        BusService::JtagPatternScan,
        BusService::JtagPatternScanTrst,
        BusService::SwdIdcodeScan,
        BusService::UartTxScan,
        BusService::UartTxRxScan,
        BusService::I2cAddrScan,
    ];

    fn code(self) -> u8 {
        match self {
            BusService::JtagIdcodeScan => 0x10,
            BusService::JtagIdcodeScanTrst => 0x11,
            BusService::JtagPatternScan => 0x12,
            BusService::JtagPatternScanTrst => 0x13,
            BusService::SwdIdcodeScan => 0x20,
            BusService::UartTxScan => 0x30,
            BusService::UartTxRxScan => 0x31,
            BusService::I2cAddrScan => 0x40,
        }
    }

    fn bit(self) -> u8 {
        match self {
            BusService::JtagIdcodeScan => 0,
            BusService::JtagIdcodeScanTrst => 1,
            BusService::JtagPatternScan => 2,
            BusService::JtagPatternScanTrst => 3,
            BusService::SwdIdcodeScan => 4,
            BusService::UartTxScan => 5,
            BusService::UartTxRxScan => 6,
            BusService::I2cAddrScan => 7,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BusService::JtagIdcodeScan => "JTAG_IDCODE_SCAN",
            BusService::JtagIdcodeScanTrst => "JTAG_IDCODE_SCAN_TRST",
            BusService::JtagPatternScan => "JTAG_PATTERN_SCAN",
            BusService::JtagPatternScanTrst => "JTAG_PATTERN_SCAN_TRST",
            BusService::SwdIdcodeScan => "SWD_IDCODE_SCAN",
            BusService::UartTxScan => "UART_TX_SCAN",
            BusService::UartTxRxScan => "UART_TXRX_SCAN",
            BusService::I2cAddrScan => "I2C_ADDR_SCAN",
        }
    }
}
