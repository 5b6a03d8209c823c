//! Bus Auditor: JTAG / SWD / UART / I2C pin discovery.
//!
//! Every scan validates its arguments before touching USB, sends
//! `[start, end, volts_int, volts_frac]` to the scan service and decodes the
//! frames the probe streams back until its end marker.

pub mod decode;
pub mod scan;
pub mod services;

use std::time::Duration;

pub use decode::{
    DeviceIdentification, I2cPins, IdcodeRecord, JtagPins, PatternRecord, PinAssignment, SwdPins,
    UartCandidate, UartPins,
};
pub use scan::{MAX_PIN, ScanRange, Volts, permutations};
pub use services::{BusFamily, BusService};

use crate::error::Result;
use crate::family::Family;
use crate::frame::ResponseFrame;
use crate::poll::PollOptions;
use crate::service::{DeviceInfo, ServiceTable, ServiceTransport};
use crate::transport::{NusbTransport, UsbTransport};

/// Default pause between the IDCODE and pattern halves of a JTAG scan.
pub const DEFAULT_JTAG_SETTLE: Duration = Duration::from_millis(500);

/// Handle to one Bus Auditor.
pub struct BusAuditor<T: UsbTransport = NusbTransport> {
    inner: ServiceTransport<T, BusFamily>,
    poll: PollOptions,
    jtag_settle: Duration,
}

impl BusAuditor<NusbTransport> {
    /// Open the first attached Bus Auditor, or the one with `serial`.
    pub fn open(serial: &str) -> Result<Self> {
        let transport =
            NusbTransport::open(BusFamily::VENDOR_ID, BusFamily::PRODUCT_ID, serial)?;
        Self::with_transport(transport)
    }
}

impl<T: UsbTransport> BusAuditor<T> {
    pub fn with_transport(transport: T) -> Result<Self> {
        Ok(Self {
            inner: ServiceTransport::new(transport)?,
            poll: PollOptions::default(),
            jtag_settle: DEFAULT_JTAG_SETTLE,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    pub fn services(&self) -> &ServiceTable<BusService> {
        self.inner.services()
    }

    pub fn transport(&self) -> &T {
        self.inner.transport()
    }

    pub fn set_poll_options(&mut self, options: PollOptions) {
        self.poll = options;
    }

    pub fn poll_options(&self) -> &PollOptions {
        &self.poll
    }

    pub fn set_jtag_settle(&mut self, settle: Duration) {
        self.jtag_settle = settle;
    }

    fn run(&self, service: BusService, range: ScanRange, volts: Volts) -> Result<Vec<ResponseFrame>> {
        let mut poller = self.poll.start();
        self.inner
            .invoke(service, &scan::scan_payload(range, volts), &mut poller)
    }

    fn check_jtag(&self, range: &ScanRange, trst: bool, services: &[BusService]) -> Result<()> {
        range.validate()?;
        range.require_channels(scan::jtag_roles(trst))?;
        for &s in services {
            self.inner.require(s)?;
        }
        log::info!(
            "JTAG scan over pins {}-{}: {} permutations",
            range.start,
            range.end,
            permutations(range.channels(), scan::jtag_roles(trst))
        );
        Ok(())
    }

    fn check_pair(&self, range: &ScanRange, service: BusService) -> Result<()> {
        range.validate()?;
        self.inner.require(service)?;
        log::info!(
            "{} over pins {}-{}: {} permutations",
            service_label(service),
            range.start,
            range.end,
            permutations(range.channels(), 2)
        );
        Ok(())
    }

    fn idcode_frames(&self, range: ScanRange, volts: Volts, trst: bool) -> Result<Vec<IdcodeRecord>> {
        let frames = self.run(BusService::jtag_idcode(trst), range, volts)?;
        Ok(frames
            .iter()
            .filter_map(|f| decode::decode_idcode(f, trst))
            .collect())
    }

    fn pattern_frames(&self, range: ScanRange, volts: Volts, trst: bool) -> Result<Vec<PatternRecord>> {
        let frames = self.run(BusService::jtag_pattern(trst), range, volts)?;
        Ok(frames
            .iter()
            .filter_map(|f| decode::decode_pattern(f, trst))
            .collect())
    }

    /// Read IDCODEs on every TCK/TMS/TDO/TDI(/TRST) permutation in `range`.
    pub fn jtag_idcode_scan(
        &self,
        range: ScanRange,
        volts: Volts,
        trst: bool,
    ) -> Result<Vec<IdcodeRecord>> {
        self.check_jtag(&range, trst, &[BusService::jtag_idcode(trst)])?;
        self.idcode_frames(range, volts, trst)
    }

    /// Shift a test pattern through every permutation and report loopbacks.
    pub fn jtag_pattern_scan(
        &self,
        range: ScanRange,
        volts: Volts,
        trst: bool,
    ) -> Result<Vec<PatternRecord>> {
        self.check_jtag(&range, trst, &[BusService::jtag_pattern(trst)])?;
        self.pattern_frames(range, volts, trst)
    }

    /// IDCODE scan, settle, pattern scan, then keep pins both agree on.
    pub fn jtag_scan(
        &self,
        range: ScanRange,
        volts: Volts,
        trst: bool,
    ) -> Result<Vec<DeviceIdentification>> {
        self.check_jtag(
            &range,
            trst,
            &[BusService::jtag_idcode(trst), BusService::jtag_pattern(trst)],
        )?;
        let idcodes = self.idcode_frames(range, volts, trst)?;
        log::debug!("IDCODE scan: {} record(s)", idcodes.len());
        if !self.jtag_settle.is_zero() {
            std::thread::sleep(self.jtag_settle);
        }
        let patterns = self.pattern_frames(range, volts, trst)?;
        log::debug!(
            "pattern scan: {} record(s), {} matched",
            patterns.len(),
            patterns.iter().filter(|p| p.matched).count()
        );
        Ok(decode::correlate(&idcodes, &patterns))
    }

    /// Find SWCLK/SWDIO pairs answering with a DP IDCODE.
    pub fn swd_scan(&self, range: ScanRange, volts: Volts) -> Result<Vec<DeviceIdentification>> {
        self.check_pair(&range, BusService::SwdIdcodeScan)?;
        let frames = self.run(BusService::SwdIdcodeScan, range, volts)?;
        Ok(decode::dedup_swd(frames.iter().filter_map(decode::decode_swd)))
    }

    /// Look for UART traffic, passively first, then by provoking a response.
    pub fn uart_scan(&self, range: ScanRange, volts: Volts) -> Result<Vec<UartCandidate>> {
        self.check_pair(&range, BusService::UartTxScan)?;
        let frames = self.run(BusService::UartTxScan, range, volts)?;
        let mut candidates = decode::merge_uart(frames.iter().filter_map(decode::decode_uart));
        if candidates.is_empty() {
            if !self.services().is_supported(BusService::UartTxRxScan) {
                log::info!("no UART traffic on TX scan; firmware lacks UART_TXRX_SCAN");
                return Ok(candidates);
            }
            log::info!("no UART traffic on TX scan, retrying with TX+RX scan");
            let frames = self.run(BusService::UartTxRxScan, range, volts)?;
            candidates = decode::merge_uart(frames.iter().filter_map(decode::decode_uart));
        }
        Ok(candidates)
    }

    /// Find SCL/SDA pairs with devices acknowledging their address.
    pub fn i2c_scan(&self, range: ScanRange, volts: Volts) -> Result<Vec<DeviceIdentification>> {
        self.check_pair(&range, BusService::I2cAddrScan)?;
        let frames = self.run(BusService::I2cAddrScan, range, volts)?;
        Ok(frames.iter().flat_map(decode::decode_i2c).collect())
    }
}

fn service_label(service: BusService) -> &'static str {
    match service {
        BusService::SwdIdcodeScan => "SWD scan",
        BusService::UartTxScan | BusService::UartTxRxScan => "UART scan",
        BusService::I2cAddrScan => "I2C scan",
        _ => "JTAG scan",
    }
}
