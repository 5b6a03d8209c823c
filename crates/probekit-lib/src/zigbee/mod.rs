//! Zigbee Auditor: IEEE 802.15.4 radio control, sniffing, injection, scans.
//!
//! The handle mirrors the radio and sniffer state of the device so that a
//! call made in the wrong state fails before anything is sent. Bookkeeping
//! changes only once the matching control write went through.

pub mod crc;
pub mod nwkscan;
pub mod services;
pub mod sniffer;

use std::time::Duration;

use serde::Serialize;

pub use crc::crc16_kermit;
pub use nwkscan::{Beacon, NetworkScan, ZigbeeBeacon, channel_mask};
pub use services::{ZigbeeFamily, ZigbeeService};
pub use sniffer::{Assembled, FrameAssembler, FrameSink, SnifferFrame};

use crate::error::{ProbeError, Result, ValidationError};
use crate::family::{Family, Service};
use crate::poll::PollOptions;
use crate::service::{DeviceInfo, ServiceTable, ServiceTransport};
use crate::transport::{NusbTransport, TransportError, UsbTransport};
use nwkscan::{ScanAccumulator, ScanProgress};
use services::{MAC_FLAG_RADIO_ON, MAC_FLAG_SNIFFING, MAC_STATUS_LEN};

/// Lowest 2.4 GHz channel.
pub const MIN_CHANNEL: u8 = 11;
/// Highest 2.4 GHz channel.
pub const MAX_CHANNEL: u8 = 26;
/// Longest PSDU the radio transmits.
pub const MAX_INJECT_LEN: usize = sniffer::MAX_PSDU_LEN;

/// Interval between MAC status reads while waiting for power-up.
const RADIO_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioState {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnifferState {
    Off,
    On,
}

/// Flags reported by GET_MAC_STATUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MacStatus {
    pub radio_on: bool,
    pub sniffing: bool,
}

pub fn validate_channel(channel: u8, page: u8) -> std::result::Result<(), ValidationError> {
    if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        return Err(ValidationError::InvalidChannel(channel));
    }
    if page != 0 {
        return Err(ValidationError::InvalidPage(page));
    }
    Ok(())
}

/// Handle to one Zigbee Auditor.
pub struct ZigbeeAuditor<T: UsbTransport = NusbTransport> {
    inner: ServiceTransport<T, ZigbeeFamily>,
    poll: PollOptions,
    radio: RadioState,
    sniffer: SnifferState,
    channel: u8,
    assembler: FrameAssembler,
    tx_count: u64,
    rx_count: u64,
}

impl ZigbeeAuditor<NusbTransport> {
    /// Open the first attached Zigbee Auditor, or the one with `serial`.
    pub fn open(serial: &str) -> Result<Self> {
        let transport =
            NusbTransport::open(ZigbeeFamily::VENDOR_ID, ZigbeeFamily::PRODUCT_ID, serial)?;
        Self::with_transport(transport)
    }
}

impl<T: UsbTransport> ZigbeeAuditor<T> {
    pub fn with_transport(transport: T) -> Result<Self> {
        Ok(Self {
            inner: ServiceTransport::new(transport)?,
            poll: PollOptions::default(),
            radio: RadioState::Off,
            sniffer: SnifferState::Off,
            channel: MIN_CHANNEL,
            assembler: FrameAssembler::new(),
            tx_count: 0,
            rx_count: 0,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    pub fn services(&self) -> &ServiceTable<ZigbeeService> {
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

    pub fn radio_state(&self) -> RadioState {
        self.radio
    }

    pub fn sniffer_state(&self) -> SnifferState {
        self.sniffer
    }

    /// Channel last applied, or the default before any change.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Packets injected.
    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    /// Frames captured.
    pub fn rx_count(&self) -> u64 {
        self.rx_count
    }

    /// Query the radio flags from the device.
    pub fn mac_status(&self) -> Result<MacStatus> {
        let status = self
            .inner
            .read_status(ZigbeeService::GetMacStatus, MAC_STATUS_LEN)?;
        let flags = status.first().copied().unwrap_or_default();
        Ok(MacStatus {
            radio_on: flags & MAC_FLAG_RADIO_ON != 0,
            sniffing: flags & MAC_FLAG_SNIFFING != 0,
        })
    }

    /// Power the radio and wait until the MAC reports it up.
    ///
    /// [`radio_state`](Self::radio_state) becomes `On` only once the status
    /// read confirms it. If polling is cancelled or times out after the power
    /// write, the state stays `Off` even though the radio may be up; calling
    /// again re-sends the write and resumes polling.
    pub fn radio_on(&mut self) -> Result<()> {
        self.inner.require(ZigbeeService::SetMacPower)?;
        self.inner.require(ZigbeeService::GetMacStatus)?;
        if self.radio == RadioState::On {
            return Ok(());
        }
        self.inner.request(ZigbeeService::SetMacPower, 1, 0, &[])?;
        let mut poller = self.poll.start();
        while !self.mac_status()?.radio_on {
            poller.sleep(RADIO_POLL_INTERVAL)?;
        }
        self.radio = RadioState::On;
        log::debug!("radio on");
        Ok(())
    }

    /// Power the radio down, stopping the sniffer first.
    pub fn radio_off(&mut self) -> Result<()> {
        self.inner.require(ZigbeeService::SetMacPower)?;
        if self.radio == RadioState::Off {
            return Ok(());
        }
        if self.sniffer == SnifferState::On {
            self.sniffer_off()?;
        }
        self.inner.request(ZigbeeService::SetMacPower, 0, 0, &[])?;
        self.radio = RadioState::Off;
        log::debug!("radio off");
        Ok(())
    }

    fn write_capture(&mut self, on: bool) -> Result<()> {
        self.inner
            .request(ZigbeeService::RawCapture, u16::from(on), 0, &[])?;
        self.sniffer = if on {
            SnifferState::On
        } else {
            self.assembler.clear();
            SnifferState::Off
        };
        log::debug!("sniffer {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Tune the radio. A running capture is stopped around the change.
    pub fn set_channel(&mut self, channel: u8, page: u8) -> Result<()> {
        validate_channel(channel, page)?;
        self.inner.require(ZigbeeService::SetChannel)?;
        if self.radio != RadioState::On {
            return Err(ProbeError::RadioOff);
        }
        let sniffing = self.sniffer == SnifferState::On;
        if sniffing {
            self.inner.require(ZigbeeService::RawCapture)?;
            self.write_capture(false)?;
        }
        self.inner.request(
            ZigbeeService::SetChannel,
            u16::from(channel),
            u16::from(page),
            &[],
        )?;
        self.channel = channel;
        log::debug!("channel {channel}");
        if sniffing {
            self.write_capture(true)?;
        }
        Ok(())
    }

    /// Start capturing on `channel`, powering the radio if needed.
    pub fn sniffer_on(&mut self, channel: u8, page: u8) -> Result<()> {
        validate_channel(channel, page)?;
        self.inner.require(ZigbeeService::RawCapture)?;
        self.inner.require(ZigbeeService::SetChannel)?;
        self.radio_on()?;
        if !(self.sniffer == SnifferState::On && self.channel == channel) {
            self.set_channel(channel, page)?;
        }
        if self.sniffer == SnifferState::Off {
            self.write_capture(true)?;
        }
        Ok(())
    }

    pub fn sniffer_off(&mut self) -> Result<()> {
        self.inner.require(ZigbeeService::RawCapture)?;
        if self.sniffer == SnifferState::Off {
            return Ok(());
        }
        self.write_capture(false)
    }

    /// Transmit one raw PSDU.
    pub fn inject_packet(&mut self, psdu: &[u8]) -> Result<()> {
        self.inner.require(ZigbeeService::RawInject)?;
        if psdu.is_empty() || psdu.len() > MAX_INJECT_LEN {
            return Err(ValidationError::PayloadLength {
                len: psdu.len(),
                max: MAX_INJECT_LEN,
            }
            .into());
        }
        self.inner.request(ZigbeeService::RawInject, 0, 0, psdu)?;
        self.tx_count += 1;
        Ok(())
    }

    /// Read the next captured frame.
    ///
    /// Starts the sniffer on the current channel if it is off. `Ok(None)`
    /// when nothing arrived within `timeout` or the bytes read were noise.
    pub fn device_read(&mut self, timeout: Duration) -> Result<Option<SnifferFrame>> {
        if self.sniffer == SnifferState::Off {
            self.sniffer_on(self.channel, 0)?;
        }
        match self.assembler.next_frame()? {
            Assembled::Frame(frame) => return Ok(Some(self.received(frame))),
            Assembled::Noise => return Ok(None),
            Assembled::Incomplete => {}
        }

        let max_len = self.transport().max_packet_size();
        let mut poller = self.poll.start();
        loop {
            let chunk = match self.inner.transport().bulk_read(max_len, timeout) {
                Ok(chunk) => chunk,
                Err(TransportError::Timeout) if self.assembler.is_empty() => return Ok(None),
                Err(TransportError::Timeout) => {
                    poller.idle()?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match self.assembler.push(&chunk)? {
                Assembled::Frame(frame) => return Ok(Some(self.received(frame))),
                Assembled::Noise => return Ok(None),
                Assembled::Incomplete => {}
            }
        }
    }

    fn received(&mut self, frame: SnifferFrame) -> SnifferFrame {
        self.rx_count += 1;
        log::trace!(
            "frame {} bytes @ {}us{}",
            frame.payload.len(),
            frame.timestamp,
            if frame.crc_valid { "" } else { " (fcs recomputed)" }
        );
        frame
    }

    /// Feed captured frames to `sink` until `count` were written.
    ///
    /// `None` captures until the poll options cancel or time out.
    pub fn capture(&mut self, count: Option<usize>, sink: &mut dyn FrameSink) -> Result<usize> {
        let timeout = self.poll.read_timeout;
        let mut poller = self.poll.start();
        let mut written = 0;
        while count.is_none_or(|n| written < n) {
            match self.device_read(timeout)? {
                Some(frame) => {
                    sink.write_frame(&frame)?;
                    written += 1;
                    poller.check()?;
                }
                None => poller.idle()?,
            }
        }
        Ok(written)
    }

    /// Scan `channel_mask` for beacons.
    ///
    /// Stops a running capture and leaves the radio off afterwards.
    /// `Ok(None)` when the probe returned no usable result.
    pub fn scan(&mut self, channel_mask: u32) -> Result<Option<NetworkScan>> {
        self.inner.require(ZigbeeService::NetworkScan)?;
        nwkscan::validate_mask(channel_mask)?;
        if self.sniffer == SnifferState::On {
            self.sniffer_off()?;
        }
        self.radio_on()?;
        log::info!(
            "scanning channels {:?}",
            nwkscan::mask_channels(channel_mask)
        );
        self.inner.request(
            ZigbeeService::NetworkScan,
            0,
            0,
            &channel_mask.to_be_bytes(),
        )?;

        let service = ZigbeeService::NetworkScan.code();
        let mut acc = ScanAccumulator::new(service, ZigbeeFamily::ERROR_MESSAGES);
        let max_len = self.transport().max_packet_size();
        let mut poller = self.poll.start();
        loop {
            let chunk = match self
                .inner
                .transport()
                .bulk_read(max_len, poller.read_timeout())
            {
                Ok(chunk) => chunk,
                Err(TransportError::Timeout) => {
                    poller.idle()?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if acc.push(&chunk)? == ScanProgress::Done {
                break;
            }
        }
        log::debug!("scan complete, {} data byte(s)", acc.data_len());
        self.radio_off()?;
        Ok(acc.finish())
    }

    /// Turn the radio off and release the device.
    pub fn close(mut self) {
        if let Err(e) = self.radio_off() {
            log::warn!("failed to power down radio on close: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const ALL: u32 = 0x3F;
    const MAC_STATUS: u8 = 0x11;

    fn auditor(mask: u32) -> ZigbeeAuditor<MockTransport> {
        let z = ZigbeeAuditor::with_transport(MockTransport::with_services(mask)).unwrap();
        z.transport().set_sticky_read(MAC_STATUS, vec![0x91, 1, 0, 0x01]);
        z.transport().clear_log();
        z
    }

    fn capture_bytes(psdu: &[u8]) -> Vec<u8> {
        let mut v = vec![sniffer::SOF];
        v.extend_from_slice(&((psdu.len() + 5) as u16).to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes());
        v.push(psdu.len() as u8);
        v.extend_from_slice(psdu);
        v
    }

    #[test]
    fn initial_state() {
        let z = auditor(ALL);
        assert_eq!(z.radio_state(), RadioState::Off);
        assert_eq!(z.sniffer_state(), SnifferState::Off);
        assert_eq!(z.channel(), 11);
        assert_eq!(z.tx_count(), 0);
    }

    #[test]
    fn radio_on_polls_until_powered() {
        let z = &mut auditor(ALL);
        z.transport()
            .push_control_read(MAC_STATUS, vec![0x91, 1, 0, 0x00]);
        z.radio_on().unwrap();
        assert_eq!(z.radio_state(), RadioState::On);
        assert_eq!(z.transport().control_read_log.borrow().len(), 2);
        let writes = z.transport().writes_for(0x10);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].value, 1);

        z.radio_on().unwrap();
        assert_eq!(z.transport().writes_for(0x10).len(), 1);
    }

    #[test]
    fn radio_on_cancelled_before_confirmation_stays_off() {
        use crate::poll::{CancelToken, PollOptions};

        let z = &mut auditor(ALL);
        z.transport()
            .push_control_read(MAC_STATUS, vec![0x91, 1, 0, 0x00]);
        let token = CancelToken::new();
        token.cancel();
        z.set_poll_options(PollOptions::default().with_cancel(token));
        assert!(matches!(z.radio_on(), Err(ProbeError::Cancelled)));
        assert_eq!(z.transport().writes_for(0x10).len(), 1);
        assert_eq!(z.radio_state(), RadioState::Off);

        z.set_poll_options(PollOptions::default());
        z.radio_on().unwrap();
        assert_eq!(z.transport().writes_for(0x10).len(), 2);
        assert_eq!(z.radio_state(), RadioState::On);
    }

    #[test]
    fn set_channel_requires_radio() {
        let z = &mut auditor(ALL);
        assert!(matches!(z.set_channel(15, 0), Err(ProbeError::RadioOff)));
        assert_eq!(z.transport().io_count(), 0);
    }

    #[test]
    fn set_channel_validates_first() {
        let z = &mut auditor(ALL);
        assert!(matches!(
            z.set_channel(27, 0),
            Err(ProbeError::Validation(ValidationError::InvalidChannel(27)))
        ));
        assert!(matches!(
            z.set_channel(15, 2),
            Err(ProbeError::Validation(ValidationError::InvalidPage(2)))
        ));
        assert!(matches!(
            z.sniffer_on(10, 0),
            Err(ProbeError::Validation(ValidationError::InvalidChannel(10)))
        ));
        assert_eq!(z.transport().io_count(), 0);
    }

    #[test]
    fn sniffer_on_powers_radio() {
        let z = &mut auditor(ALL);
        z.sniffer_on(20, 0).unwrap();
        assert_eq!(z.radio_state(), RadioState::On);
        assert_eq!(z.sniffer_state(), SnifferState::On);
        assert_eq!(z.channel(), 20);
        assert_eq!(z.transport().write_requests(), vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn sniffer_on_same_channel_is_noop() {
        let z = &mut auditor(ALL);
        z.sniffer_on(20, 0).unwrap();
        z.transport().clear_log();
        z.sniffer_on(20, 0).unwrap();
        assert!(z.transport().write_requests().is_empty());
    }

    #[test]
    fn retune_while_sniffing_restarts_capture() {
        let z = &mut auditor(ALL);
        z.sniffer_on(11, 0).unwrap();
        z.transport().clear_log();
        z.set_channel(25, 0).unwrap();
        let writes = z.transport().control_writes.borrow().clone();
        let seq: Vec<(u8, u16)> = writes.iter().map(|w| (w.request, w.value)).collect();
        assert_eq!(seq, vec![(0x30, 0), (0x20, 25), (0x30, 1)]);
        assert_eq!(z.sniffer_state(), SnifferState::On);
    }

    #[test]
    fn radio_off_stops_sniffer() {
        let z = &mut auditor(ALL);
        z.sniffer_on(15, 0).unwrap();
        z.radio_off().unwrap();
        assert_eq!(z.sniffer_state(), SnifferState::Off);
        assert_eq!(z.radio_state(), RadioState::Off);
    }

    #[test]
    fn failed_write_keeps_state() {
        let z = &mut auditor(ALL);
        z.sniffer_on(15, 0).unwrap();
        *z.transport().fail_writes.borrow_mut() = Some("unplugged".into());
        assert!(z.radio_off().is_err());
        assert_eq!(z.sniffer_state(), SnifferState::On);
        assert_eq!(z.radio_state(), RadioState::On);
    }

    #[test]
    fn inject_counts_and_validates() {
        let z = &mut auditor(ALL);
        z.inject_packet(&[0x03, 0x08, 0x01, 0xFF, 0xFF]).unwrap();
        assert_eq!(z.tx_count(), 1);
        assert!(matches!(
            z.inject_packet(&[]),
            Err(ProbeError::Validation(ValidationError::PayloadLength { len: 0, .. }))
        ));
        assert!(matches!(
            z.inject_packet(&[0; 128]),
            Err(ProbeError::Validation(_))
        ));
        assert_eq!(z.tx_count(), 1);
    }

    #[test]
    fn unsupported_inject_does_no_io() {
        let z = &mut auditor(ALL & !(1 << 4));
        assert!(matches!(
            z.inject_packet(&[1, 2]),
            Err(ProbeError::ServiceNotSupported("RAW_INJECT"))
        ));
        assert_eq!(z.transport().io_count(), 0);
    }

    #[test]
    fn device_read_starts_sniffer_and_reads_frame() {
        let z = &mut auditor(ALL);
        let bytes = capture_bytes(&[0x41, 0x88, 0x80]);
        z.transport().push_bulk(bytes);
        let frame = z.device_read(Duration::from_millis(10)).unwrap().unwrap();
        assert!(frame.crc_valid);
        assert_eq!(z.sniffer_state(), SnifferState::On);
        assert_eq!(z.rx_count(), 1);
    }

    #[test]
    fn device_read_timeout_when_idle_is_none() {
        let z = &mut auditor(ALL);
        z.transport().push_bulk_timeout();
        assert!(z.device_read(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn device_read_waits_through_mid_frame_timeout() {
        let z = &mut auditor(ALL);
        let bytes = capture_bytes(&[0x01; 70]);
        z.transport().push_bulk(bytes[..64].to_vec());
        z.transport().push_bulk_timeout();
        z.transport().push_bulk(bytes[64..].to_vec());
        let frame = z.device_read(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 70);
        assert!(!frame.crc_valid);
    }

    #[test]
    fn capture_into_sink() {
        let z = &mut auditor(ALL);
        z.transport().push_bulk(capture_bytes(&[1, 2, 0x80]));
        z.transport().push_bulk(vec![0x00, 0x01]);
        z.transport().push_bulk_timeout();
        z.transport().push_bulk(capture_bytes(&[3, 4, 0x80]));
        let mut sink: Vec<SnifferFrame> = Vec::new();
        assert_eq!(z.capture(Some(2), &mut sink).unwrap(), 2);
        assert_eq!(sink.len(), 2);
        assert_eq!(z.rx_count(), 2);
    }

    #[test]
    fn scan_stops_sniffer_and_turns_radio_off() {
        let z = &mut auditor(ALL);
        z.sniffer_on(11, 0).unwrap();
        let mock = z.transport();
        mock.push_bulk(vec![0xC0, 1, 0]);
        let mut data = vec![0xC0];
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0);
        mock.push_bulk(data);
        mock.push_bulk(vec![0xC0, 1, 0xFF]);

        let mask = channel_mask(&[11, 15]).unwrap();
        let scan = z.scan(mask).unwrap().unwrap();
        assert_eq!(scan.device_count, 0);
        assert_eq!(z.radio_state(), RadioState::Off);
        assert_eq!(z.sniffer_state(), SnifferState::Off);
        let writes = z.transport().writes_for(0x40);
        assert_eq!(writes[0].data, mask.to_be_bytes().to_vec());
    }

    #[test]
    fn scan_rejects_bad_mask() {
        let z = &mut auditor(ALL);
        assert!(matches!(
            z.scan(0),
            Err(ProbeError::Validation(ValidationError::InvalidChannelMask(0)))
        ));
        assert!(matches!(
            z.scan(1 << 3),
            Err(ProbeError::Validation(_))
        ));
        assert_eq!(z.transport().io_count(), 0);
    }

    #[test]
    fn close_is_best_effort() {
        let mut z = auditor(ALL);
        z.radio_on().unwrap();
        *z.transport().fail_writes.borrow_mut() = Some("unplugged".into());
        z.close();
    }
}
