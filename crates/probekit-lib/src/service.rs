//! Service registry and request plumbing shared by both families.
//!
//! [`ServiceTransport`] is opened once per physical device. It learns the
//! firmware revision and the capability mask, then gates every request on
//! that mask so unsupported services fail before touching the bus.

use std::marker::PhantomData;
use std::time::Duration;

use serde::Serialize;

use crate::error::{ProbeError, Result};
use crate::family::{Family, Service};
use crate::frame::{ResponseFrame, collect_frames};
use crate::poll::Poller;
use crate::protocol::{
    CONTROL_TIMEOUT_MS, DEVICE_INFO_LEN, ERROR_MESSAGES, FRAME_HEADER_SIZE, SERVICES_LEN, STATUS_OK,
    SVC_GET_DEVICE_INFO, SVC_GET_SERVICES, device_error, response_byte,
};
use crate::transport::UsbTransport;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(CONTROL_TIMEOUT_MS);

/// Which services the firmware advertises. Fixed at open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTable<S: Service> {
    mask: u32,
    _service: PhantomData<S>,
}

impl<S: Service> ServiceTable<S> {
    pub fn from_mask(mask: u32) -> Self {
        Self {
            mask,
            _service: PhantomData,
        }
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn is_supported(&self, service: S) -> bool {
        service.bit() < 32 && self.mask & (1 << service.bit()) != 0
    }

    /// Status of every known service, in capability-bit order.
    pub fn entries(&self) -> Vec<ServiceStatus> {
        S::ALL
            .iter()
            .map(|&s| ServiceStatus {
                name: s.name(),
                code: s.code(),
                supported: self.is_supported(s),
            })
            .collect()
    }
}

/// One row of a [`ServiceTable`], for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: &'static str,
    pub code: u8,
    pub supported: bool,
}

/// Identity of an opened probe.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub family: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: String,
    pub serial: Option<String>,
    pub product: Option<String>,
    pub max_packet_size: usize,
    pub firmware_version: String,
    pub hardware_version: String,
}

/// Transport plus the family's service table.
pub struct ServiceTransport<T: UsbTransport, F: Family> {
    transport: T,
    info: DeviceInfo,
    services: ServiceTable<F::Service>,
}

impl<T: UsbTransport, F: Family> ServiceTransport<T, F> {
    /// Query device info and the capability mask.
    ///
    /// Device info is best effort; a failing GET_SERVICES fails the open.
    pub fn new(transport: T) -> Result<Self> {
        let (firmware_version, hardware_version) = match read_revision(&transport) {
            Ok(rev) => rev,
            Err(e) => {
                log::warn!("{}: device info unavailable: {e}", F::NAME);
                ("unknown".to_string(), "unknown".to_string())
            }
        };
        let mask = read_services_mask(&transport, F::ERROR_MESSAGES)?;
        let services = ServiceTable::from_mask(mask);

        let usb = transport.usb_info();
        let info = DeviceInfo {
            family: F::NAME,
            vendor_id: usb.vendor_id,
            product_id: usb.product_id,
            path: usb.path.clone(),
            serial: usb.serial.clone(),
            product: usb.product.clone(),
            max_packet_size: transport.max_packet_size(),
            firmware_version,
            hardware_version,
        };
        log::debug!(
            "{} firmware {} hardware {}, services 0x{mask:08x}",
            F::NAME,
            info.firmware_version,
            info.hardware_version
        );

        Ok(Self {
            transport,
            info,
            services,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn services(&self) -> &ServiceTable<F::Service> {
        &self.services
    }

    /// Fail with `ServiceNotSupported` unless the firmware advertises `service`.
    pub fn require(&self, service: F::Service) -> Result<()> {
        if self.services.is_supported(service) {
            Ok(())
        } else {
            Err(ProbeError::ServiceNotSupported(service.name()))
        }
    }

    /// Send a service request as a vendor control write.
    pub fn request(&self, service: F::Service, value: u16, index: u16, payload: &[u8]) -> Result<()> {
        self.require(service)?;
        self.transport
            .control_write(service.code(), value, index, payload, CONTROL_TIMEOUT)?;
        Ok(())
    }

    /// Read a short status response through a control IN transfer.
    ///
    /// Returns the bytes following the `[svc, len, status]` header.
    pub fn read_status(&self, service: F::Service, len: usize) -> Result<Vec<u8>> {
        self.require(service)?;
        let data = self
            .transport
            .control_read(service.code(), 0, 0, len, CONTROL_TIMEOUT)?;
        check_header(&data, service.code(), len, F::ERROR_MESSAGES)?;
        Ok(data[FRAME_HEADER_SIZE..len.max(FRAME_HEADER_SIZE)].to_vec())
    }

    /// Request `service` and collect its frames until the end marker.
    pub fn invoke(
        &self,
        service: F::Service,
        payload: &[u8],
        poller: &mut Poller,
    ) -> Result<Vec<ResponseFrame>> {
        self.request(service, 0, 0, payload)?;
        collect_frames(&self.transport, service.code(), F::ERROR_MESSAGES, poller)
    }
}

/// Validate a control IN response: length, service byte, status.
fn check_header(
    data: &[u8],
    service: u8,
    expected_len: usize,
    errors: &'static [&'static str],
) -> Result<()> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(ProbeError::MalformedResponse(format!(
            "service 0x{service:02x}: {}-byte response",
            data.len()
        )));
    }
    if data[0] != response_byte(service) {
        return Err(ProbeError::MalformedResponse(format!(
            "service 0x{service:02x}: response byte 0x{:02x}",
            data[0]
        )));
    }
    if data[2] != STATUS_OK {
        return Err(device_error(data[2], errors));
    }
    if data.len() < expected_len {
        return Err(ProbeError::MalformedResponse(format!(
            "service 0x{service:02x}: expected {expected_len} bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}

fn read_revision<T: UsbTransport>(transport: &T) -> Result<(String, String)> {
    let data = transport.control_read(
        SVC_GET_DEVICE_INFO,
        0,
        0,
        DEVICE_INFO_LEN,
        CONTROL_TIMEOUT,
    )?;
    check_header(&data, SVC_GET_DEVICE_INFO, DEVICE_INFO_LEN, &ERROR_MESSAGES)?;
    Ok((
        format!("{}.{}.{}", data[3], data[4], data[5]),
        format!("{}.{}", data[6], data[7]),
    ))
}

fn read_services_mask<T: UsbTransport>(
    transport: &T,
    errors: &'static [&'static str],
) -> Result<u32> {
    let data = transport.control_read(SVC_GET_SERVICES, 0, 0, SERVICES_LEN, CONTROL_TIMEOUT)?;
    check_header(&data, SVC_GET_SERVICES, SERVICES_LEN, errors)?;
    Ok(u32::from_le_bytes([data[3], data[4], data[5], data[6]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusFamily, BusService};
    use crate::transport::TransportError;
    use crate::transport::mock::MockTransport;

    type Bus = ServiceTransport<MockTransport, BusFamily>;

    #[test]
    fn open_reads_revision_and_mask() {
        let mock = MockTransport::with_services(0b0000_0101);
        let st = Bus::new(mock).unwrap();
        assert_eq!(st.info().firmware_version, "1.2.3");
        assert_eq!(st.info().hardware_version, "2.0");
        assert_eq!(st.info().max_packet_size, 64);
        assert!(st.services().is_supported(BusService::JtagIdcodeScan));
        assert!(!st.services().is_supported(BusService::JtagIdcodeScanTrst));
        assert!(st.services().is_supported(BusService::JtagPatternScan));
    }

    #[test]
    fn open_tolerates_missing_device_info() {
        let mock = MockTransport::new();
        mock.push_control_read_error(SVC_GET_DEVICE_INFO, TransportError::Timeout);
        mock.push_control_read(SVC_GET_SERVICES, vec![0x82, 4, 0, 0xFF, 0, 0, 0]);
        let st = Bus::new(mock).unwrap();
        assert_eq!(st.info().firmware_version, "unknown");
        assert_eq!(st.services().mask(), 0xFF);
    }

    #[test]
    fn open_fails_without_services() {
        let mock = MockTransport::new();
        mock.push_control_read(SVC_GET_DEVICE_INFO, vec![0x81, 5, 0, 1, 0, 0, 1, 0]);
        mock.push_control_read(SVC_GET_SERVICES, vec![0x82, 1, 2]);
        assert!(matches!(
            Bus::new(mock),
            Err(ProbeError::Service { code: 2, .. })
        ));
    }

    #[test]
    fn open_rejects_short_services_response() {
        let mock = MockTransport::new();
        mock.push_control_read(SVC_GET_DEVICE_INFO, vec![0x81, 5, 0, 1, 0, 0, 1, 0]);
        mock.push_control_read(SVC_GET_SERVICES, vec![0x82, 4, 0, 1]);
        assert!(matches!(
            Bus::new(mock),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn require_unsupported_does_no_io() {
        let st = Bus::new(MockTransport::with_services(0)).unwrap();
        st.transport().clear_log();
        let err = st.request(BusService::I2cAddrScan, 0, 0, &[]).unwrap_err();
        assert!(matches!(err, ProbeError::ServiceNotSupported("I2C_ADDR_SCAN")));
        assert_eq!(st.transport().io_count(), 0);
    }

    #[test]
    fn invoke_writes_then_collects() {
        let st = Bus::new(MockTransport::with_services(1 << 7)).unwrap();
        st.transport().push_bulk(vec![0xC0, 1, 0]);
        st.transport().push_bulk(vec![0xC0, 3, 0, 1, 2, 0x50]);
        st.transport().push_bulk(vec![0xC0, 0]);
        let mut poller = crate::poll::PollOptions::default().start();
        let frames = st
            .invoke(BusService::I2cAddrScan, &[0, 15, 3, 3], &mut poller)
            .unwrap();
        assert_eq!(frames.len(), 1);
        let writes = st.transport().writes_for(0x40);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, vec![0, 15, 3, 3]);
    }

    #[test]
    fn entries_list_every_service() {
        let table = ServiceTable::<BusService>::from_mask(0b1000_0001);
        let entries = table.entries();
        assert_eq!(entries.len(), BusService::ALL.len());
        assert!(entries[0].supported);
        assert!(!entries[1].supported);
        assert!(entries[7].supported);
    }

    #[test]
    fn check_header_status_before_length() {
        let err = check_header(&[0x91, 1, 3], 0x11, 4, &ERROR_MESSAGES).unwrap_err();
        assert!(matches!(err, ProbeError::Service { code: 3, .. }));
    }
}
