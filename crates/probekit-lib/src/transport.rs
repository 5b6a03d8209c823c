//! USB transport: trait + nusb backend.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::protocol::{REQUEST_TYPE_IN, REQUEST_TYPE_OUT};

// ── Error type ──

/// USB transfer errors.
///
/// `Timeout` is recoverable: the caller decides whether to poll again.
/// `Fatal` payloads follow the convention **"context: details"** and are
/// never retried (device unplugged, permission denied, broken USB state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Fatal(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "USB transfer timed out"),
            TransportError::Fatal(e) => write!(f, "USB transfer failed: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

// ── USB identity ──

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsbInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Human-readable location, e.g. `usb:0483:ba20@007`.
    pub path: String,
    pub serial: Option<String>,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
}

// ── Trait ──

/// Raw transfer primitives used by every service call.
pub trait UsbTransport {
    fn usb_info(&self) -> &UsbInfo;

    /// Max packet size of the bulk IN endpoint, from its descriptor.
    fn max_packet_size(&self) -> usize;

    /// Vendor OUT control transfer (`bmRequestType = 0x40`).
    fn control_write(
        &self,
        request: u8,
        value: u16,
        index: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// Vendor IN control transfer (`bmRequestType = 0xC0`).
    fn control_read(
        &self,
        request: u8,
        value: u16,
        index: u16,
        expected_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    /// Read one chunk from the bulk IN endpoint. `Timeout` means no data yet.
    fn bulk_read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;
}

fn hex_preview(data: &[u8]) -> String {
    data.iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A failed setup step leaves the device unusable: fatal, named after the step.
fn setup_step<E: fmt::Display>(step: &str, result: std::result::Result<(), E>) -> Result<()> {
    result.map_err(|e| TransportError::Fatal(format!("{step}: {e}")))
}

// ── nusb implementation ──

mod nusb_impl {
    use super::*;
    use std::sync::Mutex;

    use nusb::MaybeFuture;
    use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Recipient, TransferError};

    use crate::error::ProbeError;
    use crate::protocol::{BULK_IN_ENDPOINT, USB_CONFIGURATION, USB_INTERFACE};

    /// How long to wait for a cancelled bulk transfer to be reaped.
    const CANCEL_REAP: Duration = Duration::from_millis(50);

    pub struct NusbTransport {
        interface: nusb::Interface,
        bulk_in: Mutex<nusb::Endpoint<Bulk, In>>,
        info: UsbInfo,
        max_packet_size: usize,
    }

    fn map_transfer_error(context: &str, e: TransferError) -> TransportError {
        match e {
            // nusb reports an expired timeout as a cancelled transfer.
            TransferError::Cancelled => TransportError::Timeout,
            other => TransportError::Fatal(format!("{context}: {other}")),
        }
    }

    impl NusbTransport {
        /// Open the first device matching `vendor_id:product_id`.
        ///
        /// If `serial` is non-empty only a device with that serial number
        /// (case-insensitive) is accepted. Runs the reset + set-configuration
        /// sequence the firmware expects before any transfer.
        pub fn open(
            vendor_id: u16,
            product_id: u16,
            serial: &str,
        ) -> crate::error::Result<Self> {
            let serial = serial.trim();
            let device_info = nusb::list_devices()
                .wait()
                .map_err(|e| TransportError::Fatal(format!("USB enumeration: {e}")))?
                .filter(|dev| dev.vendor_id() == vendor_id && dev.product_id() == product_id)
                .find(|dev| {
                    serial.is_empty()
                        || dev
                            .serial_number()
                            .is_some_and(|s| s.eq_ignore_ascii_case(serial))
                })
                .ok_or(ProbeError::NotFound)?;

            let info = UsbInfo {
                vendor_id,
                product_id,
                path: format!(
                    "usb:{vendor_id:04x}:{product_id:04x}@{:03}",
                    device_info.device_address()
                ),
                serial: device_info.serial_number().map(|s| s.to_string()),
                product: device_info.product_string().map(|s| s.to_string()),
                manufacturer: device_info.manufacturer_string().map(|s| s.to_string()),
            };

            let device = device_info
                .open()
                .wait()
                .map_err(|e| TransportError::Fatal(format!("USB open: {e}")))?;

            setup_step("USB reset", device.reset().wait())?;
            setup_step(
                &format!("set_configuration({USB_CONFIGURATION})"),
                device.set_configuration(USB_CONFIGURATION).wait(),
            )?;

            let interface = device.claim_interface(USB_INTERFACE).wait().map_err(|e| {
                TransportError::Fatal(format!("claim interface {USB_INTERFACE}: {e}"))
            })?;

            let bulk_in = interface
                .endpoint::<Bulk, In>(BULK_IN_ENDPOINT)
                .map_err(|e| {
                    TransportError::Fatal(format!("open endpoint 0x{BULK_IN_ENDPOINT:02x}: {e}"))
                })?;
            let max_packet_size = bulk_in.max_packet_size();

            log::debug!(
                "opened {} (max packet size {max_packet_size})",
                info.path
            );

            Ok(NusbTransport {
                interface,
                bulk_in: Mutex::new(bulk_in),
                info,
                max_packet_size,
            })
        }
    }

    impl UsbTransport for NusbTransport {
        fn usb_info(&self) -> &UsbInfo {
            &self.info
        }

        fn max_packet_size(&self) -> usize {
            self.max_packet_size
        }

        fn control_write(
            &self,
            request: u8,
            value: u16,
            index: u16,
            payload: &[u8],
            timeout: Duration,
        ) -> Result<()> {
            log::trace!(
                "ctrl 0x{REQUEST_TYPE_OUT:02x} req=0x{request:02x} value={value} index={index} [{}]",
                hex_preview(payload)
            );
            let control = ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request,
                value,
                index,
                data: payload,
            };
            self.interface
                .control_out(control, timeout)
                .wait()
                .map_err(|e| map_transfer_error(&format!("control_out(0x{request:02x})"), e))
        }

        fn control_read(
            &self,
            request: u8,
            value: u16,
            index: u16,
            expected_len: usize,
            timeout: Duration,
        ) -> Result<Vec<u8>> {
            let length = u16::try_from(expected_len).map_err(|_| {
                TransportError::Fatal(format!(
                    "control_in(0x{request:02x}): length {expected_len} exceeds u16"
                ))
            })?;
            let control = ControlIn {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request,
                value,
                index,
                length,
            };
            let data = self
                .interface
                .control_in(control, timeout)
                .wait()
                .map_err(|e| map_transfer_error(&format!("control_in(0x{request:02x})"), e))?;
            log::trace!(
                "ctrl 0x{REQUEST_TYPE_IN:02x} req=0x{request:02x} -> [{}]",
                hex_preview(&data)
            );
            Ok(data)
        }

        fn bulk_read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
            let mut ep = self
                .bulk_in
                .lock()
                .map_err(|_| TransportError::Fatal("bulk endpoint lock poisoned".into()))?;

            // IN requests must be a whole number of packets.
            let packet = self.max_packet_size.max(1);
            let len = max_len.max(1).div_ceil(packet) * packet;
            let buffer = ep.allocate(len);
            ep.submit(buffer);

            let completion = match ep.wait_next_complete(timeout) {
                Some(c) => c,
                None => {
                    ep.cancel_all();
                    match ep.wait_next_complete(CANCEL_REAP) {
                        // Data raced the cancellation; keep it.
                        Some(c) if c.status.is_ok() && c.actual_len > 0 => c,
                        _ => return Err(TransportError::Timeout),
                    }
                }
            };

            completion
                .status
                .map_err(|e| map_transfer_error("bulk_read", e))?;
            let mut data = completion.buffer.to_vec();
            data.truncate(completion.actual_len);
            log::trace!("bulk <- {} bytes [{}]", data.len(), hex_preview(&data));
            Ok(data)
        }
    }

    /// List attached devices whose `(vendor, product)` pair is in `ids`.
    pub fn list_matching(ids: &[(u16, u16)]) -> Vec<UsbInfo> {
        let Ok(devices) = nusb::list_devices().wait() else {
            return Vec::new();
        };
        devices
            .filter(|dev| ids.contains(&(dev.vendor_id(), dev.product_id())))
            .map(|dev| UsbInfo {
                vendor_id: dev.vendor_id(),
                product_id: dev.product_id(),
                path: format!(
                    "usb:{:04x}:{:04x}@{:03}",
                    dev.vendor_id(),
                    dev.product_id(),
                    dev.device_address()
                ),
                serial: dev.serial_number().map(|s| s.to_string()),
                product: dev.product_string().map(|s| s.to_string()),
                manufacturer: dev.manufacturer_string().map(|s| s.to_string()),
            })
            .collect()
    }
}

pub use nusb_impl::{NusbTransport, list_matching};

// ── Mock transport for testing ──

/// In-memory mock transport for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};

    use crate::protocol::{SVC_GET_DEVICE_INFO, SVC_GET_SERVICES};

    /// A recorded control OUT transfer.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ControlWrite {
        pub request: u8,
        pub value: u16,
        pub index: u16,
        pub data: Vec<u8>,
    }

    /// Scriptable transport. Control IN responses are queued per request code
    /// (with an optional sticky fallback); bulk reads pop from one queue and
    /// fail fatally once it is exhausted so runaway poll loops end.
    pub struct MockTransport {
        info: UsbInfo,
        max_packet_size: usize,
        /// Queued control IN responses: request → responses.
        pub control_reads: RefCell<HashMap<u8, VecDeque<Result<Vec<u8>>>>>,
        /// Response returned when a request's queue is empty.
        pub sticky_reads: RefCell<HashMap<u8, Vec<u8>>>,
        /// Queued bulk IN chunks.
        pub bulk_reads: RefCell<VecDeque<Result<Vec<u8>>>>,
        /// Recorded control OUT transfers.
        pub control_writes: RefCell<Vec<ControlWrite>>,
        /// Recorded control IN request codes.
        pub control_read_log: RefCell<Vec<u8>>,
        /// Number of bulk reads issued.
        pub bulk_read_count: Cell<usize>,
        /// If set, every control write fails with this message.
        pub fail_writes: RefCell<Option<String>>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            MockTransport {
                info: UsbInfo {
                    vendor_id: 0xFFFF,
                    product_id: 0xFFFF,
                    path: "mock://probe".into(),
                    serial: Some("MOCK123".into()),
                    product: Some("Mock Probe".into()),
                    manufacturer: None,
                },
                max_packet_size: 64,
                control_reads: RefCell::new(HashMap::new()),
                sticky_reads: RefCell::new(HashMap::new()),
                bulk_reads: RefCell::new(VecDeque::new()),
                control_writes: RefCell::new(Vec::new()),
                control_read_log: RefCell::new(Vec::new()),
                bulk_read_count: Cell::new(0),
                fail_writes: RefCell::new(None),
            }
        }

        /// A transport pre-loaded with the open-time handshake: device info
        /// (firmware 1.2.3, hardware 2.0) and the given capability mask.
        pub fn with_services(mask: u32) -> Self {
            let mock = Self::new();
            mock.push_control_read(
                SVC_GET_DEVICE_INFO,
                vec![0x80 | SVC_GET_DEVICE_INFO, 5, 0, 1, 2, 3, 2, 0],
            );
            let mut services = vec![0x80 | SVC_GET_SERVICES, 4, 0];
            services.extend_from_slice(&mask.to_le_bytes());
            mock.push_control_read(SVC_GET_SERVICES, services);
            mock
        }

        pub fn set_max_packet_size(&mut self, size: usize) {
            self.max_packet_size = size;
        }

        pub fn push_control_read(&self, request: u8, response: Vec<u8>) {
            self.control_reads
                .borrow_mut()
                .entry(request)
                .or_default()
                .push_back(Ok(response));
        }

        pub fn push_control_read_error(&self, request: u8, error: TransportError) {
            self.control_reads
                .borrow_mut()
                .entry(request)
                .or_default()
                .push_back(Err(error));
        }

        pub fn set_sticky_read(&self, request: u8, response: Vec<u8>) {
            self.sticky_reads.borrow_mut().insert(request, response);
        }

        pub fn push_bulk(&self, chunk: Vec<u8>) {
            self.bulk_reads.borrow_mut().push_back(Ok(chunk));
        }

        pub fn push_bulk_timeout(&self) {
            self.bulk_reads
                .borrow_mut()
                .push_back(Err(TransportError::Timeout));
        }

        pub fn push_bulk_error(&self, error: TransportError) {
            self.bulk_reads.borrow_mut().push_back(Err(error));
        }

        /// Control writes issued with the given request code.
        pub fn writes_for(&self, request: u8) -> Vec<ControlWrite> {
            self.control_writes
                .borrow()
                .iter()
                .filter(|w| w.request == request)
                .cloned()
                .collect()
        }

        /// Request codes of every control write, in order.
        pub fn write_requests(&self) -> Vec<u8> {
            self.control_writes
                .borrow()
                .iter()
                .map(|w| w.request)
                .collect()
        }

        /// Total transfers issued (control writes + control reads + bulk reads).
        pub fn io_count(&self) -> usize {
            self.control_writes.borrow().len()
                + self.control_read_log.borrow().len()
                + self.bulk_read_count.get()
        }

        /// Forget recorded traffic (queued responses are kept).
        pub fn clear_log(&self) {
            self.control_writes.borrow_mut().clear();
            self.control_read_log.borrow_mut().clear();
            self.bulk_read_count.set(0);
        }
    }

    impl UsbTransport for MockTransport {
        fn usb_info(&self) -> &UsbInfo {
            &self.info
        }

        fn max_packet_size(&self) -> usize {
            self.max_packet_size
        }

        fn control_write(
            &self,
            request: u8,
            value: u16,
            index: u16,
            payload: &[u8],
            _timeout: Duration,
        ) -> Result<()> {
            self.control_writes.borrow_mut().push(ControlWrite {
                request,
                value,
                index,
                data: payload.to_vec(),
            });
            if let Some(msg) = self.fail_writes.borrow().as_ref() {
                return Err(TransportError::Fatal(format!("mock: {msg}")));
            }
            Ok(())
        }

        fn control_read(
            &self,
            request: u8,
            _value: u16,
            _index: u16,
            _expected_len: usize,
            _timeout: Duration,
        ) -> Result<Vec<u8>> {
            self.control_read_log.borrow_mut().push(request);
            let queued = self
                .control_reads
                .borrow_mut()
                .get_mut(&request)
                .and_then(|q| q.pop_front());
            if let Some(response) = queued {
                return response;
            }
            if let Some(sticky) = self.sticky_reads.borrow().get(&request) {
                return Ok(sticky.clone());
            }
            Err(TransportError::Fatal(format!(
                "mock: no control response for request 0x{request:02x}"
            )))
        }

        fn bulk_read(&self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
            self.bulk_read_count.set(self.bulk_read_count.get() + 1);
            self.bulk_reads
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Fatal("mock: bulk queue exhausted".into())))
        }
    }
}
