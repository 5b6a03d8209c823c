//! Active network scan: beacon collection and decoding.
//!
//! While scanning the probe sends 3-byte status frames (`status 0` = still
//! running, `0xFF` = done) interleaved with raw data chunks. Concatenated,
//! the data reads:
//!
//! ```text
//! [0x80|NWK_SCAN][declared_len u16 LE][device_count][device_count × 28-byte beacon]
//! ```
//! with `declared_len = 1 + 28 · device_count`.

use serde::Serialize;

use super::{MAX_CHANNEL, MIN_CHANNEL};
use crate::error::{ProbeError, Result, ValidationError};
use crate::protocol::{FRAME_HEADER_SIZE, STATUS_OK, device_error, response_byte};

/// Size of one beacon record.
pub const BEACON_RECORD_LEN: usize = 28;

/// Status byte marking the end of a scan.
pub const STATUS_SCAN_END: u8 = 0xFF;

/// Every channel of the 2.4 GHz band.
pub const ALL_CHANNELS_MASK: u32 = 0x07FF_F800;

const FLAG_PAN_COORDINATOR: u8 = 0x01;
const FLAG_PERMIT_JOINING: u8 = 0x02;
const FLAG_ZIGBEE_PRESENT: u8 = 0x04;

/// Zigbee NWK beacon payload, present only for Zigbee networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZigbeeBeacon {
    pub router_capacity: bool,
    pub device_capacity: bool,
    pub protocol_version: u8,
    pub stack_profile: u8,
    pub depth: u8,
    pub update_id: u8,
    /// As transmitted.
    pub extended_pan_id: [u8; 8],
    pub tx_offset: u32,
}

/// One beacon heard during the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Beacon {
    pub source_addr: u16,
    pub source_pan_id: u16,
    pub channel: u8,
    pub pan_coordinator: bool,
    pub permit_joining: bool,
    pub zigbee: Option<ZigbeeBeacon>,
    pub rssi: i8,
    pub lqi: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkScan {
    pub device_count: u8,
    pub beacons: Vec<Beacon>,
}

/// Decode one 28-byte beacon record.
pub fn decode_beacon(rec: &[u8; BEACON_RECORD_LEN]) -> Beacon {
    let flags = rec[5];
    let zigbee = (flags & FLAG_ZIGBEE_PRESENT != 0).then(|| ZigbeeBeacon {
        router_capacity: rec[6] != 0,
        device_capacity: rec[7] != 0,
        protocol_version: rec[8],
        stack_profile: rec[9],
        depth: rec[10],
        update_id: rec[11],
        extended_pan_id: [
            rec[12], rec[13], rec[14], rec[15], rec[16], rec[17], rec[18], rec[19],
        ],
        tx_offset: u32::from_le_bytes([rec[20], rec[21], rec[22], 0]),
    });
    Beacon {
        source_addr: u16::from_le_bytes([rec[0], rec[1]]),
        source_pan_id: u16::from_le_bytes([rec[2], rec[3]]),
        channel: rec[4],
        pan_coordinator: flags & FLAG_PAN_COORDINATOR != 0,
        permit_joining: flags & FLAG_PERMIT_JOINING != 0,
        zigbee,
        rssi: rec[23] as i8,
        lqi: rec[24],
    }
}

/// Decode `[device_count][records...]`.
///
/// `None` unless the length is exactly `device_count · 28 + 1`.
pub fn decode_scan_result(data: &[u8]) -> Option<NetworkScan> {
    let (&device_count, records) = data.split_first()?;
    if records.len() != device_count as usize * BEACON_RECORD_LEN {
        return None;
    }
    let beacons = records
        .chunks_exact(BEACON_RECORD_LEN)
        .filter_map(|chunk| <&[u8; BEACON_RECORD_LEN]>::try_from(chunk).ok())
        .map(decode_beacon)
        .collect();
    Some(NetworkScan {
        device_count,
        beacons,
    })
}

/// Where a scan stands after one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProgress {
    Running,
    Done,
}

/// Splits the scan stream into status frames and data.
#[derive(Debug)]
pub struct ScanAccumulator {
    service: u8,
    errors: &'static [&'static str],
    data: Vec<u8>,
}

impl ScanAccumulator {
    pub fn new(service: u8, errors: &'static [&'static str]) -> Self {
        Self {
            service,
            errors,
            data: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<ScanProgress> {
        if chunk.len() != FRAME_HEADER_SIZE {
            self.data.extend_from_slice(chunk);
            return Ok(ScanProgress::Running);
        }
        let [svc, _, status] = [chunk[0], chunk[1], chunk[2]];
        if svc != response_byte(self.service) {
            return Err(ProbeError::MalformedResponse(format!(
                "scan status frame for service 0x{svc:02x}"
            )));
        }
        match status {
            STATUS_OK => Ok(ScanProgress::Running),
            STATUS_SCAN_END => Ok(ScanProgress::Done),
            code => Err(device_error(code, self.errors)),
        }
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Decode the accumulated data, if it forms a complete result.
    pub fn finish(&self) -> Option<NetworkScan> {
        let data = &self.data;
        if data.len() < 4 {
            return None;
        }
        let declared = u16::from_le_bytes([data[1], data[2]]) as usize;
        let count = data[3] as usize;
        if declared != data.len() - 3 || declared != count * BEACON_RECORD_LEN + 1 {
            log::info!(
                "scan data inconsistent: {} bytes, declared {declared}, {count} device(s)",
                data.len()
            );
            return None;
        }
        decode_scan_result(&data[3..])
    }
}

/// Build a channel mask from channel numbers.
pub fn channel_mask(channels: &[u8]) -> std::result::Result<u32, ValidationError> {
    let mut mask = 0u32;
    for &ch in channels {
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&ch) {
            return Err(ValidationError::InvalidChannel(ch));
        }
        mask |= 1 << ch;
    }
    validate_mask(mask)?;
    Ok(mask)
}

/// Non-empty and within the 2.4 GHz band.
pub fn validate_mask(mask: u32) -> std::result::Result<(), ValidationError> {
    if mask == 0 || mask & !ALL_CHANNELS_MASK != 0 {
        return Err(ValidationError::InvalidChannelMask(mask));
    }
    Ok(())
}

/// Channels named by `mask`, ascending.
pub fn mask_channels(mask: u32) -> Vec<u8> {
    (MIN_CHANNEL..=MAX_CHANNEL)
        .filter(|&ch| mask & (1u32 << ch) != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ERROR_MESSAGES;

    const XPAN: [u8; 8] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];

    fn beacon_record(addr: u16, pan: u16, channel: u8, flags: u8) -> Vec<u8> {
        let mut r = Vec::with_capacity(BEACON_RECORD_LEN);
        r.extend_from_slice(&addr.to_le_bytes());
        r.extend_from_slice(&pan.to_le_bytes());
        r.push(channel);
        r.push(flags);
        r.extend_from_slice(&[1, 0, 2, 2, 1, 0]);
        r.extend_from_slice(&XPAN);
        r.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        r.push(-60i8 as u8);
        r.push(200);
        r.extend_from_slice(&[0, 0, 0]);
        r
    }

    #[test]
    fn decode_two_beacons() {
        let mut data = vec![2];
        data.extend(beacon_record(0x0000, 0x1A62, 15, 0x07));
        data.extend(beacon_record(0x796F, 0xBEEF, 20, 0x00));
        let scan = decode_scan_result(&data).unwrap();
        assert_eq!(scan.device_count, 2);
        assert_eq!(scan.beacons.len(), 2);

        let a = &scan.beacons[0];
        assert_eq!(a.source_pan_id, 0x1A62);
        assert_eq!(a.channel, 15);
        assert!(a.pan_coordinator && a.permit_joining);
        assert_eq!(a.rssi, -60);
        assert_eq!(a.lqi, 200);
        let z = a.zigbee.as_ref().unwrap();
        assert!(z.router_capacity);
        assert!(!z.device_capacity);
        assert_eq!(z.stack_profile, 2);
        assert_eq!(z.extended_pan_id, XPAN);
        assert_eq!(z.tx_offset, 0x00FF_FFFF);

        let b = &scan.beacons[1];
        assert_eq!(b.source_addr, 0x796F);
        assert!(!b.pan_coordinator);
        assert!(b.zigbee.is_none());
    }

    #[test]
    fn short_buffer_is_none() {
        let mut data = vec![2];
        data.extend(beacon_record(1, 2, 11, 0));
        assert!(decode_scan_result(&data).is_none());
        assert!(decode_scan_result(&[]).is_none());
    }

    #[test]
    fn zero_devices() {
        let scan = decode_scan_result(&[0]).unwrap();
        assert_eq!(scan.device_count, 0);
        assert!(scan.beacons.is_empty());
    }

    #[test]
    fn accumulator_status_and_data() {
        let mut acc = ScanAccumulator::new(0x40, &ERROR_MESSAGES);
        let record = beacon_record(1, 2, 11, 0);
        let mut data = vec![0xC0];
        data.extend_from_slice(&29u16.to_le_bytes());
        data.push(1);
        data.extend(record);

        assert_eq!(acc.push(&[0xC0, 1, 0]).unwrap(), ScanProgress::Running);
        assert_eq!(acc.push(&data[..20]).unwrap(), ScanProgress::Running);
        assert_eq!(acc.push(&data[20..]).unwrap(), ScanProgress::Running);
        assert_eq!(acc.push(&[0xC0, 1, 0xFF]).unwrap(), ScanProgress::Done);
        assert_eq!(acc.data_len(), 32);
        assert_eq!(acc.finish().unwrap().beacons.len(), 1);
    }

    #[test]
    fn accumulator_errors() {
        let mut acc = ScanAccumulator::new(0x40, &ERROR_MESSAGES);
        assert!(matches!(
            acc.push(&[0xC0, 1, 5]),
            Err(ProbeError::Service { code: 5, .. })
        ));
        assert!(matches!(
            acc.push(&[0xC0, 1, 0x42]),
            Err(ProbeError::MalformedResponse(_))
        ));
        assert!(matches!(
            acc.push(&[0x90, 1, 0]),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn accumulator_inconsistent_length_is_none() {
        let mut acc = ScanAccumulator::new(0x40, &ERROR_MESSAGES);
        acc.push(&[0xC0, 57, 0, 2, 0xAA]).unwrap();
        assert!(acc.finish().is_none());
        let empty = ScanAccumulator::new(0x40, &ERROR_MESSAGES);
        assert!(empty.finish().is_none());
    }

    #[test]
    fn channel_masks() {
        assert_eq!(channel_mask(&[11]).unwrap(), 1 << 11);
        assert_eq!(channel_mask(&[11, 26]).unwrap(), (1 << 11) | (1 << 26));
        assert_eq!(
            channel_mask(&[10]),
            Err(ValidationError::InvalidChannel(10))
        );
        assert_eq!(
            channel_mask(&[]),
            Err(ValidationError::InvalidChannelMask(0))
        );
        assert_eq!(mask_channels(ALL_CHANNELS_MASK).len(), 16);
        assert!(validate_mask(1 << 27).is_err());
    }
}
