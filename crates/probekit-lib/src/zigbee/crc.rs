//! CRC-16/Kermit, the IEEE 802.15.4 frame check sequence.

use crc::{CRC_16_KERMIT, Crc};

pub const KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// FCS over `data`, transmitted little-endian after the MAC frame.
pub fn crc16_kermit(data: &[u8]) -> u16 {
    KERMIT.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Table-free nibble update, two steps per byte.
    fn nibble_reference(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in data {
            for nibble in [byte & 0x0F, byte >> 4] {
                let q = (crc ^ nibble as u16) & 0x0F;
                crc = (crc >> 4) ^ q.wrapping_mul(4225);
            }
        }
        crc
    }

    #[test]
    fn check_value() {
        assert_eq!(crc16_kermit(b"123456789"), 0x2189);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(crc16_kermit(&[]), 0);
    }

    #[test]
    fn deterministic() {
        let frame = [0x41, 0x88, 0x01, 0x34, 0x12, 0xFF, 0xFF, 0x00, 0x00, 0x09, 0x12];
        assert_eq!(crc16_kermit(&frame), crc16_kermit(&frame));
    }

    #[test]
    fn matches_nibble_reference() {
        let samples: [&[u8]; 4] = [
            b"123456789",
            &[0x00],
            &[0xFF, 0xFF, 0xFF],
            &[0x03, 0x08, 0xA5, 0xFF, 0xFF, 0xFF, 0xFF, 0x07],
        ];
        for s in samples {
            assert_eq!(crc16_kermit(s), nibble_reference(s), "{s:02x?}");
        }
    }
}
