//! Decoders from Bus Auditor response frames to pin assignments.
//!
//! A frame that does not fit its service's layout is dropped with a warning;
//! the rest of the scan is kept.

use serde::Serialize;

use crate::frame::ResponseFrame;

// ── Pin sets ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JtagPins {
    pub tck: u8,
    pub tms: u8,
    pub tdo: u8,
    pub tdi: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trst: Option<u8>,
}

impl JtagPins {
    /// Read `[tck, tms, tdo, tdi, (trst)]` from the front of `bytes`.
    fn read(bytes: &[u8], trst: bool) -> Option<Self> {
        match (bytes, trst) {
            ([tck, tms, tdo, tdi, t, ..], true) => Some(JtagPins {
                tck: *tck,
                tms: *tms,
                tdo: *tdo,
                tdi: *tdi,
                trst: Some(*t),
            }),
            ([tck, tms, tdo, tdi, ..], false) => Some(JtagPins {
                tck: *tck,
                tms: *tms,
                tdo: *tdo,
                tdi: *tdi,
                trst: None,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SwdPins {
    pub swclk: u8,
    pub swdio: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UartPins {
    pub tx: u8,
    pub rx: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct I2cPins {
    pub scl: u8,
    pub sda: u8,
}

/// Pins of one identified device, by bus type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "bus", rename_all = "lowercase")]
pub enum PinAssignment {
    Jtag(JtagPins),
    Swd(SwdPins),
    Uart(UartPins),
    I2c(I2cPins),
}

// ── Records ──

/// Pins on which an IDCODE scan read one or more IDCODEs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdcodeRecord {
    pub pins: JtagPins,
    pub idcodes: Vec<u32>,
}

/// Pins tested by a pattern (BYPASS loopback) scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternRecord {
    pub pins: JtagPins,
    pub matched: bool,
}

/// A device found on the target: its id (hex IDCODE or I2C address) and pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentification {
    pub id: String,
    pub pins: PinAssignment,
}

/// A baud rate at which UART traffic was seen, with every pin pair that saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UartCandidate {
    pub baud: u32,
    pub pins: Vec<UartPins>,
}

pub fn format_idcode(idcode: u32) -> String {
    format!("0x{idcode:08x}")
}

pub fn format_i2c_address(addr: u8) -> String {
    format!("0x{addr:02x}")
}

/// False, with a warning, when the declared length disagrees with the bytes received.
fn declared_length_ok(frame: &ResponseFrame, kind: &str) -> bool {
    if frame.length_matches() {
        return true;
    }
    log::warn!(
        "dropping {kind} frame: declared {} bytes, {} received",
        frame.length,
        frame.payload.len()
    );
    false
}

fn read_u32_le(bytes: &[u8]) -> Option<u32> {
    let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

// ── Frame decoders ──

/// `[tck, tms, tdo, tdi, (trst), count, count × idcode u32 LE]`.
pub fn decode_idcode(frame: &ResponseFrame, trst: bool) -> Option<IdcodeRecord> {
    if !declared_length_ok(frame, "IDCODE") {
        return None;
    }
    let prefix = super::scan::jtag_roles(trst) + 1;
    let payload = &frame.payload;
    let pins = JtagPins::read(payload, trst)?;
    let count = *payload.get(prefix - 1)? as usize;
    let expected = prefix + 4 * count;
    if payload.len() != expected {
        log::warn!(
            "dropping IDCODE frame: {} bytes, {expected} expected for {count} idcode(s)",
            payload.len()
        );
        return None;
    }
    let idcodes = payload[prefix..expected]
        .chunks_exact(4)
        .filter_map(read_u32_le)
        .collect();
    Some(IdcodeRecord { pins, idcodes })
}

/// `[matched, tck, tms, tdo, tdi, (trst)]`.
pub fn decode_pattern(frame: &ResponseFrame, trst: bool) -> Option<PatternRecord> {
    if !declared_length_ok(frame, "pattern") {
        return None;
    }
    let decoded = frame
        .payload
        .split_first()
        .and_then(|(matched, rest)| Some((*matched != 0, JtagPins::read(rest, trst)?)));
    match decoded {
        Some((matched, pins)) => Some(PatternRecord { pins, matched }),
        None => {
            log::warn!("dropping short pattern frame ({} bytes)", frame.payload.len());
            None
        }
    }
}

/// `[swclk, swdio, idcode u32 LE]`.
pub fn decode_swd(frame: &ResponseFrame) -> Option<(SwdPins, u32)> {
    if !declared_length_ok(frame, "SWD") {
        return None;
    }
    match frame.payload.as_slice() {
        [swclk, swdio, rest @ ..] if rest.len() >= 4 => Some((
            SwdPins {
                swclk: *swclk,
                swdio: *swdio,
            },
            read_u32_le(rest)?,
        )),
        _ => {
            log::warn!("dropping short SWD frame ({} bytes)", frame.payload.len());
            None
        }
    }
}

/// `[tx, rx, baud u32 LE]`.
pub fn decode_uart(frame: &ResponseFrame) -> Option<(UartPins, u32)> {
    if !declared_length_ok(frame, "UART") {
        return None;
    }
    match frame.payload.as_slice() {
        [tx, rx, rest @ ..] if rest.len() >= 4 => {
            Some((UartPins { tx: *tx, rx: *rx }, read_u32_le(rest)?))
        }
        _ => {
            log::warn!("dropping short UART frame ({} bytes)", frame.payload.len());
            None
        }
    }
}

/// `[scl, sda, addr...]`, one identification per address.
pub fn decode_i2c(frame: &ResponseFrame) -> Vec<DeviceIdentification> {
    if !declared_length_ok(frame, "I2C") {
        return Vec::new();
    }
    let [scl, sda, addrs @ ..] = frame.payload.as_slice() else {
        log::warn!("dropping short I2C frame ({} bytes)", frame.payload.len());
        return Vec::new();
    };
    let pins = PinAssignment::I2c(I2cPins {
        scl: *scl,
        sda: *sda,
    });
    addrs
        .iter()
        .map(|&addr| DeviceIdentification {
            id: format_i2c_address(addr),
            pins,
        })
        .collect()
}

// ── Aggregation ──

/// Pair matched pattern pins with the IDCODEs read on identical pins.
///
/// One identification per distinct `(pins, idcode)`; pattern order first,
/// then the IDCODE order within the record.
pub fn correlate(idcodes: &[IdcodeRecord], patterns: &[PatternRecord]) -> Vec<DeviceIdentification> {
    let mut seen: Vec<(JtagPins, u32)> = Vec::new();
    let mut found = Vec::new();
    for pattern in patterns.iter().filter(|p| p.matched) {
        for record in idcodes.iter().filter(|r| r.pins == pattern.pins) {
            for &idcode in &record.idcodes {
                if seen.contains(&(pattern.pins, idcode)) {
                    continue;
                }
                seen.push((pattern.pins, idcode));
                found.push(DeviceIdentification {
                    id: format_idcode(idcode),
                    pins: PinAssignment::Jtag(pattern.pins),
                });
            }
        }
    }
    found
}

/// One identification per IDCODE; the first pin pair that read it wins.
pub fn dedup_swd(hits: impl IntoIterator<Item = (SwdPins, u32)>) -> Vec<DeviceIdentification> {
    let mut seen: Vec<u32> = Vec::new();
    let mut found = Vec::new();
    for (pins, idcode) in hits {
        if seen.contains(&idcode) {
            continue;
        }
        seen.push(idcode);
        found.push(DeviceIdentification {
            id: format_idcode(idcode),
            pins: PinAssignment::Swd(pins),
        });
    }
    found
}

/// Group UART hits by baud rate, keeping each `(tx, rx)` pair once.
pub fn merge_uart(hits: impl IntoIterator<Item = (UartPins, u32)>) -> Vec<UartCandidate> {
    let mut candidates: Vec<UartCandidate> = Vec::new();
    for (pins, baud) in hits {
        match candidates.iter_mut().find(|c| c.baud == baud) {
            Some(c) => {
                if !c.pins.contains(&pins) {
                    c.pins.push(pins);
                }
            }
            None => candidates.push(UartCandidate {
                baud,
                pins: vec![pins],
            }),
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(length: u8, payload: &[u8]) -> ResponseFrame {
        ResponseFrame {
            service_byte: 0x90,
            length,
            status: 0,
            payload: payload.to_vec(),
        }
    }

    fn jtag(tck: u8, tms: u8, tdo: u8, tdi: u8) -> JtagPins {
        JtagPins {
            tck,
            tms,
            tdo,
            tdi,
            trst: None,
        }
    }

    #[test]
    fn idcode_frame_two_codes() {
        let mut payload = vec![0, 1, 2, 3, 2];
        payload.extend_from_slice(&0x4BA0_0477u32.to_le_bytes());
        payload.extend_from_slice(&0x0697_1041u32.to_le_bytes());
        let rec = decode_idcode(&frame(13, &payload), false).unwrap();
        assert_eq!(rec.pins, jtag(0, 1, 2, 3));
        assert_eq!(rec.idcodes, vec![0x4BA0_0477, 0x0697_1041]);
    }

    #[test]
    fn idcode_frame_with_trst() {
        let mut payload = vec![0, 1, 2, 3, 4, 1];
        payload.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        let rec = decode_idcode(&frame(10, &payload), true).unwrap();
        assert_eq!(rec.pins.trst, Some(4));
        assert_eq!(rec.idcodes, vec![0x1234_5678]);
    }

    #[test]
    fn idcode_frame_length_mismatch_dropped() {
        let mut payload = vec![0, 1, 2, 3, 1];
        payload.extend_from_slice(&1u32.to_le_bytes());
        // count says one idcode, frame carries two
        let mut extra = payload.clone();
        extra.extend_from_slice(&2u32.to_le_bytes());
        assert!(decode_idcode(&frame(13, &extra), false).is_none());
        // payload shorter than declared
        assert!(decode_idcode(&frame(9, &payload[..7]), false).is_none());
        // too short for the pin prefix
        assert!(decode_idcode(&frame(3, &[0, 1, 2]), false).is_none());
    }

    #[test]
    fn pattern_frame() {
        let rec = decode_pattern(&frame(5, &[1, 4, 5, 6, 7]), false).unwrap();
        assert!(rec.matched);
        assert_eq!(rec.pins, jtag(4, 5, 6, 7));
        assert!(decode_pattern(&frame(5, &[1, 4, 5, 6, 7]), true).is_none());
        assert!(decode_pattern(&frame(0, &[]), false).is_none());
    }

    #[test]
    fn swd_and_uart_frames() {
        let mut payload = vec![3, 4];
        payload.extend_from_slice(&0x2BA0_1477u32.to_le_bytes());
        let (pins, id) = decode_swd(&frame(6, &payload)).unwrap();
        assert_eq!(pins, SwdPins { swclk: 3, swdio: 4 });
        assert_eq!(id, 0x2BA0_1477);

        let mut payload = vec![1, 0];
        payload.extend_from_slice(&115_200u32.to_le_bytes());
        assert_eq!(
            decode_uart(&frame(6, &payload)),
            Some((UartPins { tx: 1, rx: 0 }, 115_200))
        );
        assert!(decode_uart(&frame(3, &[1, 0, 0])).is_none());
    }

    #[test]
    fn i2c_frame_one_id_per_address() {
        let ids = decode_i2c(&frame(4, &[6, 7, 0x50, 0x68]));
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].id, "0x50");
        assert_eq!(ids[1].id, "0x68");
        assert_eq!(ids[1].pins, PinAssignment::I2c(I2cPins { scl: 6, sda: 7 }));
        assert!(decode_i2c(&frame(1, &[6])).is_empty());
    }

    #[test]
    fn declared_length_mismatch_drops_frame() {
        let mut idcode = vec![0, 1, 2, 3, 1];
        idcode.extend_from_slice(&1u32.to_le_bytes());
        idcode.extend_from_slice(&[0xEE; 4]);
        assert!(decode_idcode(&frame(9, &idcode), false).is_none());

        assert!(decode_pattern(&frame(9, &[1, 4, 5, 6, 7]), false).is_none());
        assert!(decode_pattern(&frame(4, &[1, 4, 5, 6, 7]), false).is_none());

        let mut swd = vec![3, 4];
        swd.extend_from_slice(&0x2BA0_1477u32.to_le_bytes());
        assert!(decode_swd(&frame(2, &swd)).is_none());

        let mut uart = vec![1, 0];
        uart.extend_from_slice(&115_200u32.to_le_bytes());
        assert!(decode_uart(&frame(9, &uart)).is_none());
        assert!(decode_uart(&frame(5, &uart)).is_none());

        assert!(decode_i2c(&frame(3, &[6, 7, 0x50, 0x68])).is_empty());
    }

    #[test]
    fn correlate_matched_pairs() {
        let a = jtag(0, 1, 2, 3);
        let b = jtag(1, 0, 2, 3);
        let idcodes = vec![
            IdcodeRecord {
                pins: a,
                idcodes: vec![0x4BA0_0477, 0x4BA0_0477],
            },
            IdcodeRecord {
                pins: b,
                idcodes: vec![0xDEAD_BEEF],
            },
        ];
        let patterns = vec![
            PatternRecord {
                pins: a,
                matched: true,
            },
            PatternRecord {
                pins: b,
                matched: false,
            },
            PatternRecord {
                pins: a,
                matched: true,
            },
        ];
        let ids = correlate(&idcodes, &patterns);
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id, "0x4ba00477");
        assert_eq!(ids[0].pins, PinAssignment::Jtag(a));
    }

    #[test]
    fn correlate_without_matches_is_empty() {
        let a = jtag(0, 1, 2, 3);
        let idcodes = vec![IdcodeRecord {
            pins: a,
            idcodes: vec![1],
        }];
        let patterns = vec![PatternRecord {
            pins: a,
            matched: false,
        }];
        assert!(correlate(&idcodes, &patterns).is_empty());
        assert!(correlate(&[], &[]).is_empty());
    }

    #[test]
    fn correlate_ignores_matches_absent_from_idcodes() {
        let patterns = vec![PatternRecord {
            pins: jtag(4, 5, 6, 7),
            matched: true,
        }];
        let idcodes = vec![IdcodeRecord {
            pins: jtag(0, 1, 2, 3),
            idcodes: vec![1],
        }];
        assert!(correlate(&idcodes, &patterns).is_empty());
    }

    #[test]
    fn merge_uart_same_baud() {
        let merged = merge_uart([
            (UartPins { tx: 1, rx: 0 }, 115_200),
            (UartPins { tx: 1, rx: 2 }, 115_200),
        ]);
        assert_eq!(
            merged,
            vec![UartCandidate {
                baud: 115_200,
                pins: vec![UartPins { tx: 1, rx: 0 }, UartPins { tx: 1, rx: 2 }],
            }]
        );
    }

    #[test]
    fn merge_uart_dedups_and_keeps_roles() {
        let merged = merge_uart([
            (UartPins { tx: 1, rx: 0 }, 9600),
            (UartPins { tx: 1, rx: 0 }, 9600),
            (UartPins { tx: 0, rx: 1 }, 9600),
            (UartPins { tx: 3, rx: 4 }, 115_200),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].baud, 9600);
        assert_eq!(merged[0].pins.len(), 2);
        assert_eq!(merged[1].baud, 115_200);
    }

    #[test]
    fn swd_dedup_first_wins() {
        let ids = dedup_swd([
            (SwdPins { swclk: 0, swdio: 1 }, 0x2BA0_1477),
            (SwdPins { swclk: 2, swdio: 3 }, 0x2BA0_1477),
            (SwdPins { swclk: 4, swdio: 5 }, 0x0BB1_1477),
        ]);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].pins, PinAssignment::Swd(SwdPins { swclk: 0, swdio: 1 }));
        assert_eq!(ids[1].id, "0x0bb11477");
    }

    #[test]
    fn identification_json_shape() {
        let id = DeviceIdentification {
            id: "0x50".into(),
            pins: PinAssignment::I2c(I2cPins { scl: 1, sda: 2 }),
        };
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["pins"]["bus"], "i2c");
        assert_eq!(json["pins"]["scl"], 1);
    }
}
