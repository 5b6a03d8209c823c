//! Reassembly of sniffer captures from the bulk IN stream.
//!
//! ```text
//! [SOF 0xA5][encap_len u16 LE][timestamp u32 LE][psdu_len u8][psdu ...]
//!            '------------------ encap_len = 5 + psdu_len ------------'
//! ```
//!
//! A capture may span several USB packets. The top bit of the last PSDU byte
//! is set when the radio verified the FCS itself; otherwise the trailing two
//! bytes carry link metadata and the FCS is recomputed on the host.

use serde::Serialize;

use super::crc::crc16_kermit;
use crate::error::{ProbeError, Result};

/// Start-of-frame marker.
pub const SOF: u8 = 0xA5;

/// Bytes before the PSDU: SOF, encapsulated length, timestamp, PSDU length.
pub const CAPTURE_HEADER_SIZE: usize = 8;

/// Encapsulated bytes besides the PSDU: timestamp + PSDU length.
const ENCAP_OVERHEAD: usize = 5;

/// aMaxPHYPacketSize.
pub const MAX_PSDU_LEN: usize = 127;

/// Largest USB chunk that may carry a frame start.
pub const MAX_CHUNK_LEN: usize = 64;

/// Set on the last PSDU byte when the hardware checked the FCS.
pub const FCS_CHECKED: u8 = 0x80;

/// One captured 802.15.4 frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnifferFrame {
    pub start_of_frame: u8,
    pub encapsulated_length: u16,
    /// Radio timestamp in microseconds.
    pub timestamp: u32,
    /// PSDU with a valid trailing FCS.
    pub payload: Vec<u8>,
    /// FCS verified by the radio rather than recomputed here.
    pub crc_valid: bool,
}

/// Result of feeding the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// More bytes needed.
    Incomplete,
    /// Bytes that could not be a frame were discarded.
    Noise,
    Frame(SnifferFrame),
}

/// Accumulates USB chunks into [`SnifferFrame`]s.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    last_chunk_len: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.last_chunk_len = 0;
    }

    /// Append `chunk` and try to complete a frame.
    ///
    /// A chunk larger than [`MAX_CHUNK_LEN`] that does not start a frame
    /// means the stream is out of step: `Buffer` error, buffer dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Assembled> {
        self.last_chunk_len = chunk.len();
        self.buf.extend_from_slice(chunk);
        self.next_frame()
    }

    /// Try to complete a frame from bytes already buffered.
    pub fn next_frame(&mut self) -> Result<Assembled> {
        let Some(&first) = self.buf.first() else {
            return Ok(Assembled::Incomplete);
        };
        if first != SOF {
            let dropped = self.buf.len();
            self.buf.clear();
            if self.last_chunk_len > MAX_CHUNK_LEN {
                return Err(ProbeError::Buffer(format!(
                    "{}-byte chunk without start of frame",
                    self.last_chunk_len
                )));
            }
            log::debug!("discarding {dropped} byte(s) of sniffer noise");
            return Ok(Assembled::Noise);
        }
        if self.buf.len() < 3 {
            return Ok(Assembled::Incomplete);
        }

        let encap_len = u16::from_le_bytes([self.buf[1], self.buf[2]]);
        if encap_len as usize > ENCAP_OVERHEAD + MAX_PSDU_LEN {
            self.buf.clear();
            return Err(ProbeError::Buffer(format!(
                "encapsulated length {encap_len} exceeds {}",
                ENCAP_OVERHEAD + MAX_PSDU_LEN
            )));
        }
        let total = 3 + encap_len as usize;
        if self.buf.len() < total {
            return Ok(Assembled::Incomplete);
        }

        let raw: Vec<u8> = self.buf.drain(..total).collect();
        if raw.len() < CAPTURE_HEADER_SIZE {
            log::debug!("discarding sniffer frame with encapsulated length {encap_len}");
            return Ok(Assembled::Noise);
        }
        let psdu_len = raw[7] as usize;
        if psdu_len + ENCAP_OVERHEAD != encap_len as usize || psdu_len < 2 {
            log::debug!(
                "discarding sniffer frame: PSDU length {psdu_len}, encapsulated {encap_len}"
            );
            return Ok(Assembled::Noise);
        }

        let timestamp = u32::from_le_bytes([raw[3], raw[4], raw[5], raw[6]]);
        let mut payload = raw[CAPTURE_HEADER_SIZE..].to_vec();
        let crc_valid = payload.last().is_some_and(|b| b & FCS_CHECKED != 0);
        if !crc_valid {
            repair_fcs(&mut payload);
        }

        Ok(Assembled::Frame(SnifferFrame {
            start_of_frame: first,
            encapsulated_length: encap_len,
            timestamp,
            payload,
            crc_valid,
        }))
    }
}

/// Overwrite the trailing two bytes with the FCS of the bytes before them.
pub fn repair_fcs(psdu: &mut [u8]) {
    if psdu.len() < 2 {
        return;
    }
    let split = psdu.len() - 2;
    let fcs = crc16_kermit(&psdu[..split]);
    psdu[split..].copy_from_slice(&fcs.to_le_bytes());
}

/// Consumer of captured frames, one CRC-repaired PSDU at a time.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &SnifferFrame) -> Result<()>;
}

impl FrameSink for Vec<SnifferFrame> {
    fn write_frame(&mut self, frame: &SnifferFrame) -> Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}
