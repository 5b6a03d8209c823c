//! Response frame collection on the bulk IN endpoint.
//!
//! A scan answers with zero or more frames followed by an end marker. Each
//! bulk read carries exactly one frame, so classification is by length:
//!
//! | bytes | shape                        | meaning                  |
//! |-------|------------------------------|--------------------------|
//! | 2     | `[0x80\|svc, 0]`              | end of scan              |
//! | 3     | `[0x80\|svc, len, status]`    | accepted / device error  |
//! | > 3   | `[0x80\|svc, len, 0, data..]` | data frame               |

use serde::Serialize;

use crate::error::{ProbeError, Result};
use crate::poll::Poller;
use crate::protocol::{END_MARKER_SIZE, FRAME_HEADER_SIZE, STATUS_OK, device_error, response_byte};
use crate::transport::{TransportError, UsbTransport};

/// One data frame returned by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFrame {
    /// `0x80 | service`.
    pub service_byte: u8,
    /// Declared payload length.
    pub length: u8,
    pub status: u8,
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    /// Whether the declared length agrees with the bytes received.
    pub fn length_matches(&self) -> bool {
        self.length as usize == self.payload.len()
    }
}

/// Outcome of classifying one bulk read.
#[derive(Debug, PartialEq, Eq)]
pub enum Classified {
    End,
    Accepted,
    Data(ResponseFrame),
}

/// Classify one chunk read for `service`.
pub fn classify(chunk: &[u8], service: u8, errors: &'static [&'static str]) -> Result<Classified> {
    let expected = response_byte(service);
    match chunk {
        [svc, 0] if chunk.len() == END_MARKER_SIZE && *svc == expected => Ok(Classified::End),
        [svc, _, status] if *svc == expected => {
            if *status == STATUS_OK {
                Ok(Classified::Accepted)
            } else {
                Err(device_error(*status, errors))
            }
        }
        [svc, length, STATUS_OK, payload @ ..]
            if *svc == expected && chunk.len() > FRAME_HEADER_SIZE =>
        {
            Ok(Classified::Data(ResponseFrame {
                service_byte: *svc,
                length: *length,
                status: STATUS_OK,
                payload: payload.to_vec(),
            }))
        }
        [svc, ..] if *svc != expected => Err(ProbeError::MalformedResponse(format!(
            "expected service byte 0x{expected:02x}, got 0x{svc:02x}"
        ))),
        _ => Err(ProbeError::MalformedResponse(format!(
            "unexpected {}-byte frame {:02x?}",
            chunk.len(),
            chunk
        ))),
    }
}

/// Read frames for `service` until its end marker.
///
/// Read timeouts are retried under `poller`; fatal transport errors, device
/// error statuses and malformed frames end the collection.
pub fn collect_frames<T: UsbTransport>(
    transport: &T,
    service: u8,
    errors: &'static [&'static str],
    poller: &mut Poller,
) -> Result<Vec<ResponseFrame>> {
    let mut frames = Vec::new();
    let max_len = transport.max_packet_size();
    loop {
        let chunk = match transport.bulk_read(max_len, poller.read_timeout()) {
            Ok(chunk) => chunk,
            Err(TransportError::Timeout) => {
                poller.idle()?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match classify(&chunk, service, errors)? {
            Classified::End => {
                log::debug!(
                    "service 0x{service:02x}: end of scan, {} frame(s)",
                    frames.len()
                );
                return Ok(frames);
            }
            Classified::Accepted => log::debug!("service 0x{service:02x}: request accepted"),
            Classified::Data(frame) => frames.push(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollOptions;
    use crate::protocol::ERROR_MESSAGES;
    use crate::transport::mock::MockTransport;

    const SVC: u8 = 0x10;

    fn collect(mock: &MockTransport) -> Result<Vec<ResponseFrame>> {
        let mut poller = PollOptions::default().start();
        collect_frames(mock, SVC, &ERROR_MESSAGES, &mut poller)
    }

    #[test]
    fn classify_end_marker() {
        assert_eq!(
            classify(&[0x90, 0], SVC, &ERROR_MESSAGES).unwrap(),
            Classified::End
        );
    }

    #[test]
    fn classify_accepted_status() {
        assert_eq!(
            classify(&[0x90, 1, 0], SVC, &ERROR_MESSAGES).unwrap(),
            Classified::Accepted
        );
    }

    #[test]
    fn classify_data_frame() {
        let Classified::Data(frame) = classify(&[0x90, 2, 0, 7, 8], SVC, &ERROR_MESSAGES).unwrap()
        else {
            panic!("expected data frame");
        };
        assert_eq!(frame.payload, vec![7, 8]);
        assert!(frame.length_matches());
    }

    #[test]
    fn classify_rejects_wrong_service() {
        assert!(matches!(
            classify(&[0x91, 0], SVC, &ERROR_MESSAGES),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn classify_rejects_short_chunks() {
        for chunk in [&[][..], &[0x90][..]] {
            assert!(matches!(
                classify(chunk, SVC, &ERROR_MESSAGES),
                Err(ProbeError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn classify_rejects_data_with_error_status() {
        assert!(matches!(
            classify(&[0x90, 2, 4, 1, 2], SVC, &ERROR_MESSAGES),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn collect_device_busy() {
        let mock = MockTransport::new();
        mock.push_bulk(vec![0x90, 1, 2]);
        match collect(&mock) {
            Err(ProbeError::Service { code, message }) => {
                assert_eq!(code, 2);
                assert_eq!(message, "Device busy");
            }
            other => panic!("expected Service error, got {other:?}"),
        }
    }

    #[test]
    fn collect_status_out_of_table_is_malformed() {
        let mock = MockTransport::new();
        mock.push_bulk(vec![0x90, 1, 42]);
        assert!(matches!(
            collect(&mock),
            Err(ProbeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn collect_data_then_end() {
        let mock = MockTransport::new();
        mock.push_bulk(vec![0x90, 2, 0, 0xAA, 0xBB]);
        mock.push_bulk(vec![0x90, 0]);
        let frames = collect(&mock).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn collect_accepted_then_end_is_empty() {
        let mock = MockTransport::new();
        mock.push_bulk(vec![0x90, 1, 0]);
        mock.push_bulk(vec![0x90, 0]);
        assert!(collect(&mock).unwrap().is_empty());
    }

    #[test]
    fn collect_retries_timeouts() {
        let mock = MockTransport::new();
        mock.push_bulk_timeout();
        mock.push_bulk(vec![0x90, 1, 0]);
        mock.push_bulk_timeout();
        mock.push_bulk(vec![0x90, 3, 0, 1, 2, 3]);
        mock.push_bulk(vec![0x90, 0]);
        let frames = collect(&mock).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(mock.bulk_read_count.get(), 5);
    }

    #[test]
    fn collect_propagates_fatal() {
        let mock = MockTransport::new();
        mock.push_bulk(vec![0x90, 2, 0, 1, 2]);
        mock.push_bulk_error(TransportError::Fatal("bulk_read: no device".into()));
        assert!(matches!(
            collect(&mock),
            Err(ProbeError::Transport(TransportError::Fatal(_)))
        ));
    }

    #[test]
    fn collect_honors_cancel_on_timeout() {
        let token = crate::poll::CancelToken::new();
        token.cancel();
        let mock = MockTransport::new();
        mock.push_bulk_timeout();
        mock.push_bulk(vec![0x90, 0]);
        let mut poller = PollOptions::default().with_cancel(token).start();
        assert!(matches!(
            collect_frames(&mock, SVC, &ERROR_MESSAGES, &mut poller),
            Err(ProbeError::Cancelled)
        ));
    }
}
