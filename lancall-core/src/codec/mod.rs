//! `tokio_util` codec for framed UDP I/O.
//!
//! Each datagram carries exactly one [`Envelope`]; the codec is used
//! through `UdpFramed`, which hands `decode` one whole datagram at a
//! time. A decode error applies to that datagram only and the stream
//! continues with the next one.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CallError;
use crate::packet::{Envelope, MAX_DATAGRAM_SIZE};

/// An envelope as it came off the socket, with its wire size so the
/// receive path can feed byte counters without re-encoding.
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub envelope: Envelope,
    pub wire_len: usize,
}

/// Stateless envelope codec for `UdpFramed`.
pub struct DatagramCodec;

impl Decoder for DatagramCodec {
    type Item = InboundDatagram;
    type Error = CallError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if src.len() > MAX_DATAGRAM_SIZE {
            let size = src.len();
            src.clear();
            return Err(CallError::DatagramTooLarge {
                size,
                max: MAX_DATAGRAM_SIZE,
            });
        }

        // Consume the whole datagram regardless of outcome so a bad
        // one cannot poison the next.
        let frame = src.split_to(src.len());
        let envelope = Envelope::decode(&frame)?;
        Ok(Some(InboundDatagram {
            envelope,
            wire_len: frame.len(),
        }))
    }
}

impl Encoder<Envelope> for DatagramCodec {
    type Error = CallError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.encode()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
