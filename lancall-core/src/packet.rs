//! Datagram envelope: the framing shared by every message kind.
//!
//! ## Wire format (little-endian, one envelope per datagram)
//!
//! ```text
//! tag_len:    u8                      length of the ASCII tag
//! tag:        [u8; tag_len]           message kind, e.g. "AUDIO"
//! id_len:     u8                      always 16
//! sender_id:  [u8; 16]                instance id of the sender
//! nick_len:   u16                     nickname byte length
//! nickname:   [u8; nick_len]          UTF-8
//! body:       [u8]                    rest of the datagram, bincode
//! ```
//!
//! Decoding fails closed: a truncated or malformed envelope yields a
//! typed error and the datagram is dropped whole — never partial data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CallError;
use crate::message::{MessageKind, Payload};
use crate::state::PeerId;

// ── Limits ───────────────────────────────────────────────────────

/// Largest datagram the codec will accept or produce.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Tags are short ASCII strings; anything longer is garbage.
pub const MAX_TAG_LEN: usize = 16;

/// Upper bound on the nickname field.
pub const MAX_NICKNAME_LEN: usize = 64;

const SENDER_ID_LEN: usize = 16;

// ── Envelope ─────────────────────────────────────────────────────

/// One framed datagram: kind, sender identity, opaque body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub sender_id: PeerId,
    pub nickname: String,
    pub body: Vec<u8>,
}

impl Envelope {
    /// Build an envelope around an encoded payload.
    pub fn new(sender_id: PeerId, nickname: &str, payload: &Payload) -> Result<Self, CallError> {
        Ok(Self {
            kind: payload.kind(),
            sender_id,
            nickname: nickname.to_string(),
            body: payload.encode_body()?,
        })
    }

    /// Decode the body into a typed [`Payload`].
    pub fn payload(&self) -> Result<Payload, CallError> {
        Payload::decode_body(self.kind, &self.body)
    }

    /// Exact size of the encoded envelope in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + self.kind.as_tag().len() + 1 + SENDER_ID_LEN + 2 + self.nickname.len() + self.body.len()
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Bytes, CallError> {
        let tag = self.kind.as_tag();
        let nick = self.nickname.as_bytes();
        if nick.len() > MAX_NICKNAME_LEN {
            return Err(CallError::InvalidField {
                field: "nickname",
                reason: "exceeds maximum length",
            });
        }
        let total = self.encoded_len();
        if total > MAX_DATAGRAM_SIZE {
            return Err(CallError::DatagramTooLarge {
                size: total,
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(tag.len() as u8);
        buf.put_slice(tag.as_bytes());
        buf.put_u8(SENDER_ID_LEN as u8);
        buf.put_slice(self.sender_id.as_bytes());
        buf.put_u16_le(nick.len() as u16);
        buf.put_slice(nick);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Deserialize from wire bytes. The whole slice is one datagram;
    /// everything after the nickname is the body.
    pub fn decode(mut src: &[u8]) -> Result<Self, CallError> {
        if src.len() > MAX_DATAGRAM_SIZE {
            return Err(CallError::DatagramTooLarge {
                size: src.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        // Tag.
        if src.remaining() < 1 {
            return Err(CallError::Truncated("tag length"));
        }
        let tag_len = src.get_u8() as usize;
        if tag_len == 0 || tag_len > MAX_TAG_LEN {
            return Err(CallError::InvalidField {
                field: "tag",
                reason: "length out of range",
            });
        }
        if src.remaining() < tag_len {
            return Err(CallError::Truncated("tag"));
        }
        let tag_bytes = &src[..tag_len];
        let tag = std::str::from_utf8(tag_bytes).map_err(|_| CallError::InvalidUtf8("tag"))?;
        let kind = MessageKind::try_from(tag)?;
        src.advance(tag_len);

        // Sender id.
        if src.remaining() < 1 {
            return Err(CallError::Truncated("sender id length"));
        }
        let id_len = src.get_u8() as usize;
        if id_len != SENDER_ID_LEN {
            return Err(CallError::InvalidField {
                field: "sender id",
                reason: "length must be 16",
            });
        }
        if src.remaining() < SENDER_ID_LEN {
            return Err(CallError::Truncated("sender id"));
        }
        let mut id_bytes = [0u8; SENDER_ID_LEN];
        src.copy_to_slice(&mut id_bytes);
        let sender_id = PeerId::from_bytes(id_bytes);

        // Nickname.
        if src.remaining() < 2 {
            return Err(CallError::Truncated("nickname length"));
        }
        let nick_len = src.get_u16_le() as usize;
        if nick_len > MAX_NICKNAME_LEN {
            return Err(CallError::InvalidField {
                field: "nickname",
                reason: "exceeds maximum length",
            });
        }
        if src.remaining() < nick_len {
            return Err(CallError::Truncated("nickname"));
        }
        let nickname = std::str::from_utf8(&src[..nick_len])
            .map_err(|_| CallError::InvalidUtf8("nickname"))?
            .to_string();
        src.advance(nick_len);

        Ok(Self {
            kind,
            sender_id,
            nickname,
            body: src.to_vec(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
