//! Wire message kinds and their typed bodies.
//!
//! Every datagram starts with a short ASCII tag naming its kind,
//! followed by the sender's identity and a `bincode`-encoded body.
//! Uses proper enums with `TryFrom` — no panics on unknown values.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::CallError;

// ── MessageKind ──────────────────────────────────────────────────

/// Every message kind understood on the wire, identified by its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Broadcast probe looking for a peer on the subnet.
    Discover,
    /// Direct answer to a `Discover`; completes the handshake.
    DiscoverReply,
    /// Periodic liveness probe carrying the sender's send time.
    KeepAlive,
    /// One packetization interval of raw PCM audio.
    Audio,
    /// One compressed video frame.
    Video,
    /// A chat text message.
    Text,
    /// Best-effort hint asking the peer for a capture sample rate.
    AudioFormat,
}

impl MessageKind {
    /// The ASCII tag written on the wire.
    pub fn as_tag(self) -> &'static str {
        match self {
            MessageKind::Discover => "DISCOVER",
            MessageKind::DiscoverReply => "DISCOVER_REPLY",
            MessageKind::KeepAlive => "KEEPALIVE",
            MessageKind::Audio => "AUDIO",
            MessageKind::Video => "VIDEO",
            MessageKind::Text => "MSG",
            MessageKind::AudioFormat => "AUDIO_FORMAT",
        }
    }
}

impl TryFrom<&str> for MessageKind {
    type Error = CallError;

    fn try_from(tag: &str) -> Result<Self, Self::Error> {
        match tag {
            "DISCOVER" => Ok(MessageKind::Discover),
            "DISCOVER_REPLY" => Ok(MessageKind::DiscoverReply),
            "KEEPALIVE" => Ok(MessageKind::KeepAlive),
            "AUDIO" => Ok(MessageKind::Audio),
            "VIDEO" => Ok(MessageKind::Video),
            "MSG" => Ok(MessageKind::Text),
            "AUDIO_FORMAT" => Ok(MessageKind::AudioFormat),
            other => Err(CallError::UnknownTag(other.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

// ── FrameFlags ───────────────────────────────────────────────────

bitflags! {
    /// Per-frame flag byte carried by `VIDEO` messages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// The frame decodes without reference to prior frames.
        const KEY_FRAME = 0b0000_0001;
    }
}

// ── Message bodies ───────────────────────────────────────────────

/// Body of a `KEEPALIVE` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveBody {
    /// Sender's wall-clock send time in milliseconds since the Unix
    /// epoch. Used for best-effort one-way delay estimation.
    pub sent_at_ms: i64,
}

/// Body of an `AUDIO` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioBody {
    /// Monotonic per-sender sequence number.
    pub sequence: i64,
    /// Raw PCM payload, one packetization interval long.
    pub pcm: Vec<u8>,
}

/// Body of a `VIDEO` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoBody {
    /// Monotonic per-sender sequence number.
    pub sequence: i64,
    /// Raw flag byte; see [`FrameFlags`].
    pub flags: u8,
    /// Compressed image payload (JPEG).
    pub jpeg: Vec<u8>,
}

impl VideoBody {
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_truncate(self.flags)
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags().contains(FrameFlags::KEY_FRAME)
    }
}

/// Body of a `MSG` chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBody {
    pub text: String,
}

/// Body of an `AUDIO_FORMAT` negotiation hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormatBody {
    pub sample_rate: i32,
}

// ── Payload ──────────────────────────────────────────────────────

/// A decoded message body, matched to its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Discover,
    DiscoverReply,
    KeepAlive(KeepAliveBody),
    Audio(AudioBody),
    Video(VideoBody),
    Text(TextBody),
    AudioFormat(AudioFormatBody),
}

impl Payload {
    /// The wire kind this payload encodes as.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Discover => MessageKind::Discover,
            Payload::DiscoverReply => MessageKind::DiscoverReply,
            Payload::KeepAlive(_) => MessageKind::KeepAlive,
            Payload::Audio(_) => MessageKind::Audio,
            Payload::Video(_) => MessageKind::Video,
            Payload::Text(_) => MessageKind::Text,
            Payload::AudioFormat(_) => MessageKind::AudioFormat,
        }
    }

    /// Serialize the body fields. Kinds without fields encode to an
    /// empty body.
    pub fn encode_body(&self) -> Result<Vec<u8>, CallError> {
        let bytes = match self {
            Payload::Discover | Payload::DiscoverReply => Vec::new(),
            Payload::KeepAlive(b) => bincode::serialize(b)?,
            Payload::Audio(b) => bincode::serialize(b)?,
            Payload::Video(b) => bincode::serialize(b)?,
            Payload::Text(b) => bincode::serialize(b)?,
            Payload::AudioFormat(b) => bincode::serialize(b)?,
        };
        Ok(bytes)
    }

    /// Deserialize a body for the given kind. Fails closed: any
    /// malformed body is a typed error, never partial data.
    pub fn decode_body(kind: MessageKind, body: &[u8]) -> Result<Self, CallError> {
        let payload = match kind {
            MessageKind::Discover => Payload::Discover,
            MessageKind::DiscoverReply => Payload::DiscoverReply,
            MessageKind::KeepAlive => Payload::KeepAlive(bincode::deserialize(body)?),
            MessageKind::Audio => Payload::Audio(bincode::deserialize(body)?),
            MessageKind::Video => Payload::Video(bincode::deserialize(body)?),
            MessageKind::Text => Payload::Text(bincode::deserialize(body)?),
            MessageKind::AudioFormat => Payload::AudioFormat(bincode::deserialize(body)?),
        };
        Ok(payload)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip_all_kinds() {
        let kinds = [
            MessageKind::Discover,
            MessageKind::DiscoverReply,
            MessageKind::KeepAlive,
            MessageKind::Audio,
            MessageKind::Video,
            MessageKind::Text,
            MessageKind::AudioFormat,
        ];
        for kind in kinds {
            let back = MessageKind::try_from(kind.as_tag()).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn unknown_tag_is_error() {
        let e = MessageKind::try_from("NOPE").unwrap_err();
        assert!(matches!(e, CallError::UnknownTag(_)));
    }

    #[test]
    fn body_round_trip() {
        let body = Payload::Audio(AudioBody {
            sequence: 42,
            pcm: vec![1, 2, 3, 4],
        });
        let bytes = body.encode_body().unwrap();
        let back = Payload::decode_body(MessageKind::Audio, &bytes).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn empty_body_kinds() {
        assert!(Payload::Discover.encode_body().unwrap().is_empty());
        let back = Payload::decode_body(MessageKind::DiscoverReply, &[]).unwrap();
        assert_eq!(back, Payload::DiscoverReply);
    }

    #[test]
    fn truncated_body_fails_closed() {
        let body = Payload::Video(VideoBody {
            sequence: 7,
            flags: FrameFlags::KEY_FRAME.bits(),
            jpeg: vec![0xFF, 0xD8, 0x01],
        });
        let bytes = body.encode_body().unwrap();
        let res = Payload::decode_body(MessageKind::Video, &bytes[..bytes.len() - 2]);
        assert!(res.is_err());
    }

    #[test]
    fn key_frame_flag() {
        let body = VideoBody {
            sequence: 0,
            flags: FrameFlags::KEY_FRAME.bits(),
            jpeg: vec![0xFF, 0xD8],
        };
        assert!(body.is_key_frame());

        let body = VideoBody {
            sequence: 1,
            flags: 0,
            jpeg: vec![0xFF, 0xD8],
        };
        assert!(!body.is_key_frame());
    }

    #[test]
    fn unknown_flag_bits_are_ignored() {
        let body = VideoBody {
            sequence: 0,
            flags: 0b1111_1111,
            jpeg: vec![0xFF, 0xD8],
        };
        assert!(body.is_key_frame());
        assert_eq!(body.flags(), FrameFlags::KEY_FRAME);
    }
}
