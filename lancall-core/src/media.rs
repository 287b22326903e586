//! Media frame types and the boundary to the external collaborators
//! (audio playback, video display, chat pane, capture devices).
//!
//! The session core never touches a device: capture hands it raw
//! blocks through [`CaptureInput`], and everything it produces for
//! the outside world leaves as a [`SessionEvent`].

use std::net::SocketAddr;
use std::time::Instant;

use crate::session::StatsSnapshot;
use crate::state::PeerId;

/// JPEG start-of-image marker; every video payload must begin with it.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Minimal integrity check applied before a frame may enter the
/// video buffer.
pub fn is_valid_video_payload(payload: &[u8]) -> bool {
    payload.len() >= JPEG_SOI.len() && payload[..2] == JPEG_SOI
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A received compressed video frame, owned by the video jitter
/// buffer from insertion until displayed or evicted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub sender_id: PeerId,
    pub sender_nickname: String,
    pub sequence: i64,
    pub key_frame: bool,
    /// Compressed image bytes, starting with [`JPEG_SOI`].
    pub jpeg: Vec<u8>,
    pub received_at: Instant,
}

// ── CaptureInput ─────────────────────────────────────────────────

/// Raw media and operator input flowing from the capture side into
/// the scheduler. Capture callbacks may run on their own thread;
/// delivery is over a channel, never shared mutation.
#[derive(Debug, Clone)]
pub enum CaptureInput {
    /// One packetization interval of raw PCM from the microphone.
    AudioBlock(Vec<u8>),
    /// One compressed camera frame.
    VideoFrame { jpeg: Vec<u8>, key_frame: bool },
    /// A chat line typed by the operator.
    Text(String),
    /// Ask the peer to capture at the given sample rate.
    AudioFormat { sample_rate: i32 },
}

// ── SessionEvent ─────────────────────────────────────────────────

/// Everything the session reports outward: playback-ready media,
/// chat lines, peer lifecycle, diagnostics.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A remote peer was adopted.
    PeerDiscovered { nickname: String, addr: SocketAddr },
    /// The session was reset; no peer is live anymore.
    PeerLost,
    /// A chat message arrived.
    Text { nickname: String, text: String },
    /// A PCM block is due at the speaker.
    PlayAudio(Vec<u8>),
    /// The freshest buffered video frame is due on screen.
    DisplayVideo(VideoFrame),
    /// The video buffer entered (`true`) or left (`false`) its
    /// buffering phase; the display should hold the last good frame
    /// while `true`.
    VideoBuffering(bool),
    /// The peer asked us to capture at this sample rate.
    AudioFormatRequested { sample_rate: i32 },
    /// Periodic diagnostics snapshot.
    Stats(StatsSnapshot),
}
