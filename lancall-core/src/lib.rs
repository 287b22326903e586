//! # lancall-core
//!
//! Transport and session layer for serverless two-peer audio/video
//! calls on a local network, over unicast/broadcast UDP.
//!
//! This crate contains:
//! - **Wire protocol**: [`Envelope`] framing, tagged [`MessageKind`]s
//!   and typed bodies, [`DatagramCodec`] for `UdpFramed` I/O
//! - **Discovery**: broadcast probe/reply handshake with self-origin
//!   screening ([`LocalIdentity`], [`DiscoveryTargets`])
//! - **Liveness**: keepalive and hard-silence state machine around
//!   [`PeerSession`]
//! - **Statistics**: sequence-gap loss estimation
//!   ([`SequenceTracker`]) and rolling bitrate accounting
//!   ([`BitrateMeter`])
//! - **Adaptation**: [`AdaptiveController`] tuning audio packet
//!   duration and video buffer bounds
//! - **Jitter buffers**: [`AudioJitterBuffer`] (leaky bucket) and
//!   [`VideoJitterBuffer`] (sequence-indexed, key-frame aware)
//! - **Session**: the synchronous [`Session`] core and the tokio
//!   [`SessionScheduler`] shell driving it
//! - **Error**: [`CallError`], a `thiserror`-based hierarchy; nothing
//!   in this layer is fatal to the process
//!
//! Device capture, playback, image codecs and UI are external
//! collaborators: raw media enters as [`CaptureInput`] and
//! everything produced leaves as [`SessionEvent`]s.

pub mod adaptive;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod media;
pub mod message;
pub mod packet;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod stats;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use adaptive::{AdaptiveController, AdaptiveParameters, VideoSizing};
pub use buffer::{AudioJitterBuffer, VideoInsert, VideoJitterBuffer};
pub use codec::{DatagramCodec, InboundDatagram};
pub use config::{SessionConfig, DEFAULT_PORT};
pub use discovery::{DiscoveryTargets, LocalIdentity};
pub use error::CallError;
pub use media::{CaptureInput, SessionEvent, VideoFrame};
pub use message::{FrameFlags, MessageKind, Payload};
pub use packet::{Envelope, MAX_DATAGRAM_SIZE};
pub use scheduler::{SessionHandle, SessionScheduler};
pub use session::{Outbound, Session, StatsSnapshot, StreamStats};
pub use state::{AdoptOutcome, DiscoveryPhase, PeerId, PeerSession, RemotePeer};
pub use stats::{BitrateMeter, BitrateSample, SequenceTracker};
