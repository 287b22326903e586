//! Session configuration.
//!
//! Serde-friendly so the embedding binary can load it from TOML.
//! Every section defaults sensibly; an empty file is a valid config.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::adaptive::{
    AdaptiveParameters, AUDIO_PACKET_MS_MAX, AUDIO_PACKET_MS_MIN, VIDEO_BUFFER_MARGIN,
};
use crate::error::CallError;

/// Well-known session port, used for unicast and broadcast alike.
pub const DEFAULT_PORT: u16 = 45454;

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Display name sent in every datagram. Empty means "generate
    /// one from the instance id".
    pub nickname: String,
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
}

/// Socket and discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local bind address.
    pub bind_addr: IpAddr,
    /// UDP port shared by both peers.
    pub port: u16,
    /// Broadcast addresses discovery probes are sent to. Empty means
    /// the global broadcast address. Add each interface's broadcast
    /// address here on multi-homed hosts.
    pub broadcast_addrs: Vec<IpAddr>,
    /// Accept datagrams from loopback/self addresses. Required when
    /// two instances share one host.
    pub allow_loopback: bool,
}

/// Periods for every named tick, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before the first discovery broadcast.
    pub announce_delay_ms: u64,
    /// Keepalive send period.
    pub keepalive_interval_ms: u64,
    /// Missed-keepalive accounting period.
    pub timeout_check_interval_ms: u64,
    /// Misses tolerated before the session resets.
    pub max_missed_keepalives: u32,
    /// Hard-silence check period.
    pub silence_check_interval_ms: u64,
    /// Total packet silence that forces a reset.
    pub silence_window_ms: u64,
    /// Adaptive controller evaluation period.
    pub adaptive_interval_ms: u64,
    /// Bitrate accounting period.
    pub bitrate_interval_ms: u64,
    /// Video playback tick period.
    pub video_tick_ms: u64,
    /// Diagnostics snapshot period. Zero disables the snapshots.
    pub stats_interval_ms: u64,
}

/// Audio pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Route received audio through the jitter buffer. When false,
    /// payloads go straight to playback.
    pub buffering_enabled: bool,
    /// Playout buffer fill depth, in packets.
    pub buffer_target: usize,
    /// PCM bytes per millisecond of the capture format; 16 matches
    /// 8 kHz mono s16.
    pub bytes_per_ms: u32,
    /// Initial packetization interval; adapted at runtime within
    /// [20, 60] ms.
    pub packet_ms: u16,
}

/// Video buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Buffer depth at which playback starts.
    pub buffer_target: usize,
    /// Hard cap on buffered frames.
    pub buffer_max: usize,
    /// Let measured loss drive the bounds. When false the configured
    /// bounds are pinned.
    pub auto_sizing: bool,
    /// Newest frames kept across a silence reset.
    pub preserve_tail: usize,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            network: NetworkConfig::default(),
            timing: TimingConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            broadcast_addrs: Vec::new(),
            allow_loopback: false,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            announce_delay_ms: 1000,
            keepalive_interval_ms: 2000,
            timeout_check_interval_ms: 5000,
            max_missed_keepalives: 3,
            silence_check_interval_ms: 1000,
            silence_window_ms: 3000,
            adaptive_interval_ms: 2000,
            bitrate_interval_ms: 1000,
            video_tick_ms: 33,
            stats_interval_ms: 10_000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffering_enabled: true,
            buffer_target: 3,
            bytes_per_ms: 16,
            packet_ms: 40,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            buffer_target: 3,
            buffer_max: 10,
            auto_sizing: true,
            preserve_tail: 4,
        }
    }
}

impl SessionConfig {
    /// Derive the starting adaptive parameters, clamping the
    /// configured values into their legal ranges.
    pub fn initial_parameters(&self) -> Result<AdaptiveParameters, CallError> {
        let packet_ms = self
            .audio
            .packet_ms
            .clamp(AUDIO_PACKET_MS_MIN, AUDIO_PACKET_MS_MAX);
        let target = self.video.buffer_target.max(1);
        let max = self.video.buffer_max.max(target + VIDEO_BUFFER_MARGIN);
        AdaptiveParameters::validated(packet_ms, target, max)
    }
}

// ── Tests ────────────────────────────────────────────────────────
