//! The session core: one synchronous state machine owning every
//! piece of mutable session state.
//!
//! Inbound datagrams are dispatched by message kind to a handler;
//! the periodic work is expressed as named ticks taking an explicit
//! `now`, so the whole session can be driven in tests without a
//! wall clock. The core never touches the network: datagrams to send
//! are staged in an outbox and everything for the outside world is
//! staged as events; the scheduler drains both after every call.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::adaptive::{
    AdaptiveController, AdaptiveParameters, AUDIO_PACKET_MS_MAX, AUDIO_PACKET_MS_MIN, VideoSizing,
};
use crate::buffer::{AudioJitterBuffer, VideoInsert, VideoJitterBuffer};
use crate::config::SessionConfig;
use crate::discovery::{DiscoveryTargets, LocalIdentity};
use crate::error::CallError;
use crate::media::{SessionEvent, VideoFrame};
use crate::message::{
    AudioBody, AudioFormatBody, FrameFlags, KeepAliveBody, Payload, TextBody, VideoBody,
};
use crate::packet::Envelope;
use crate::state::{AdoptOutcome, PeerSession, RemotePeer};
use crate::stats::{BitrateMeter, BitrateSample, SequenceTracker};

// ── Outbound ─────────────────────────────────────────────────────

/// A staged datagram waiting for the scheduler to put it on the wire.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub envelope: Envelope,
    pub dest: SocketAddr,
}

// ── Reset flavors ────────────────────────────────────────────────

/// How thoroughly a session reset clears the video buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetKind {
    /// Clear everything (missed keepalives, explicit loss, new peer).
    Full,
    /// Hard-silence reset: keep a tail of the newest video frames so
    /// playback resumes quickly if the peer returns.
    SilenceTrim,
}

// ── StatsSnapshot ────────────────────────────────────────────────

/// Per-stream receive statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamStats {
    pub received: u64,
    pub lost: u64,
    pub loss_percent: f64,
}

/// Point-in-time diagnostics, the programmatic form of the
/// original's status dialog.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub phase: String,
    pub remote_nickname: Option<String>,
    pub remote_addr: Option<String>,
    pub missed_keepalives: u32,
    pub one_way_delay_ms: Option<i64>,
    pub audio: StreamStats,
    pub video: StreamStats,
    pub bitrate_current: BitrateSample,
    pub bitrate_smoothed: BitrateSample,
    pub audio_buffer_depth: usize,
    pub video_buffer_depth: usize,
    pub video_buffering: bool,
    pub parameters: AdaptiveParameters,
}

// ── Session ──────────────────────────────────────────────────────

/// The transport/session state machine for one two-peer call.
pub struct Session {
    config: SessionConfig,
    identity: LocalIdentity,
    targets: DiscoveryTargets,
    peer: PeerSession,
    audio_rx: SequenceTracker,
    video_rx: SequenceTracker,
    audio_tx_seq: i64,
    video_tx_seq: i64,
    audio_buffer: AudioJitterBuffer,
    video_buffer: VideoJitterBuffer,
    controller: AdaptiveController,
    bitrate: BitrateMeter,
    one_way_delay_ms: Option<i64>,
    outbox: Vec<Outbound>,
    events: Vec<SessionEvent>,
    was_buffering: bool,
}

impl Session {
    pub fn new(config: SessionConfig, mut identity: LocalIdentity) -> Result<Self, CallError> {
        identity.set_accept_loopback(config.network.allow_loopback);
        let params = config.initial_parameters()?;
        let sizing = if config.video.auto_sizing {
            VideoSizing::Auto
        } else {
            VideoSizing::Fixed
        };
        let local_id = identity.id();
        let local_nickname = identity.nickname().to_string();
        let targets = DiscoveryTargets::new(config.network.port, &config.network.broadcast_addrs);

        Ok(Self {
            peer: PeerSession::new(local_id, local_nickname),
            audio_rx: SequenceTracker::new(),
            video_rx: SequenceTracker::new(),
            audio_tx_seq: 0,
            video_tx_seq: 0,
            audio_buffer: AudioJitterBuffer::new(
                config.audio.buffer_target,
                config.audio.buffering_enabled,
            ),
            video_buffer: VideoJitterBuffer::new(
                params.video_buffer_target,
                params.video_buffer_max,
                config.video.preserve_tail,
            ),
            controller: AdaptiveController::new(params, sizing),
            bitrate: BitrateMeter::new(),
            one_way_delay_ms: None,
            outbox: Vec::new(),
            events: Vec::new(),
            was_buffering: true,
            targets,
            identity,
            config,
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn peer(&self) -> &PeerSession {
        &self.peer
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut LocalIdentity {
        &mut self.identity
    }

    pub fn params(&self) -> AdaptiveParameters {
        self.controller.params()
    }

    pub fn audio_packet_ms(&self) -> u16 {
        self.controller.params().audio_packet_ms
    }

    pub fn audio_loss(&self) -> &SequenceTracker {
        &self.audio_rx
    }

    pub fn video_loss(&self) -> &SequenceTracker {
        &self.video_rx
    }

    pub fn audio_buffer(&self) -> &AudioJitterBuffer {
        &self.audio_buffer
    }

    pub fn video_buffer(&self) -> &VideoJitterBuffer {
        &self.video_buffer
    }

    /// Replace the discovery fan-out list (tests, point-to-point
    /// links with known peers).
    pub fn set_discovery_targets(&mut self, targets: DiscoveryTargets) {
        self.targets = targets;
    }

    /// Drain the staged outbound datagrams.
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Drain the staged events.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Credit bytes the scheduler actually put on the wire.
    pub fn note_bytes_sent(&mut self, bytes: usize) {
        self.bitrate.add_sent(bytes as u64);
    }

    // ── Inbound dispatch ─────────────────────────────────────────

    /// Decode and dispatch one raw datagram. Malformed input is
    /// dropped whole.
    pub fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant, now_ms: i64) {
        match Envelope::decode(bytes) {
            Ok(envelope) => self.handle_inbound(envelope, bytes.len(), from, now, now_ms),
            Err(e) => trace!(%from, error = %e, "dropping malformed datagram"),
        }
    }

    /// Dispatch one decoded envelope.
    pub fn handle_inbound(
        &mut self,
        envelope: Envelope,
        wire_len: usize,
        from: SocketAddr,
        now: Instant,
        now_ms: i64,
    ) {
        if self.identity.is_self(envelope.sender_id, from) {
            trace!(%from, "discarding self-origin datagram");
            return;
        }
        self.bitrate.add_received(wire_len as u64);

        let payload = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                trace!(%from, kind = %envelope.kind, error = %e, "dropping malformed body");
                return;
            }
        };

        // Traffic of any kind from the live peer refreshes liveness.
        if self.peer.is_current_peer(envelope.sender_id) {
            self.peer.touch(now);
        }

        match payload {
            Payload::Discover => self.on_discover(&envelope, from, now),
            Payload::DiscoverReply => self.on_discover_reply(&envelope, from, now),
            Payload::KeepAlive(body) => self.on_keepalive(&envelope, body, from, now, now_ms),
            Payload::Audio(body) => self.on_audio(&envelope, body),
            Payload::Video(body) => self.on_video(&envelope, body, now),
            Payload::Text(body) => self.on_text(&envelope, body),
            Payload::AudioFormat(body) => self.on_audio_format(body),
        }
    }

    fn remote_from(&self, envelope: &Envelope, from: SocketAddr) -> RemotePeer {
        RemotePeer {
            id: envelope.sender_id,
            nickname: envelope.nickname.clone(),
            addr: from,
        }
    }

    fn on_discover(&mut self, envelope: &Envelope, from: SocketAddr, now: Instant) {
        // Answer directly; only DISCOVER is answered, so two peers
        // cannot loop replies at each other.
        self.stage(Payload::DiscoverReply, from);

        let offered = self.remote_from(envelope, from);
        match self.peer.adopt(offered, now) {
            AdoptOutcome::New => self.announce_adopted(now),
            AdoptOutcome::Refreshed => {}
            AdoptOutcome::Conflict => {
                // A DISCOVER is an explicit handshake: the old peer is
                // gone or being replaced. Reset, then adopt.
                info!(nickname = %envelope.nickname, %from, "peer changed, restarting session");
                self.apply_reset(ResetKind::Full);
                let offered = self.remote_from(envelope, from);
                self.peer.adopt(offered, now);
                self.announce_adopted(now);
            }
        }
    }

    fn on_discover_reply(&mut self, envelope: &Envelope, from: SocketAddr, now: Instant) {
        let offered = self.remote_from(envelope, from);
        match self.peer.adopt(offered, now) {
            AdoptOutcome::New => self.announce_adopted(now),
            AdoptOutcome::Refreshed => {}
            AdoptOutcome::Conflict => {
                debug!(nickname = %envelope.nickname, %from, "ignoring reply from conflicting peer");
            }
        }
    }

    fn on_keepalive(
        &mut self,
        envelope: &Envelope,
        body: KeepAliveBody,
        from: SocketAddr,
        now: Instant,
        now_ms: i64,
    ) {
        // A keepalive from an unknown peer while idle re-adopts it;
        // this is what heals a one-sided reset within one interval.
        let offered = self.remote_from(envelope, from);
        match self.peer.adopt(offered, now) {
            AdoptOutcome::New => self.announce_adopted(now),
            AdoptOutcome::Refreshed => {}
            AdoptOutcome::Conflict => {
                debug!(%from, "ignoring keepalive from conflicting peer");
                return;
            }
        }

        // Best-effort one-way delay; clocks are not synchronized, so
        // negative readings clamp to zero.
        self.one_way_delay_ms = Some((now_ms - body.sent_at_ms).max(0));
    }

    fn on_audio(&mut self, envelope: &Envelope, body: AudioBody) {
        if !self.peer.is_current_peer(envelope.sender_id) {
            trace!("dropping audio from non-session sender");
            return;
        }

        // Reject payloads no legal packetization interval could have
        // produced. The peer adapts its interval independently, so
        // the envelope spans the whole [20, 60] ms range.
        let per_ms = self.config.audio.bytes_per_ms as usize;
        let min_len = per_ms * AUDIO_PACKET_MS_MIN as usize * 9 / 10;
        let max_len = per_ms * AUDIO_PACKET_MS_MAX as usize * 11 / 10;
        if body.pcm.len() < min_len || body.pcm.len() > max_len {
            debug!(len = body.pcm.len(), "dropping audio packet with implausible size");
            return;
        }

        self.audio_rx.observe(body.sequence);
        if let Some(direct) = self.audio_buffer.push(body.pcm) {
            self.events.push(SessionEvent::PlayAudio(direct));
        }
    }

    fn on_video(&mut self, envelope: &Envelope, body: VideoBody, now: Instant) {
        if !self.peer.is_current_peer(envelope.sender_id) {
            trace!("dropping video from non-session sender");
            return;
        }

        self.video_rx.observe(body.sequence);

        let frame = VideoFrame {
            sender_id: envelope.sender_id,
            sender_nickname: envelope.nickname.clone(),
            sequence: body.sequence,
            key_frame: body.is_key_frame(),
            jpeg: body.jpeg,
            received_at: now,
        };
        match self.video_buffer.insert(frame) {
            VideoInsert::Rejected => {
                debug!(sequence = body.sequence, "rejected malformed video frame")
            }
            VideoInsert::Duplicate => trace!(sequence = body.sequence, "duplicate video frame"),
            VideoInsert::Buffered | VideoInsert::KeyFrameRestart => {}
        }
        self.emit_buffering_edge();
    }

    fn on_text(&mut self, envelope: &Envelope, body: TextBody) {
        self.events.push(SessionEvent::Text {
            nickname: envelope.nickname.clone(),
            text: body.text,
        });
    }

    fn on_audio_format(&mut self, body: AudioFormatBody) {
        self.events.push(SessionEvent::AudioFormatRequested {
            sample_rate: body.sample_rate,
        });
    }

    fn announce_adopted(&mut self, _now: Instant) {
        // Fresh peer: all per-stream state starts over.
        self.audio_rx.reset();
        self.video_rx.reset();
        self.audio_tx_seq = 0;
        self.video_tx_seq = 0;
        self.audio_buffer.clear();
        self.video_buffer.clear();
        self.emit_buffering_edge();

        if let Some(remote) = self.peer.remote() {
            info!(nickname = %remote.nickname, addr = %remote.addr, "peer discovered");
            self.events.push(SessionEvent::PeerDiscovered {
                nickname: remote.nickname.clone(),
                addr: remote.addr,
            });
        }
    }

    // ── Named ticks ──────────────────────────────────────────────

    /// Startup bootstrap and keepalive fallback: broadcast a
    /// discovery probe to every target.
    pub fn tick_announce(&mut self) {
        if self.peer.is_discovered() {
            return;
        }
        self.peer.begin_announcing();
        let targets: Vec<SocketAddr> = self.targets.iter().collect();
        for dest in targets {
            self.stage(Payload::Discover, dest);
        }
    }

    /// Keepalive send: probe the live peer, or fall back to
    /// discovery while idle.
    pub fn tick_keepalive(&mut self, now_ms: i64) {
        match self.peer.remote_addr() {
            Some(dest) => {
                self.stage(Payload::KeepAlive(KeepAliveBody { sent_at_ms: now_ms }), dest)
            }
            None => self.tick_announce(),
        }
    }

    /// Missed-keepalive accounting; resets the session past the
    /// threshold.
    pub fn tick_timeout(&mut self) {
        if !self.peer.is_discovered() {
            return;
        }
        let missed = self.peer.note_missed_keepalive();
        if missed > self.config.timing.max_missed_keepalives {
            info!(missed, "keepalive timeout, resetting session");
            self.apply_reset(ResetKind::Full);
        }
    }

    /// Hard-silence check, independent of keepalive accounting: a
    /// half-open path can ack keepalives yet deliver nothing else.
    pub fn tick_silence(&mut self, now: Instant) {
        if !self.peer.is_discovered() {
            return;
        }
        let window = Duration::from_millis(self.config.timing.silence_window_ms);
        if self.peer.silent_for(now).is_some_and(|gap| gap > window) {
            info!("packet silence exceeded window, resetting session");
            self.apply_reset(ResetKind::SilenceTrim);
        }
    }

    /// Adaptive evaluation. Returns `true` when the audio packet
    /// duration changed, so the scheduler can retime its audio tick.
    pub fn tick_adaptive(&mut self) -> bool {
        let audio_changed = self.controller.evaluate_audio(
            self.audio_buffer.depth(),
            self.audio_buffer.target(),
            self.one_way_delay_ms,
        );
        let video_changed = self
            .controller
            .evaluate_video(self.video_rx.trusted_loss_percent());
        if video_changed {
            let params = self.controller.params();
            self.video_buffer
                .set_bounds(params.video_buffer_target, params.video_buffer_max);
            debug!(
                buffer_target = params.video_buffer_target,
                buffer_max = params.video_buffer_max,
                "video buffer bounds adjusted"
            );
        }
        if audio_changed {
            debug!(ms = self.controller.params().audio_packet_ms, "audio packet duration adjusted");
        }
        audio_changed
    }

    /// Bitrate accounting tick.
    pub fn tick_bitrate(&mut self, now: Instant) {
        self.bitrate.tick(now);
    }

    /// Audio playback tick: release the next primed payload.
    pub fn tick_audio_playback(&mut self) {
        if let Some(payload) = self.audio_buffer.pop_ready() {
            self.events.push(SessionEvent::PlayAudio(payload));
        }
    }

    /// Video playback tick: show the freshest buffered frame.
    pub fn tick_video_playback(&mut self) {
        if let Some(frame) = self.video_buffer.take_latest() {
            self.events.push(SessionEvent::DisplayVideo(frame));
        }
    }

    /// Diagnostics tick.
    pub fn tick_stats(&mut self) {
        let snapshot = self.snapshot();
        self.events.push(SessionEvent::Stats(snapshot));
    }

    // ── Send paths ───────────────────────────────────────────────

    /// Send a chat line to the live peer.
    pub fn send_text(&mut self, text: String) -> Result<(), CallError> {
        let dest = self.peer.remote_addr().ok_or(CallError::NoPeer)?;
        self.stage(Payload::Text(TextBody { text }), dest);
        Ok(())
    }

    /// Send one captured PCM block.
    pub fn send_audio_block(&mut self, pcm: Vec<u8>) -> Result<(), CallError> {
        let dest = self.peer.remote_addr().ok_or(CallError::NoPeer)?;
        let sequence = self.audio_tx_seq;
        self.audio_tx_seq += 1;
        self.stage(Payload::Audio(AudioBody { sequence, pcm }), dest);
        Ok(())
    }

    /// Send one captured, already-compressed video frame.
    pub fn send_video_frame(&mut self, jpeg: Vec<u8>, key_frame: bool) -> Result<(), CallError> {
        let dest = self.peer.remote_addr().ok_or(CallError::NoPeer)?;
        let sequence = self.video_tx_seq;
        self.video_tx_seq += 1;
        let flags = if key_frame {
            FrameFlags::KEY_FRAME.bits()
        } else {
            0
        };
        self.stage(
            Payload::Video(VideoBody {
                sequence,
                flags,
                jpeg,
            }),
            dest,
        );
        Ok(())
    }

    /// Ask the peer to capture at the given sample rate. Best effort.
    pub fn send_audio_format(&mut self, sample_rate: i32) -> Result<(), CallError> {
        let dest = self.peer.remote_addr().ok_or(CallError::NoPeer)?;
        self.stage(Payload::AudioFormat(AudioFormatBody { sample_rate }), dest);
        Ok(())
    }

    // ── Operator controls ────────────────────────────────────────

    pub fn set_audio_buffering(&mut self, enabled: bool) {
        self.audio_buffer.set_enabled(enabled);
    }

    pub fn set_audio_buffer_target(&mut self, target: usize) {
        self.audio_buffer.set_target(target);
    }

    /// Pin the video buffer bounds; disables loss-driven sizing.
    pub fn set_video_bounds(&mut self, target: usize, max: usize) -> Result<(), CallError> {
        self.controller.set_video_bounds(target, max)?;
        self.video_buffer.set_bounds(target, max);
        Ok(())
    }

    pub fn set_video_auto(&mut self) {
        self.controller.set_video_auto();
    }

    /// Explicit operator reset.
    pub fn reset(&mut self) {
        self.apply_reset(ResetKind::Full);
    }

    // ── Diagnostics ──────────────────────────────────────────────

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            phase: self.peer.phase().to_string(),
            remote_nickname: self.peer.remote().map(|r| r.nickname.clone()),
            remote_addr: self.peer.remote().map(|r| r.addr.to_string()),
            missed_keepalives: self.peer.missed_keepalives(),
            one_way_delay_ms: self.one_way_delay_ms,
            audio: StreamStats {
                received: self.audio_rx.total_received(),
                lost: self.audio_rx.total_lost(),
                loss_percent: self.audio_rx.loss_percent(),
            },
            video: StreamStats {
                received: self.video_rx.total_received(),
                lost: self.video_rx.total_lost(),
                loss_percent: self.video_rx.loss_percent(),
            },
            bitrate_current: self.bitrate.current(),
            bitrate_smoothed: self.bitrate.smoothed(),
            audio_buffer_depth: self.audio_buffer.depth(),
            video_buffer_depth: self.video_buffer.depth(),
            video_buffering: self.video_buffer.is_buffering(),
            parameters: self.controller.params(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn stage(&mut self, payload: Payload, dest: SocketAddr) {
        match Envelope::new(self.identity.id(), self.identity.nickname(), &payload) {
            Ok(envelope) => self.outbox.push(Outbound { envelope, dest }),
            Err(e) => warn!(kind = %payload.kind(), error = %e, "failed to encode datagram"),
        }
    }

    fn apply_reset(&mut self, kind: ResetKind) {
        let dropped_peer = self.peer.reset();
        self.audio_rx.reset();
        self.video_rx.reset();
        self.audio_tx_seq = 0;
        self.video_tx_seq = 0;
        self.one_way_delay_ms = None;
        self.audio_buffer.clear();
        match kind {
            ResetKind::Full => self.video_buffer.clear(),
            ResetKind::SilenceTrim => self.video_buffer.retain_recent(),
        }
        self.emit_buffering_edge();

        if dropped_peer {
            self.events.push(SessionEvent::PeerLost);
        }
    }

    fn emit_buffering_edge(&mut self) {
        let buffering = self.video_buffer.is_buffering();
        if buffering != self.was_buffering {
            self.was_buffering = buffering;
            self.events.push(SessionEvent::VideoBuffering(buffering));
        }
    }
}
