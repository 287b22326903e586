//! Peer session state: who we are, who the remote peer is, and
//! whether the link is considered alive.
//!
//! The discovery lifecycle is a small state machine:
//!
//! ```text
//!  Idle ──► Announcing ──► Discovered
//!   ▲            ▲              │
//!   └────────────┴──── reset ◄──┘
//! ```
//!
//! The "remote address is set iff discovered" invariant holds by
//! construction: the remote peer is a single `Option<RemotePeer>`,
//! and the phase tracks it.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── PeerId ───────────────────────────────────────────────────────

/// Opaque per-process instance token, generated once at startup.
///
/// Carried in every datagram so receivers can discard their own
/// broadcast echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        PeerId(Uuid::new_v4())
    }

    /// The raw 16-byte representation written on the wire.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(Uuid::from_bytes(bytes))
    }

    /// Short prefix for log lines and default nicknames.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── DiscoveryPhase ───────────────────────────────────────────────

/// Current phase of the discovery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryPhase {
    /// Startup state; no announcement sent yet.
    #[default]
    Idle,

    /// Broadcasting `DISCOVER` probes, no peer adopted yet.
    Announcing,

    /// A remote peer is adopted and considered alive.
    Discovered {
        /// When the current peer was adopted.
        since: Instant,
    },
}

impl DiscoveryPhase {
    pub fn is_discovered(&self) -> bool {
        matches!(self, DiscoveryPhase::Discovered { .. })
    }
}

impl fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryPhase::Idle => write!(f, "Idle"),
            DiscoveryPhase::Announcing => write!(f, "Announcing"),
            DiscoveryPhase::Discovered { .. } => write!(f, "Discovered"),
        }
    }
}

// ── RemotePeer ───────────────────────────────────────────────────

/// Identity and address of the adopted remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub id: PeerId,
    pub nickname: String,
    pub addr: SocketAddr,
}

// ── AdoptOutcome ─────────────────────────────────────────────────

/// Result of offering a remote peer to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptOutcome {
    /// No peer was known; the offered peer is now adopted.
    New,
    /// The offered peer matches the current one; liveness refreshed
    /// (and address/nickname updated if they changed).
    Refreshed,
    /// A different peer is already live; the offer was ignored.
    Conflict,
}

// ── PeerSession ──────────────────────────────────────────────────

/// All session-scoped peer state: local identity, the remote peer,
/// and liveness counters.
pub struct PeerSession {
    local_id: PeerId,
    local_nickname: String,
    phase: DiscoveryPhase,
    remote: Option<RemotePeer>,
    missed_keepalives: u32,
    last_packet_at: Option<Instant>,
}

impl PeerSession {
    pub fn new(local_id: PeerId, local_nickname: String) -> Self {
        Self {
            local_id,
            local_nickname,
            phase: DiscoveryPhase::Idle,
            remote: None,
            missed_keepalives: 0,
            last_packet_at: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn local_nickname(&self) -> &str {
        &self.local_nickname
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    pub fn remote(&self) -> Option<&RemotePeer> {
        self.remote.as_ref()
    }

    pub fn is_discovered(&self) -> bool {
        self.phase.is_discovered()
    }

    /// Address of the live peer, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote.as_ref().map(|r| r.addr)
    }

    pub fn missed_keepalives(&self) -> u32 {
        self.missed_keepalives
    }

    pub fn last_packet_at(&self) -> Option<Instant> {
        self.last_packet_at
    }

    /// Whether `sender` is the currently adopted peer.
    pub fn is_current_peer(&self, sender: PeerId) -> bool {
        self.remote.as_ref().is_some_and(|r| r.id == sender)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Enter the announcing phase. No-op while discovered.
    pub fn begin_announcing(&mut self) {
        if !self.phase.is_discovered() {
            self.phase = DiscoveryPhase::Announcing;
        }
    }

    /// Offer a remote peer for adoption.
    ///
    /// Adopts when no peer is known, refreshes when the id matches
    /// the current peer (tracking address/nickname changes), and
    /// ignores the offer when a different peer is already live.
    pub fn adopt(&mut self, offered: RemotePeer, now: Instant) -> AdoptOutcome {
        match &mut self.remote {
            None => {
                self.phase = DiscoveryPhase::Discovered { since: now };
                self.remote = Some(offered);
                self.missed_keepalives = 0;
                self.last_packet_at = Some(now);
                AdoptOutcome::New
            }
            Some(current) if current.id == offered.id => {
                current.addr = offered.addr;
                current.nickname = offered.nickname;
                self.touch(now);
                AdoptOutcome::Refreshed
            }
            Some(_) => AdoptOutcome::Conflict,
        }
    }

    /// Record traffic from the current peer: zero the missed counter
    /// and refresh the last-packet timestamp.
    pub fn touch(&mut self, now: Instant) {
        self.missed_keepalives = 0;
        self.last_packet_at = Some(now);
    }

    /// Increment and return the missed-keepalive counter.
    pub fn note_missed_keepalive(&mut self) -> u32 {
        self.missed_keepalives += 1;
        self.missed_keepalives
    }

    /// Time since the last packet from the current peer, if any.
    pub fn silent_for(&self, now: Instant) -> Option<Duration> {
        self.last_packet_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Return to the initial state. Idempotent.
    ///
    /// Returns `true` when a live peer was actually dropped.
    pub fn reset(&mut self) -> bool {
        let was_discovered = self.remote.is_some();
        self.phase = DiscoveryPhase::Idle;
        self.remote = None;
        self.missed_keepalives = 0;
        self.last_packet_at = None;
        was_discovered
    }
}

// ── Tests ────────────────────────────────────────────────────────
