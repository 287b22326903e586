//! The async shell around [`Session`]: one task owning the socket,
//! every periodic timer, and the session state.
//!
//! All mutation funnels through this single task. Capture callbacks
//! (which may run on their own threads) reach it over an mpsc
//! channel, and session output leaves over another, so no lock is
//! ever shared with the outside. Cancellation stops the timers and
//! the socket together; nothing here blocks on network I/O.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use crate::codec::DatagramCodec;
use crate::config::{SessionConfig, TimingConfig};
use crate::discovery::LocalIdentity;
use crate::error::CallError;
use crate::media::{CaptureInput, SessionEvent};
use crate::message::MessageKind;
use crate::session::{Outbound, Session};

/// Capture inputs queued toward the scheduler.
const CAPTURE_CHANNEL_CAPACITY: usize = 64;
/// Session events queued toward the embedder.
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Video datagrams held back for retry after a send failure.
const PENDING_VIDEO_MAX: usize = 8;

// ── SessionHandle ────────────────────────────────────────────────

/// The embedder's side of a running scheduler: feed capture input,
/// consume events, request shutdown.
pub struct SessionHandle {
    capture_tx: mpsc::Sender<CaptureInput>,
    events_rx: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

impl SessionHandle {
    /// A cloneable sender for capture callbacks.
    pub fn capture(&self) -> mpsc::Sender<CaptureInput> {
        self.capture_tx.clone()
    }

    /// Feed one capture input.
    pub async fn send(&self, input: CaptureInput) -> Result<(), CallError> {
        self.capture_tx.send(input).await.map_err(Into::into)
    }

    /// Receive the next session event. `None` after shutdown.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// The socket address the session is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the scheduler: timers first, then socket and buffers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── SessionScheduler ─────────────────────────────────────────────

/// Drives a [`Session`]: binds the socket, runs the timers, and
/// dispatches inbound datagrams.
pub struct SessionScheduler {
    session: Session,
    socket: UdpSocket,
    timing: TimingConfig,
    capture_rx: mpsc::Receiver<CaptureInput>,
    events_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionScheduler {
    /// Bind the session socket and build the scheduler plus the
    /// embedder's handle.
    pub async fn bind(config: SessionConfig) -> Result<(Self, SessionHandle), CallError> {
        let socket =
            UdpSocket::bind((config.network.bind_addr, config.network.port)).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;

        let mut identity = LocalIdentity::new(&config.nickname);
        if !local_addr.ip().is_unspecified() {
            identity.register_local_addr(local_addr.ip());
        }
        // Best-effort: learn the outbound interface address so our
        // own broadcasts echoed back from it are screened even when
        // bound to the wildcard address.
        if let Some(ip) = detect_local_ip() {
            identity.register_local_addr(ip);
        }

        info!(id = %identity.id(), nickname = %identity.nickname(), %local_addr, "session bound");

        let timing = config.timing.clone();
        let session = Session::new(config, identity)?;

        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let scheduler = Self {
            session,
            socket,
            timing,
            capture_rx,
            events_tx,
            cancel: cancel.clone(),
        };
        let handle = SessionHandle {
            capture_tx,
            events_rx,
            cancel,
            local_addr,
        };
        Ok((scheduler, handle))
    }

    /// Direct access to the session before `run`, for embedders that
    /// need to adjust discovery targets or operator controls.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Run until cancelled. Consumes the scheduler; dropping the
    /// returned future tears down socket and timers together.
    pub async fn run(self) -> Result<(), CallError> {
        let SessionScheduler {
            mut session,
            socket,
            timing,
            mut capture_rx,
            events_tx,
            cancel,
        } = self;

        let mut framed = UdpFramed::new(socket, DatagramCodec);
        let mut pending_video: VecDeque<Outbound> = VecDeque::new();

        // Discovery bootstrap fires once, shortly after startup.
        let announce_delay = sleep(Duration::from_millis(timing.announce_delay_ms));
        tokio::pin!(announce_delay);
        let mut announced = false;

        let mut keepalive = tick_timer(timing.keepalive_interval_ms);
        let mut timeout = tick_timer(timing.timeout_check_interval_ms);
        let mut silence = tick_timer(timing.silence_check_interval_ms);
        let mut adaptive = tick_timer(timing.adaptive_interval_ms);
        let mut bitrate = tick_timer(timing.bitrate_interval_ms);
        let mut video_tick = tick_timer(timing.video_tick_ms);
        let mut audio_tick = tick_timer(session.audio_packet_ms() as u64);
        let stats_enabled = timing.stats_interval_ms > 0;
        let mut stats = tick_timer(timing.stats_interval_ms.max(1));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }

                _ = &mut announce_delay, if !announced => {
                    announced = true;
                    session.tick_announce();
                }

                datagram = framed.next() => match datagram {
                    Some(Ok((inbound, from))) => {
                        session.handle_inbound(
                            inbound.envelope,
                            inbound.wire_len,
                            from,
                            Instant::now(),
                            unix_ms(),
                        );
                    }
                    Some(Err(e)) => trace!(error = %e, "dropping undecodable datagram"),
                    None => {
                        warn!("datagram stream ended");
                        break;
                    }
                },

                input = capture_rx.recv() => match input {
                    Some(input) => apply_capture(&mut session, input),
                    None => {
                        info!("capture side closed, shutting down");
                        break;
                    }
                },

                _ = keepalive.tick() => session.tick_keepalive(unix_ms()),
                _ = timeout.tick() => session.tick_timeout(),
                _ = silence.tick() => session.tick_silence(Instant::now()),
                _ = bitrate.tick() => session.tick_bitrate(Instant::now()),
                _ = audio_tick.tick() => session.tick_audio_playback(),
                _ = video_tick.tick() => session.tick_video_playback(),
                _ = stats.tick(), if stats_enabled => session.tick_stats(),

                _ = adaptive.tick() => {
                    if session.tick_adaptive() {
                        // Packet duration moved; retime the playback tick.
                        audio_tick = tick_timer(session.audio_packet_ms() as u64);
                    }
                }
            }

            drain(&mut framed, &mut session, &events_tx, &mut pending_video).await;
        }

        info!("session scheduler stopped");
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// An interval whose first tick fires after one full period, not
/// immediately.
fn tick_timer(period_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(period_ms.max(1));
    interval_at(TokioInstant::now() + period, period)
}

/// Wall-clock milliseconds since the Unix epoch, as carried in
/// keepalive timestamps.
pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Best-effort detection of the address our outbound route uses.
/// Connecting a UDP socket sends nothing; it only resolves a route.
fn detect_local_ip() -> Option<IpAddr> {
    let probe = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    probe.connect(("8.8.8.8", 53)).ok()?;
    probe.local_addr().ok().map(|addr| addr.ip())
}

fn apply_capture(session: &mut Session, input: CaptureInput) {
    match input {
        CaptureInput::AudioBlock(pcm) => {
            if session.send_audio_block(pcm).is_err() {
                trace!("audio block dropped, no peer discovered");
            }
        }
        CaptureInput::VideoFrame { jpeg, key_frame } => {
            if session.send_video_frame(jpeg, key_frame).is_err() {
                trace!("video frame dropped, no peer discovered");
            }
        }
        CaptureInput::Text(text) => {
            if session.send_text(text).is_err() {
                warn!("no peer connected, chat message dropped");
            }
        }
        CaptureInput::AudioFormat { sample_rate } => {
            if session.send_audio_format(sample_rate).is_err() {
                debug!("audio format hint dropped, no peer discovered");
            }
        }
    }
}

/// Flush staged datagrams and events. Send failures are non-fatal;
/// failed video datagrams are held back and retried, newest kept.
async fn drain(
    framed: &mut UdpFramed<DatagramCodec>,
    session: &mut Session,
    events_tx: &mpsc::Sender<SessionEvent>,
    pending_video: &mut VecDeque<Outbound>,
) {
    // Retry held-back video first so frames stay in order.
    while let Some(outbound) = pending_video.front() {
        let len = outbound.envelope.encoded_len();
        match framed.send((outbound.envelope.clone(), outbound.dest)).await {
            Ok(()) => {
                session.note_bytes_sent(len);
                pending_video.pop_front();
            }
            Err(e) => {
                debug!(error = %e, "video retry still failing");
                break;
            }
        }
    }

    for outbound in session.take_outbox() {
        let len = outbound.envelope.encoded_len();
        let is_video = outbound.envelope.kind == MessageKind::Video;
        match framed.send((outbound.envelope.clone(), outbound.dest)).await {
            Ok(()) => session.note_bytes_sent(len),
            Err(e) => {
                warn!(kind = %outbound.envelope.kind, error = %e, "datagram send failed");
                if is_video {
                    if pending_video.len() >= PENDING_VIDEO_MAX {
                        pending_video.pop_front();
                    }
                    pending_video.push_back(outbound);
                }
            }
        }
    }

    for event in session.take_events() {
        match events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("event channel full, dropping event")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("event consumer gone")
            }
        }
    }
}
