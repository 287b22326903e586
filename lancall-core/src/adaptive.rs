//! Adaptive packetization and buffer sizing.
//!
//! Two independent step-and-clamp feedback loops, evaluated on a
//! fixed cadence:
//!
//! - **Audio packet duration**: shorter packets when the playout
//!   buffer runs shallow or the link is fast (lower latency), longer
//!   packets when it runs deep or the link is slow (fewer datagrams).
//! - **Video buffer sizing**: widen target/max under sustained loss,
//!   narrow again while delivery is stable. Operators may pin fixed
//!   bounds instead.
//!
//! Every adjustment moves one step and clamps at the bounds, so the
//! loops cannot oscillate or jump discontinuously, and an adjustment
//! at a bound is a no-op.

use serde::Serialize;

use crate::error::CallError;

// ── Bounds ───────────────────────────────────────────────────────

pub const AUDIO_PACKET_MS_MIN: u16 = 20;
pub const AUDIO_PACKET_MS_MAX: u16 = 60;
pub const AUDIO_PACKET_MS_STEP: u16 = 5;
pub const AUDIO_PACKET_MS_DEFAULT: u16 = 40;

/// Minimum distance kept between the video buffer target and max.
pub const VIDEO_BUFFER_MARGIN: usize = 2;
pub const VIDEO_TARGET_MIN: usize = 2;
pub const VIDEO_TARGET_MAX: usize = 8;
pub const VIDEO_MAX_CAP: usize = 24;

/// One-way delay thresholds (ms) nudging the audio packet duration.
pub const DELAY_HIGH_MS: i64 = 100;
pub const DELAY_LOW_MS: i64 = 50;

/// Loss thresholds (percent) driving video buffer sizing.
pub const LOSS_WIDEN_PERCENT: f64 = 5.0;
pub const LOSS_NARROW_PERCENT: f64 = 1.0;

/// Consecutive evaluations a depth/loss condition must hold before
/// the controller reacts to it.
const PERSISTENCE: u8 = 2;

// ── AdaptiveParameters ───────────────────────────────────────────

/// The tunables the controller owns. Read by the capture pipeline
/// (packet duration) and the video jitter buffer (bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdaptiveParameters {
    /// Audio packetization interval in milliseconds, within
    /// `[AUDIO_PACKET_MS_MIN, AUDIO_PACKET_MS_MAX]`.
    pub audio_packet_ms: u16,
    /// Video buffer depth at which playback starts.
    pub video_buffer_target: usize,
    /// Hard cap on buffered video frames.
    pub video_buffer_max: usize,
}

impl AdaptiveParameters {
    /// Validate the `target + margin <= max` invariant and the audio
    /// bounds.
    pub fn validated(
        audio_packet_ms: u16,
        video_buffer_target: usize,
        video_buffer_max: usize,
    ) -> Result<Self, CallError> {
        if !(AUDIO_PACKET_MS_MIN..=AUDIO_PACKET_MS_MAX).contains(&audio_packet_ms) {
            return Err(CallError::InvalidParameter(
                "audio packet duration out of range",
            ));
        }
        if video_buffer_target < 1 {
            return Err(CallError::InvalidParameter("video buffer target too small"));
        }
        if video_buffer_target + VIDEO_BUFFER_MARGIN > video_buffer_max {
            return Err(CallError::InvalidParameter(
                "video buffer target too close to max",
            ));
        }
        Ok(Self {
            audio_packet_ms,
            video_buffer_target,
            video_buffer_max,
        })
    }
}

impl Default for AdaptiveParameters {
    fn default() -> Self {
        Self {
            audio_packet_ms: AUDIO_PACKET_MS_DEFAULT,
            video_buffer_target: 3,
            video_buffer_max: 10,
        }
    }
}

// ── VideoSizing ──────────────────────────────────────────────────

/// Whether the video buffer bounds follow the loss signal or stay
/// where the operator pinned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSizing {
    Fixed,
    Auto,
}

// ── AdaptiveController ───────────────────────────────────────────

/// Owns [`AdaptiveParameters`] and mutates them from feedback.
pub struct AdaptiveController {
    params: AdaptiveParameters,
    sizing: VideoSizing,
    shallow_streak: u8,
    deep_streak: u8,
    lossy_streak: u8,
    stable_streak: u8,
}

impl AdaptiveController {
    pub fn new(params: AdaptiveParameters, sizing: VideoSizing) -> Self {
        Self {
            params,
            sizing,
            shallow_streak: 0,
            deep_streak: 0,
            lossy_streak: 0,
            stable_streak: 0,
        }
    }

    pub fn params(&self) -> AdaptiveParameters {
        self.params
    }

    pub fn sizing(&self) -> VideoSizing {
        self.sizing
    }

    /// Pin the video bounds; disables automatic sizing.
    pub fn set_video_bounds(&mut self, target: usize, max: usize) -> Result<(), CallError> {
        let candidate =
            AdaptiveParameters::validated(self.params.audio_packet_ms, target, max)?;
        self.params = candidate;
        self.sizing = VideoSizing::Fixed;
        self.lossy_streak = 0;
        self.stable_streak = 0;
        Ok(())
    }

    /// Hand the video bounds back to the loss-driven loop.
    pub fn set_video_auto(&mut self) {
        self.sizing = VideoSizing::Auto;
    }

    // ── Audio loop ───────────────────────────────────────────────

    /// Evaluate the audio loop against the playout buffer depth and
    /// the latest one-way delay estimate. Returns `true` when the
    /// packet duration changed.
    pub fn evaluate_audio(
        &mut self,
        buffer_depth: usize,
        buffer_target: usize,
        one_way_delay_ms: Option<i64>,
    ) -> bool {
        let before = self.params.audio_packet_ms;

        // Depth feedback requires persistence so one noisy reading
        // cannot move the duration.
        if buffer_depth < buffer_target {
            self.shallow_streak += 1;
            self.deep_streak = 0;
            if self.shallow_streak >= PERSISTENCE {
                self.step_audio_down();
                self.shallow_streak = 0;
            }
        } else if buffer_depth * 2 > buffer_target * 3 {
            self.deep_streak += 1;
            self.shallow_streak = 0;
            if self.deep_streak >= PERSISTENCE {
                self.step_audio_up();
                self.deep_streak = 0;
            }
        } else {
            self.shallow_streak = 0;
            self.deep_streak = 0;
        }

        // Delay feedback is independent of buffer depth.
        match one_way_delay_ms {
            Some(delay) if delay > DELAY_HIGH_MS => self.step_audio_up(),
            Some(delay) if delay < DELAY_LOW_MS => self.step_audio_down(),
            _ => {}
        }

        self.params.audio_packet_ms != before
    }

    fn step_audio_up(&mut self) {
        self.params.audio_packet_ms = self
            .params
            .audio_packet_ms
            .saturating_add(AUDIO_PACKET_MS_STEP)
            .min(AUDIO_PACKET_MS_MAX);
    }

    fn step_audio_down(&mut self) {
        self.params.audio_packet_ms = self
            .params
            .audio_packet_ms
            .saturating_sub(AUDIO_PACKET_MS_STEP)
            .max(AUDIO_PACKET_MS_MIN);
    }

    // ── Video loop ───────────────────────────────────────────────

    /// Evaluate the video sizing loop against the trusted loss rate
    /// (`None` while the estimator is warming up). Returns `true`
    /// when the bounds changed.
    pub fn evaluate_video(&mut self, loss_percent: Option<f64>) -> bool {
        if self.sizing == VideoSizing::Fixed {
            return false;
        }
        let Some(loss) = loss_percent else {
            return false;
        };
        let before = (self.params.video_buffer_target, self.params.video_buffer_max);

        if loss >= LOSS_WIDEN_PERCENT {
            self.lossy_streak += 1;
            self.stable_streak = 0;
            if self.lossy_streak >= PERSISTENCE {
                self.widen_video();
                self.lossy_streak = 0;
            }
        } else if loss < LOSS_NARROW_PERCENT {
            self.stable_streak += 1;
            self.lossy_streak = 0;
            if self.stable_streak >= PERSISTENCE {
                self.narrow_video();
                self.stable_streak = 0;
            }
        } else {
            self.lossy_streak = 0;
            self.stable_streak = 0;
        }

        (self.params.video_buffer_target, self.params.video_buffer_max) != before
    }

    fn widen_video(&mut self) {
        let target = (self.params.video_buffer_target + 1).min(VIDEO_TARGET_MAX);
        let max = (self.params.video_buffer_max + 2)
            .min(VIDEO_MAX_CAP)
            .max(target + VIDEO_BUFFER_MARGIN);
        self.params.video_buffer_target = target;
        self.params.video_buffer_max = max;
    }

    fn narrow_video(&mut self) {
        let target = self
            .params
            .video_buffer_target
            .saturating_sub(1)
            .max(VIDEO_TARGET_MIN);
        let max = self
            .params
            .video_buffer_max
            .saturating_sub(2)
            .max(target + VIDEO_BUFFER_MARGIN);
        self.params.video_buffer_target = target;
        self.params.video_buffer_max = max;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdaptiveController {
        AdaptiveController::new(AdaptiveParameters::default(), VideoSizing::Auto)
    }

    #[test]
    fn validated_rejects_bad_bounds() {
        assert!(AdaptiveParameters::validated(40, 3, 10).is_ok());
        assert!(AdaptiveParameters::validated(10, 3, 10).is_err());
        assert!(AdaptiveParameters::validated(40, 0, 10).is_err());
        assert!(AdaptiveParameters::validated(40, 9, 10).is_err());
    }

    #[test]
    fn audio_duration_never_leaves_bounds() {
        let mut ctrl = controller();
        // Hammer it with every combination of extreme signals.
        for round in 0..200 {
            let depth = if round % 2 == 0 { 0 } else { 100 };
            let delay = match round % 3 {
                0 => Some(0),
                1 => Some(10_000),
                _ => None,
            };
            ctrl.evaluate_audio(depth, 3, delay);
            let ms = ctrl.params().audio_packet_ms;
            assert!((AUDIO_PACKET_MS_MIN..=AUDIO_PACKET_MS_MAX).contains(&ms));
        }
    }

    #[test]
    fn shallow_buffer_needs_persistence() {
        let mut ctrl = controller();
        assert!(!ctrl.evaluate_audio(0, 3, None));
        assert_eq!(ctrl.params().audio_packet_ms, AUDIO_PACKET_MS_DEFAULT);

        assert!(ctrl.evaluate_audio(0, 3, None));
        assert_eq!(
            ctrl.params().audio_packet_ms,
            AUDIO_PACKET_MS_DEFAULT - AUDIO_PACKET_MS_STEP
        );
    }

    #[test]
    fn deep_buffer_raises_duration() {
        let mut ctrl = controller();
        // Depth 6 vs target 3: above the 1.5x threshold.
        ctrl.evaluate_audio(6, 3, None);
        ctrl.evaluate_audio(6, 3, None);
        assert_eq!(
            ctrl.params().audio_packet_ms,
            AUDIO_PACKET_MS_DEFAULT + AUDIO_PACKET_MS_STEP
        );
    }

    #[test]
    fn interrupted_streak_does_not_adjust() {
        let mut ctrl = controller();
        ctrl.evaluate_audio(0, 3, None);
        ctrl.evaluate_audio(3, 3, None); // healthy depth resets streak
        ctrl.evaluate_audio(0, 3, None);
        assert_eq!(ctrl.params().audio_packet_ms, AUDIO_PACKET_MS_DEFAULT);
    }

    #[test]
    fn delay_nudges_are_immediate() {
        let mut ctrl = controller();
        ctrl.evaluate_audio(3, 3, Some(150));
        assert_eq!(
            ctrl.params().audio_packet_ms,
            AUDIO_PACKET_MS_DEFAULT + AUDIO_PACKET_MS_STEP
        );

        ctrl.evaluate_audio(3, 3, Some(20));
        assert_eq!(ctrl.params().audio_packet_ms, AUDIO_PACKET_MS_DEFAULT);
    }

    #[test]
    fn step_at_bound_is_noop() {
        let mut ctrl = AdaptiveController::new(
            AdaptiveParameters {
                audio_packet_ms: AUDIO_PACKET_MS_MIN,
                ..Default::default()
            },
            VideoSizing::Auto,
        );
        ctrl.evaluate_audio(3, 3, Some(10));
        assert_eq!(ctrl.params().audio_packet_ms, AUDIO_PACKET_MS_MIN);
    }

    #[test]
    fn sustained_loss_widens_video_bounds() {
        let mut ctrl = controller();
        let before = ctrl.params();
        ctrl.evaluate_video(Some(8.0));
        assert_eq!(ctrl.params(), before);

        ctrl.evaluate_video(Some(8.0));
        let widened = ctrl.params();
        assert!(widened.video_buffer_target > before.video_buffer_target);
        assert!(widened.video_buffer_max > before.video_buffer_max);
        assert!(widened.video_buffer_target + VIDEO_BUFFER_MARGIN <= widened.video_buffer_max);
    }

    #[test]
    fn stable_delivery_narrows_back() {
        let mut ctrl = controller();
        for _ in 0..4 {
            ctrl.evaluate_video(Some(10.0));
        }
        let widened = ctrl.params();

        for _ in 0..20 {
            ctrl.evaluate_video(Some(0.0));
        }
        let narrowed = ctrl.params();
        assert!(narrowed.video_buffer_max <= widened.video_buffer_max);
        assert!(narrowed.video_buffer_target >= VIDEO_TARGET_MIN);
        assert!(narrowed.video_buffer_target + VIDEO_BUFFER_MARGIN <= narrowed.video_buffer_max);
    }

    #[test]
    fn margin_always_preserved() {
        let mut ctrl = controller();
        for round in 0..100 {
            let loss = if round % 2 == 0 { 20.0 } else { 0.0 };
            ctrl.evaluate_video(Some(loss));
            let p = ctrl.params();
            assert!(p.video_buffer_target + VIDEO_BUFFER_MARGIN <= p.video_buffer_max);
            assert!(p.video_buffer_max <= VIDEO_MAX_CAP);
        }
    }

    #[test]
    fn fixed_mode_ignores_loss() {
        let mut ctrl = controller();
        ctrl.set_video_bounds(4, 12).unwrap();
        for _ in 0..10 {
            assert!(!ctrl.evaluate_video(Some(50.0)));
        }
        assert_eq!(ctrl.params().video_buffer_target, 4);
        assert_eq!(ctrl.params().video_buffer_max, 12);

        assert!(ctrl.set_video_bounds(10, 11).is_err());
    }

    #[test]
    fn untrusted_loss_is_ignored() {
        let mut ctrl = controller();
        let before = ctrl.params();
        for _ in 0..10 {
            ctrl.evaluate_video(None);
        }
        assert_eq!(ctrl.params(), before);
    }
}
