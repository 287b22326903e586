//! Sequence-indexed, key-frame-aware video jitter buffer.
//!
//! Frames are indexed by sequence number in an ordered map while a
//! separate FIFO list remembers admission order. Capacity is
//! enforced by evicting in admission order, never numeric order, so
//! a reordered burst cannot evict the newest frame. A key frame
//! flushes everything before it: inter-frame data older than a key
//! frame is assumed undecodable. Playback always takes the highest
//! buffered sequence and discards the rest ("freshest frame wins"),
//! trading strict order for low latency.

use std::collections::{BTreeMap, VecDeque};

use crate::media::{self, VideoFrame};

/// What happened to a frame offered to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoInsert {
    /// Stored normally.
    Buffered,
    /// Key frame: buffer flushed, buffering phase restarted.
    KeyFrameRestart,
    /// Sequence already present; ignored.
    Duplicate,
    /// Failed the payload integrity check; never entered the buffer.
    Rejected,
}

/// Bounded video playout buffer.
pub struct VideoJitterBuffer {
    frames: BTreeMap<i64, VideoFrame>,
    admission: VecDeque<i64>,
    target: usize,
    max: usize,
    buffering: bool,
    preserve_tail: usize,
    evicted: u64,
}

impl VideoJitterBuffer {
    /// `preserve_tail` is how many of the newest frames survive a
    /// silence trim (see [`retain_recent`](Self::retain_recent)).
    pub fn new(target: usize, max: usize, preserve_tail: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            admission: VecDeque::new(),
            target: target.max(1),
            max: max.max(2),
            buffering: true,
            preserve_tail,
            evicted: 0,
        }
    }

    /// Offer a received frame.
    pub fn insert(&mut self, frame: VideoFrame) -> VideoInsert {
        if !media::is_valid_video_payload(&frame.jpeg) {
            return VideoInsert::Rejected;
        }

        if frame.key_frame {
            // A key frame starts a fresh GOP; everything buffered
            // before it cannot be decoded against it.
            self.frames.clear();
            self.admission.clear();
            self.buffering = true;
            let seq = frame.sequence;
            self.frames.insert(seq, frame);
            self.admission.push_back(seq);
            self.check_primed();
            return VideoInsert::KeyFrameRestart;
        }

        if self.frames.contains_key(&frame.sequence) {
            return VideoInsert::Duplicate;
        }

        let seq = frame.sequence;
        self.frames.insert(seq, frame);
        self.admission.push_back(seq);
        self.enforce_capacity();
        self.check_primed();
        VideoInsert::Buffered
    }

    /// Take the frame to display on this playback tick: the highest
    /// buffered sequence. Everything older is discarded; displaying
    /// it later would step backwards in time. `None` while the
    /// buffer is still filling to its target.
    pub fn take_latest(&mut self) -> Option<VideoFrame> {
        if self.buffering {
            return None;
        }
        let latest = *self.frames.keys().next_back()?;
        let frame = self.frames.remove(&latest);
        self.frames.clear();
        self.admission.clear();
        frame
    }

    /// Silence recovery: keep only the newest `preserve_tail` frames
    /// so playback can resume immediately if the peer comes back.
    pub fn retain_recent(&mut self) {
        while self.frames.len() > self.preserve_tail {
            self.frames.pop_first();
        }
        self.admission.retain(|seq| self.frames.contains_key(seq));
    }

    /// Full reset: drop everything and restart the buffering phase.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.admission.clear();
        self.buffering = true;
    }

    /// Apply new bounds from the adaptive controller. Shrinking may
    /// evict immediately, oldest admissions first.
    pub fn set_bounds(&mut self, target: usize, max: usize) {
        self.target = target.max(1);
        self.max = max.max(2);
        self.enforce_capacity();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Frames discarded by the capacity policy.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    // ── Internal ─────────────────────────────────────────────────

    fn enforce_capacity(&mut self) {
        while self.frames.len() > self.max {
            match self.admission.pop_front() {
                Some(seq) => {
                    if self.frames.remove(&seq).is_some() {
                        self.evicted += 1;
                    }
                }
                None => break,
            }
        }
    }

    fn check_primed(&mut self) {
        if self.buffering && self.frames.len() >= self.target {
            self.buffering = false;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PeerId;
    use std::time::Instant;

    fn frame(sequence: i64, key_frame: bool) -> VideoFrame {
        VideoFrame {
            sender_id: PeerId::generate(),
            sender_nickname: "cam".into(),
            sequence,
            key_frame,
            jpeg: vec![0xFF, 0xD8, 0x00, sequence as u8],
            received_at: Instant::now(),
        }
    }

    fn bad_frame(sequence: i64) -> VideoFrame {
        VideoFrame {
            jpeg: vec![0x00, 0x01],
            ..frame(sequence, false)
        }
    }

    #[test]
    fn rejects_invalid_payloads() {
        let mut buf = VideoJitterBuffer::new(2, 8, 4);
        assert_eq!(buf.insert(bad_frame(0)), VideoInsert::Rejected);
        let mut empty = frame(1, false);
        empty.jpeg.clear();
        assert_eq!(buf.insert(empty), VideoInsert::Rejected);
        assert_eq!(buf.depth(), 0);
    }

    #[test]
    fn duplicates_are_idempotent() {
        let mut buf = VideoJitterBuffer::new(2, 8, 4);
        assert_eq!(buf.insert(frame(5, false)), VideoInsert::Buffered);
        assert_eq!(buf.insert(frame(5, false)), VideoInsert::Duplicate);
        assert_eq!(buf.depth(), 1);
    }

    #[test]
    fn size_never_exceeds_max() {
        let mut buf = VideoJitterBuffer::new(2, 4, 4);
        // Adversarial arrival order, including reordering.
        for seq in [9, 1, 7, 3, 8, 2, 30, 11, 4, 25] {
            buf.insert(frame(seq, false));
            assert!(buf.depth() <= 4);
        }
        assert!(buf.evicted() > 0);
    }

    #[test]
    fn eviction_follows_admission_order_not_sequence() {
        let mut buf = VideoJitterBuffer::new(1, 2, 4);
        buf.insert(frame(10, false));
        buf.insert(frame(2, false));
        // Third frame forces an eviction: the first admitted (seq 10)
        // goes, even though seq 2 is numerically older.
        buf.insert(frame(30, false));
        assert_eq!(buf.depth(), 2);
        let remaining: Vec<i64> = buf.frames.keys().copied().collect();
        assert_eq!(remaining, vec![2, 30]);
    }

    #[test]
    fn key_frame_flushes_prior_frames() {
        let mut buf = VideoJitterBuffer::new(1, 8, 4);
        buf.insert(frame(1, false));
        buf.insert(frame(2, false));
        assert_eq!(buf.insert(frame(3, true)), VideoInsert::KeyFrameRestart);

        buf.insert(frame(4, false));
        let remaining: Vec<i64> = buf.frames.keys().copied().collect();
        // Exactly the key frame plus what arrived after it.
        assert_eq!(remaining, vec![3, 4]);
    }

    #[test]
    fn buffering_until_target_then_freshest_wins() {
        let mut buf = VideoJitterBuffer::new(3, 8, 4);
        assert!(buf.is_buffering());
        buf.insert(frame(1, false));
        buf.insert(frame(2, false));
        assert!(buf.take_latest().is_none());

        buf.insert(frame(3, false));
        assert!(!buf.is_buffering());

        let shown = buf.take_latest().unwrap();
        assert_eq!(shown.sequence, 3);
        // Older frames were discarded with it.
        assert_eq!(buf.depth(), 0);

        // Once primed, playback does not re-enter buffering on its own.
        buf.insert(frame(4, false));
        assert_eq!(buf.take_latest().unwrap().sequence, 4);
    }

    #[test]
    fn key_frame_restarts_buffering_phase() {
        let mut buf = VideoJitterBuffer::new(2, 8, 4);
        buf.insert(frame(1, false));
        buf.insert(frame(2, false));
        assert!(!buf.is_buffering());

        buf.insert(frame(10, true));
        assert!(buf.is_buffering());
        assert!(buf.take_latest().is_none());

        buf.insert(frame(11, false));
        assert!(!buf.is_buffering());
        assert_eq!(buf.take_latest().unwrap().sequence, 11);
    }

    #[test]
    fn retain_recent_keeps_newest_tail() {
        let mut buf = VideoJitterBuffer::new(1, 16, 3);
        for seq in 0..10 {
            buf.insert(frame(seq, false));
        }
        buf.retain_recent();
        let remaining: Vec<i64> = buf.frames.keys().copied().collect();
        assert_eq!(remaining, vec![7, 8, 9]);
        // Admission list stays consistent with the surviving frames.
        assert_eq!(buf.admission.len(), 3);
    }

    #[test]
    fn shrinking_bounds_evicts_immediately() {
        let mut buf = VideoJitterBuffer::new(2, 8, 4);
        for seq in 0..8 {
            buf.insert(frame(seq, false));
        }
        buf.set_bounds(2, 3);
        assert!(buf.depth() <= 3);
    }

    #[test]
    fn clear_restarts_buffering() {
        let mut buf = VideoJitterBuffer::new(1, 8, 4);
        buf.insert(frame(1, false));
        assert!(!buf.is_buffering());
        buf.clear();
        assert!(buf.is_buffering());
        assert_eq!(buf.depth(), 0);
    }
}
