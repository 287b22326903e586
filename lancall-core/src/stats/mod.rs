pub mod bitrate;
pub mod loss;

pub use bitrate::{BitrateMeter, BitrateSample, WINDOW_SLOTS};
pub use loss::{Observation, SequenceTracker, MIN_TRUSTED_SAMPLES};
