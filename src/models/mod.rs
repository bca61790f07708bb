pub mod emotion;
pub mod sample;

pub use emotion::{EmotionLabel, EmotionScores, EmotionVector, EMOTION_COUNT};
pub use sample::FrameSample;
