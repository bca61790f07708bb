pub mod frame_samples;
pub mod sessions;
