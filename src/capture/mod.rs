pub mod camera;
pub mod classifier;
pub mod loop_worker;
pub mod source;

pub use camera::CameraSource;
pub use classifier::{
    parse_classifier_output, Classification, CommandClassifier, ConfidenceScale,
    EmotionClassifier,
};
pub use loop_worker::{capture_loop, LoopConfig, LoopExit, SharedSource};
pub use source::{
    is_supported_video, Frame, FrameSource, ImageSequenceSource, VideoFileSource,
    SUPPORTED_VIDEO_EXTENSIONS,
};
