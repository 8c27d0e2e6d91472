pub mod decode;
pub mod engines;
pub mod segment;
pub mod session;
pub mod vad;
pub mod wav;

pub use decode::StreamDecoder;
pub use engines::{AsrEngine, AsrRequest, AsrResult, MtEngine, TtsEngine};
pub use segment::{SegmentDetector, SegmentEvent};
pub use session::{SessionEvent, SessionPipeline};
pub use vad::{VadFactory, VadModel};

/// Sample rate of the browser's Opus stream.
pub const SOURCE_SAMPLE_RATE: u32 = 48_000;
/// Sample rate the pipeline operates at after decode.
pub const PIPELINE_SAMPLE_RATE: u32 = 16_000;
