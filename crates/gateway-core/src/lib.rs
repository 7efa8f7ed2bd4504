pub mod acoustic;
pub mod audio_processor;
pub mod buffer;
pub mod clock;
pub mod emitter;
pub mod inference;
pub mod items;
pub mod orchestrator;
pub mod preprocess;
pub mod registry;
pub mod session;
pub mod video_processor;

pub use acoustic::{AcousticAnalyzer, AcousticFeatureExtractor, AudioChunk, EmotionClassifier};
pub use audio_processor::{AudioProcessor, AudioProcessorConfig};
pub use buffer::{AudioBuffer, BufferStats, DropBuffer, FrameBuffer};
pub use clock::{new_session_id, now_ms};
pub use emitter::{DataChannelSink, SinkError};
pub use inference::{
    InferenceBackend, InferenceError, InferenceRouter, LocalModel, LocalModelBackend,
    LocalModelLoader, RemoteHttpBackend,
};
pub use items::{FrameItem, FrameKind};
pub use orchestrator::{OrchestratorState, SessionOrchestrator, TrackKind};
pub use preprocess::{DecodeError, DecodedImage};
pub use registry::{RegistryError, SessionRegistry};
pub use session::Session;
pub use video_processor::{VideoProcessor, VideoProcessorConfig};
