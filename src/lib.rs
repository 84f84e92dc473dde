pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod pool;
pub mod session;

pub use channel::{
    AudioChunk, ChannelPeer, ChannelSender, InboundEvent, OutboundEvent, PlaybackState,
    StreamChannel, StreamContext, PROTOCOL_VERSION,
};
pub use config::Config;
pub use engine::{
    EngineEvent, EngineEvents, EngineKey, EngineRegistry, LoopbackRegistry, RecognitionConfig,
    RecognitionEngine, RecognitionMode, RecognitionStream, RecognizedSegment, TranslationConfig,
    TranslationEngine,
};
pub use error::{AttachError, ErrorCode, SessionFailure};
pub use manager::{Attached, ManagerOptions, SessionManager};
pub use pool::{Disposable, EnginePool};
pub use session::{
    FileSettings, Session, SessionKey, SessionState, SessionStats, Settings, SettingsProvider,
    StaticSettings, TranscriptSegment,
};
