//! Recognition and translation engine contracts
//!
//! Engines are expensive (model weights, remote connections) and are shared between
//! sessions through `EnginePool`. This module provides:
//! - The capability traits sessions drive (`RecognitionEngine`, `TranslationEngine`)
//! - Engine configuration and pool key derivation
//! - The `EngineRegistry` collaborator that constructs engines
//! - Loopback engines used by the demo binary and tests

mod config;
mod key;
mod loopback;
mod registry;
mod traits;

pub use config::{RecognitionConfig, RecognitionMode, TranslationConfig};
pub use key::{recognition_fingerprint, translation_fingerprint, EngineKey};
pub use loopback::{LoopbackRecognizer, LoopbackRegistry, LoopbackTranslator};
pub use registry::EngineRegistry;
pub use traits::{
    EngineEvent, EngineEvents, RecognitionEngine, RecognitionStream, RecognizedSegment,
    TranslationEngine,
};
