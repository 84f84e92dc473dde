//! Reference-counted engine pooling
//!
//! `EnginePool` shares one instance per configuration key between every session
//! that asks for it, and disposes an instance only after it has been unused for
//! an idle window. Sessions toggling on and off therefore reuse warm engines.

mod engine_pool;

pub use engine_pool::{Disposable, EnginePool};
