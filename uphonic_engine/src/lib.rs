pub mod assets;
pub mod commands;
pub mod config;
pub mod engine; // AudioEngine and the block renderer live here
pub mod export;
pub mod instruments;
pub mod loader;
pub mod mixer;
pub mod resampler;
pub mod scheduler;
pub mod transport;

// Re-exports
pub use commands::{EngineCommand, Garbage};
pub use config::EngineConfig;
pub use engine::{AudioEngine, EngineCore, EngineError, EngineShared, RenderContext};
pub use instruments::InstrumentRack;
pub use loader::{InstrumentLoader, InstrumentQueue, LoadOutcome};
pub use transport::{PlayMode, Transport, TransportState};
mod tests_playback;
