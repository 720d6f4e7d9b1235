//! Error types shared by the engine and the plugin host.

use thiserror::Error;

use crate::project::TrackType;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectError {
    #[error("invalid note: {0}")]
    InvalidNote(String),
    #[error("invalid timeline block: {0}")]
    InvalidBlock(String),
    #[error("a {track:?} track cannot host a {block:?} block")]
    TrackTypeMismatch { track: TrackType, block: TrackType },
    #[error("track index {0} out of range")]
    TrackOutOfRange(usize),
    #[error("pattern index {0} out of range")]
    PatternOutOfRange(usize),
    #[error("sample index {0} out of range")]
    SampleOutOfRange(usize),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unsupported plugin format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to load plugin library: {0}")]
    Library(String),
    #[error("plugin entry point not found in {0}")]
    MissingEntry(String),
    #[error("plugin failed to instantiate: {0}")]
    Instantiation(String),
    #[error("plugin has no editor")]
    NoEditor,
    #[error("unsupported window handle for plugin editor")]
    UnsupportedWindow,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
