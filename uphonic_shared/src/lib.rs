pub mod error;
pub mod plugin;
pub mod project;

pub use error::{PluginError, ProjectError};
pub use plugin::{EventQueue, PluginInstance};

/// Upper bound on note events a track (or a plugin's pending batch) holds per block.
pub const MAX_EVENTS_PER_BLOCK: usize = 256;

/// Number of MIDI pitches a panic has to release.
pub const PITCH_COUNT: u8 = 128;

pub const STATUS_NOTE_ON: u8 = 0x90;
pub const STATUS_NOTE_OFF: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStatus {
    On,
    Off,
}

impl NoteStatus {
    /// MIDI status byte on channel 0
    pub fn status_byte(self) -> u8 {
        match self {
            NoteStatus::On => STATUS_NOTE_ON,
            NoteStatus::Off => STATUS_NOTE_OFF,
        }
    }
}

/// A note event positioned inside the block that is about to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub status: NoteStatus,
    pub pitch: u8,
    pub velocity: u8,
    /// Frame offset from the start of the block
    pub sample_offset: u32,
}

impl NoteEvent {
    pub const SILENT: NoteEvent = NoteEvent {
        status: NoteStatus::Off,
        pitch: 0,
        velocity: 0,
        sample_offset: 0,
    };

    pub fn note_on(pitch: u8, velocity: u8, sample_offset: u32) -> Self {
        Self {
            status: NoteStatus::On,
            pitch: pitch & 0x7F,
            velocity: velocity & 0x7F,
            sample_offset,
        }
    }

    pub fn note_off(pitch: u8, sample_offset: u32) -> Self {
        Self {
            status: NoteStatus::Off,
            pitch: pitch & 0x7F,
            velocity: 0,
            sample_offset,
        }
    }
}
