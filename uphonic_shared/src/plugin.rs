//! Engine-side contract for instrument plugins.
//!
//! Every supported binary protocol gets one adapter implementing
//! [`PluginInstance`]; the engine never sees anything else. All methods except
//! construction and drop are called from the audio thread and must not
//! allocate or block.

use raw_window_handle::RawWindowHandle;

use crate::{NoteEvent, NoteStatus, PluginError, MAX_EVENTS_PER_BLOCK, PITCH_COUNT};

pub trait PluginInstance: Send {
    /// Display name, usually the library file stem.
    fn name(&self) -> &str;

    /// Submit the queued note events, then render `frame_count` frames into the
    /// planar `outputs`.
    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frame_count: usize);

    /// Queue a note-on for the next `process` call.
    fn play_note(&mut self, pitch: u8, velocity: u8, sample_offset: u32);

    /// Queue a note-off for the next `process` call.
    fn stop_note(&mut self, pitch: u8, sample_offset: u32);

    /// Replace the pending batch with a note-off for every pitch.
    fn stop_all_notes(&mut self);

    /// Events the pending batch had no room for since the last call.
    fn take_dropped_events(&mut self) -> u32 {
        0
    }

    fn open_editor(&mut self, _parent: RawWindowHandle) -> Result<(), PluginError> {
        Err(PluginError::NoEditor)
    }

    fn close_editor(&mut self) {}

    fn editor_size(&self) -> Option<(u32, u32)> {
        None
    }
}

/// Fixed-capacity batch of note events waiting for the next `process` call.
///
/// Pushing past capacity drops the event and bumps `dropped`.
#[derive(Clone)]
pub struct EventQueue {
    events: [NoteEvent; MAX_EVENTS_PER_BLOCK],
    len: usize,
    dropped: u32,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub const CAPACITY: usize = MAX_EVENTS_PER_BLOCK;

    pub fn new() -> Self {
        Self {
            events: [NoteEvent::SILENT; MAX_EVENTS_PER_BLOCK],
            len: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: NoteEvent) -> bool {
        if self.len >= Self::CAPACITY {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        self.events[self.len] = event;
        self.len += 1;
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Discard whatever is pending and queue a note-off for all 128 pitches at offset 0.
    pub fn fill_all_notes_off(&mut self) {
        self.len = 0;
        for pitch in 0..PITCH_COUNT {
            self.push(NoteEvent::note_off(pitch, 0));
        }
    }

    pub fn as_slice(&self) -> &[NoteEvent] {
        &self.events[..self.len]
    }

    /// Order pending events by offset, note-offs first on ties. Sorts in place.
    pub fn sort_by_offset(&mut self) {
        self.events[..self.len].sort_unstable_by_key(|ev| (ev.sample_offset, ev.status == NoteStatus::On));
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Events lost to overflow since the last call; resets the counter.
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }
}
