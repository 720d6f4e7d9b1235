//! Transport state shared between the UI and the audio thread.
//!
//! Any thread may request play, stop or a panic. Only the audio thread moves
//! the cursors: restarts are requested through flags and applied at the top
//! of the next block.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    PlayingPattern = 1,
    PlayingTimeline = 2,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::PlayingPattern,
            2 => TransportState::PlayingTimeline,
            _ => TransportState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Pattern,
    Timeline,
}

impl PlayMode {
    fn state(self) -> TransportState {
        match self {
            PlayMode::Pattern => TransportState::PlayingPattern,
            PlayMode::Timeline => TransportState::PlayingTimeline,
        }
    }
}

struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

pub struct Transport {
    state: AtomicU8,
    pattern_beat: AtomicF64,
    timeline_beat: AtomicF64,
    pattern_loop_beats: AtomicF64,
    restart_pattern: AtomicBool,
    restart_timeline: AtomicBool,
    panic: AtomicBool,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransportState::Stopped as u8),
            pattern_beat: AtomicF64::new(0.0),
            timeline_beat: AtomicF64::new(0.0),
            pattern_loop_beats: AtomicF64::new(0.0),
            restart_pattern: AtomicBool::new(false),
            restart_timeline: AtomicBool::new(false),
            panic: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start `mode` from beat 0. Switching away from the other mode silences it first.
    pub fn play(&self, mode: PlayMode) {
        match mode {
            PlayMode::Pattern => self.restart_pattern.store(true, Ordering::Release),
            PlayMode::Timeline => self.restart_timeline.store(true, Ordering::Release),
        }
        let previous = TransportState::from_u8(self.state.swap(mode.state() as u8, Ordering::AcqRel));
        if previous != TransportState::Stopped && previous != mode.state() {
            self.request_panic();
        }
    }

    pub fn stop(&self) {
        self.state.store(TransportState::Stopped as u8, Ordering::Release);
        self.request_panic();
    }

    pub fn request_panic(&self) {
        self.panic.store(true, Ordering::Release);
    }

    /// Audio thread: consume a pending panic request.
    pub fn take_panic(&self) -> bool {
        self.panic.swap(false, Ordering::AcqRel)
    }

    /// Audio thread: apply pending cursor restarts and return the state to render.
    pub fn begin_block(&self) -> TransportState {
        if self.restart_pattern.swap(false, Ordering::AcqRel) {
            self.pattern_beat.store(0.0);
        }
        if self.restart_timeline.swap(false, Ordering::AcqRel) {
            self.timeline_beat.store(0.0);
        }
        self.state()
    }

    /// Audio thread: store the cursor of the mode that just rendered.
    pub fn advance(&self, state: TransportState, new_beat: f64) {
        match state {
            TransportState::PlayingPattern => self.pattern_beat.store(new_beat),
            TransportState::PlayingTimeline => self.timeline_beat.store(new_beat),
            TransportState::Stopped => {}
        }
    }

    pub fn set_pattern_loop(&self, loop_beats: f64) {
        self.pattern_loop_beats.store(loop_beats);
    }

    pub fn pattern_position(&self) -> f64 {
        self.pattern_beat.load()
    }

    /// Pattern cursor folded into the current preview loop.
    pub fn pattern_position_wrapped(&self) -> f64 {
        let beat = self.pattern_beat.load();
        let len = self.pattern_loop_beats.load();
        if len > 0.0 { beat % len } else { beat }
    }

    pub fn timeline_position(&self) -> f64 {
        self.timeline_beat.load()
    }

    /// Cursor of whichever mode is playing; the timeline cursor when stopped.
    pub fn position(&self, state: TransportState) -> f64 {
        match state {
            TransportState::PlayingPattern => self.pattern_position(),
            _ => self.timeline_position(),
        }
    }
}
