//! Converts beat-relative notes into sample-accurate events for one block.
//!
//! A block covers the half-open beat window `[prev_beat, new_beat)`. An event
//! whose beat lies inside the window is emitted with its frame offset from the
//! start of the block; consecutive windows therefore emit every event exactly
//! once.

use uphonic_shared::project::{MidiPattern, PatternBlock};
use uphonic_shared::{NoteEvent, NoteStatus, MAX_EVENTS_PER_BLOCK};

/// How far a note-off is pulled in ahead of the note's nominal end, so a
/// note-off always precedes a same-pitch note-on starting where it ends.
pub const NOTE_OFF_LEAD_BEATS: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockWindow {
    pub sec_per_beat: f64,
    pub prev_beat: f64,
    pub new_beat: f64,
    pub sample_rate: f64,
    pub frame_count: usize,
}

impl BlockWindow {
    /// Window starting at `prev_beat` that spans `frame_count` frames.
    pub fn new(sec_per_beat: f64, prev_beat: f64, sample_rate: f64, frame_count: usize) -> Self {
        let span = if sec_per_beat > 0.0 && sample_rate > 0.0 {
            frame_count as f64 / sample_rate / sec_per_beat
        } else {
            0.0
        };
        Self {
            sec_per_beat,
            prev_beat,
            new_beat: prev_beat + span,
            sample_rate,
            frame_count,
        }
    }

    #[inline]
    pub fn contains(&self, beat: f64) -> bool {
        beat >= self.prev_beat && beat < self.new_beat
    }

    #[inline]
    pub fn beats_per_frame(&self) -> f64 {
        if self.frame_count == 0 {
            return 0.0;
        }
        (self.new_beat - self.prev_beat) / self.frame_count as f64
    }

    /// Beat position of `frame` within the block.
    #[inline]
    pub fn frame_beat(&self, frame: usize) -> f64 {
        self.prev_beat + frame as f64 * self.beats_per_frame()
    }

    /// Frame offset of `beat`, clamped to the block.
    #[inline]
    pub fn beat_to_offset(&self, beat: f64) -> u32 {
        let last = self.frame_count.saturating_sub(1) as f64;
        let offset = ((beat - self.prev_beat) * self.sec_per_beat * self.sample_rate).round();
        offset.clamp(0.0, last) as u32
    }
}

/// The slice of the timeline a pattern is audible in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Where the pattern origin sits on the parent timeline
    pub block_start_beat: f64,
    /// Beats trimmed from the front of the pattern
    pub source_offset: f64,
    pub region_length: f64,
}

impl Region {
    /// Untrimmed, unbounded placement at beat 0.
    pub const WHOLE: Region = Region {
        block_start_beat: 0.0,
        source_offset: 0.0,
        region_length: f64::INFINITY,
    };
}

impl From<&PatternBlock> for Region {
    fn from(block: &PatternBlock) -> Self {
        Region {
            block_start_beat: block.start_time,
            source_offset: block.start_offset,
            region_length: block.length,
        }
    }
}

/// Fixed-capacity event list for one track and one block.
///
/// Also carries the offsets already handed out, so placements scheduled into
/// the same track during a block never share an offset for the same event type.
pub struct TrackEvents {
    events: [NoteEvent; MAX_EVENTS_PER_BLOCK],
    len: usize,
    dropped: u32,
    on_offsets: TakenOffsets,
    off_offsets: TakenOffsets,
}

/// Sorted set of claimed frame offsets.
#[derive(Clone, Copy)]
struct TakenOffsets {
    offsets: [u32; MAX_EVENTS_PER_BLOCK],
    len: usize,
}

impl TakenOffsets {
    const EMPTY: TakenOffsets = TakenOffsets {
        offsets: [0; MAX_EVENTS_PER_BLOCK],
        len: 0,
    };

    /// Claim the first free frame at or after `raw`; past `last_frame`, the
    /// nearest free frame before it. Only when every frame is taken does the
    /// result repeat an earlier offset.
    fn claim(&mut self, raw: u32, last_frame: u32) -> u32 {
        let raw = raw.min(last_frame);
        let taken = &self.offsets[..self.len];
        let split = taken.partition_point(|&o| o < raw);

        let mut later = raw as u64;
        for &o in &taken[split..] {
            if o as u64 != later {
                break;
            }
            later += 1;
        }
        if later <= last_frame as u64 {
            let offset = later as u32;
            self.insert(offset);
            return offset;
        }

        let mut earlier = raw as i64 - 1;
        for &o in taken[..split].iter().rev() {
            if o as i64 != earlier {
                break;
            }
            earlier -= 1;
        }
        if earlier >= 0 {
            let offset = earlier as u32;
            self.insert(offset);
            return offset;
        }
        raw
    }

    fn insert(&mut self, offset: u32) {
        if self.len >= self.offsets.len() {
            return;
        }
        let at = self.offsets[..self.len].partition_point(|&o| o < offset);
        self.offsets.copy_within(at..self.len, at + 1);
        self.offsets[at] = offset;
        self.len += 1;
    }
}

impl Default for TrackEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackEvents {
    pub const CAPACITY: usize = MAX_EVENTS_PER_BLOCK;

    pub fn new() -> Self {
        Self {
            events: [NoteEvent::SILENT; MAX_EVENTS_PER_BLOCK],
            len: 0,
            dropped: 0,
            on_offsets: TakenOffsets::EMPTY,
            off_offsets: TakenOffsets::EMPTY,
        }
    }

    /// Forget the previous block's events and claimed offsets.
    pub fn begin_block(&mut self) {
        self.len = 0;
        self.on_offsets.len = 0;
        self.off_offsets.len = 0;
    }

    /// Append an event whose raw offset was computed for a block of `frame_count`
    /// frames, moving it to a frame no earlier same-type event occupies.
    pub fn push(&mut self, mut event: NoteEvent, frame_count: usize) -> bool {
        if self.len >= Self::CAPACITY {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        let last_frame = frame_count.saturating_sub(1) as u32;
        event.sample_offset = match event.status {
            NoteStatus::On => self.on_offsets.claim(event.sample_offset, last_frame),
            NoteStatus::Off => self.off_offsets.claim(event.sample_offset, last_frame),
        };
        self.events[self.len] = event;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[NoteEvent] {
        &self.events[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Events lost to overflow since the last call.
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }
}

/// Emit the note events of `pattern`, placed per `region`, that fall in `window`.
pub fn schedule_note_events(pattern: &MidiPattern, window: &BlockWindow, region: &Region, events: &mut TrackEvents) {
    if window.frame_count == 0 || !(region.region_length >= 0.0) {
        return;
    }
    let region_start = region.block_start_beat;
    let region_end = region_start + region.region_length;
    if !region_start.is_finite() || region_start > window.new_beat || region_end < window.prev_beat {
        return;
    }

    for note in &pattern.notes {
        let lead = NOTE_OFF_LEAD_BEATS.min(note.length * 0.5);
        let start = (note.start + region_start - region.source_offset).clamp(region_start, region_end);
        let end = (note.end() - lead + region_start - region.source_offset).clamp(region_start, region_end);
        if end <= start {
            continue;
        }

        if window.contains(end) {
            events.push(NoteEvent::note_off(note.pitch, window.beat_to_offset(end)), window.frame_count);
        }
        if window.contains(start) {
            events.push(
                NoteEvent::note_on(note.pitch, note.velocity, window.beat_to_offset(start)),
                window.frame_count,
            );
        }
    }
}

/// Pattern preview: `pattern` repeats every `loop_length` beats from beat 0.
/// The cursor keeps growing, each repetition is scheduled as its own region.
pub fn schedule_pattern_loop(pattern: &MidiPattern, window: &BlockWindow, loop_length: f64, events: &mut TrackEvents) {
    if !(loop_length > 0.0) || window.prev_beat < 0.0 {
        return;
    }
    let mut iteration = ((window.prev_beat / loop_length).floor() as u64).saturating_sub(1);
    loop {
        let start = iteration as f64 * loop_length;
        if start >= window.new_beat {
            break;
        }
        let region = Region {
            block_start_beat: start,
            source_offset: 0.0,
            region_length: loop_length,
        };
        schedule_note_events(pattern, window, &region, events);
        iteration += 1;
    }
}
