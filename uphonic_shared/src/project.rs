use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::ProjectError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Beats from the pattern origin
    pub start: f64,
    /// Beats, always > 0
    pub length: f64,
    pub pitch: u8,
    pub velocity: u8,
}

impl Note {
    pub fn new(start: f64, length: f64, pitch: u8, velocity: u8) -> Result<Self, ProjectError> {
        if !start.is_finite() || start < 0.0 {
            return Err(ProjectError::InvalidNote(format!("start {start} must be a finite beat >= 0")));
        }
        if !length.is_finite() || length <= 0.0 {
            return Err(ProjectError::InvalidNote(format!("length {length} must be > 0")));
        }
        if pitch > 127 || velocity > 127 {
            return Err(ProjectError::InvalidNote(format!(
                "pitch {pitch} / velocity {velocity} must be 7-bit"
            )));
        }
        Ok(Self { start, length, pitch, velocity })
    }

    pub fn end(&self) -> f64 {
        self.start + self.length
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MidiPattern {
    pub name: String,
    pub notes: Vec<Note>,
}

impl MidiPattern {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), notes: Vec::new() }
    }

    /// End of the last note in beats, 0 for an empty pattern.
    pub fn length_beats(&self) -> f64 {
        self.notes.iter().map(Note::end).fold(0.0, f64::max)
    }

    /// Length rounded up to whole bars, never shorter than one bar.
    pub fn loop_length_beats(&self, beats_per_bar: f64) -> f64 {
        let bar = if beats_per_bar > 0.0 { beats_per_bar } else { 4.0 };
        let bars = (self.length_beats() / bar).ceil().max(1.0);
        bars * bar
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

fn empty_frames() -> Arc<[f32]> {
    Arc::from(Vec::<f32>::new())
}

/// Decoded PCM asset. Frames are interleaved when the layout is stereo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub layout: ChannelLayout,
    pub sample_rate: f32,
    /// Where the audio was decoded from, so a persisted project can reload it.
    pub path: Option<String>,
    #[serde(skip, default = "empty_frames")]
    frames: Arc<[f32]>,
}

impl Sample {
    pub fn new(name: impl Into<String>, layout: ChannelLayout, sample_rate: f32, frames: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            layout,
            sample_rate,
            path: None,
            frames: Arc::from(frames),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len() / self.layout.channels()
    }

    /// Stereo frame at `index`; mono sources are duplicated to both sides.
    #[inline]
    pub fn frame(&self, index: usize) -> Option<(f32, f32)> {
        match self.layout {
            ChannelLayout::Mono => self.frames.get(index).map(|&s| (s, s)),
            ChannelLayout::Stereo => {
                let base = index.checked_mul(2)?;
                match (self.frames.get(base), self.frames.get(base + 1)) {
                    (Some(&l), Some(&r)) => Some((l, r)),
                    _ => None,
                }
            }
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackType {
    Midi,
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternBlock {
    pub pattern_index: usize,
    /// Beats on the song timeline
    pub start_time: f64,
    /// Beats trimmed from the front of the pattern
    pub start_offset: f64,
    pub length: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleBlock {
    pub sample_index: usize,
    pub start_time: f64,
    pub start_offset: f64,
    pub length: f64,
    /// Playback speed multiplier; 2.0 plays twice as fast
    pub stretch_scale: f64,
}

/// One placement of a pattern or a sample on a track's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimelineBlock {
    Pattern(PatternBlock),
    Sample(SampleBlock),
}

fn check_span(start_time: f64, start_offset: f64, length: f64) -> Result<(), ProjectError> {
    if !start_time.is_finite() || !start_offset.is_finite() || !length.is_finite() {
        return Err(ProjectError::InvalidBlock("non-finite position".into()));
    }
    if length <= 0.0 {
        return Err(ProjectError::InvalidBlock(format!("length {length} must be > 0")));
    }
    if start_offset < 0.0 {
        return Err(ProjectError::InvalidBlock(format!("start offset {start_offset} must be >= 0")));
    }
    Ok(())
}

impl TimelineBlock {
    pub fn pattern(pattern_index: usize, start_time: f64, start_offset: f64, length: f64) -> Result<Self, ProjectError> {
        check_span(start_time, start_offset, length)?;
        Ok(TimelineBlock::Pattern(PatternBlock { pattern_index, start_time, start_offset, length }))
    }

    pub fn sample(
        sample_index: usize,
        start_time: f64,
        start_offset: f64,
        length: f64,
        stretch_scale: f64,
    ) -> Result<Self, ProjectError> {
        check_span(start_time, start_offset, length)?;
        if !stretch_scale.is_finite() || stretch_scale <= 0.0 {
            return Err(ProjectError::InvalidBlock(format!("stretch scale {stretch_scale} must be > 0")));
        }
        Ok(TimelineBlock::Sample(SampleBlock {
            sample_index,
            start_time,
            start_offset,
            length,
            stretch_scale,
        }))
    }

    pub fn track_type(&self) -> TrackType {
        match self {
            TimelineBlock::Pattern(_) => TrackType::Midi,
            TimelineBlock::Sample(_) => TrackType::Sample,
        }
    }

    pub fn start_time(&self) -> f64 {
        match self {
            TimelineBlock::Pattern(b) => b.start_time,
            TimelineBlock::Sample(b) => b.start_time,
        }
    }

    pub fn end_time(&self) -> f64 {
        match self {
            TimelineBlock::Pattern(b) => b.start_time + b.length,
            TimelineBlock::Sample(b) => b.start_time + b.length,
        }
    }

    fn set_start_time(&mut self, start_time: f64) {
        match self {
            TimelineBlock::Pattern(b) => b.start_time = start_time,
            TimelineBlock::Sample(b) => b.start_time = start_time,
        }
    }
}

/// Channel-rack settings of the instrument bound to a Midi track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    pub plugin_path: Option<String>,
    pub volume: f32,
    /// Linear balance, -1..1
    pub pan: f32,
    /// Semitone transpose applied to every scheduled note
    pub pitch: i8,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            plugin_path: None,
            volume: 1.0,
            pan: 0.0,
            pitch: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    /// Linear gain
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub color: u32,
    pub instrument: InstrumentSettings,
    track_type: TrackType,
    blocks: Vec<TimelineBlock>,
}

impl Track {
    pub fn new(name: impl Into<String>, track_type: TrackType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            volume: 1.0,
            pan: 0.0,
            muted: false,
            solo: false,
            color: 0xFFFF_FFFF,
            instrument: InstrumentSettings::default(),
            track_type,
            blocks: Vec::new(),
        }
    }

    pub fn track_type(&self) -> TrackType {
        self.track_type
    }

    pub fn blocks(&self) -> &[TimelineBlock] {
        &self.blocks
    }

    pub fn add_block(&mut self, block: TimelineBlock) -> Result<usize, ProjectError> {
        if block.track_type() != self.track_type {
            return Err(ProjectError::TrackTypeMismatch {
                track: self.track_type,
                block: block.track_type(),
            });
        }
        self.blocks.push(block);
        Ok(self.blocks.len() - 1)
    }

    /// Room for `additional` more blocks without reallocating.
    pub fn reserve_blocks(&mut self, additional: usize) {
        self.blocks.reserve(additional);
    }

    pub fn spare_block_capacity(&self) -> usize {
        self.blocks.capacity() - self.blocks.len()
    }

    pub fn remove_block(&mut self, index: usize) -> Option<TimelineBlock> {
        if index < self.blocks.len() {
            Some(self.blocks.remove(index))
        } else {
            None
        }
    }

    pub fn move_block(&mut self, index: usize, start_time: f64) -> bool {
        if !start_time.is_finite() {
            return false;
        }
        match self.blocks.get_mut(index) {
            Some(block) => {
                block.set_start_time(start_time);
                true
            }
            None => false,
        }
    }

    /// Keeps blocks for which `keep` returns true; `keep` may rewrite them in place.
    fn retain_blocks(&mut self, mut keep: impl FnMut(&mut TimelineBlock) -> bool) {
        self.blocks.retain_mut(|block| keep(block));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub master_volume: f32,
    pub bpm: f32,
    pub time_signature: TimeSignature,
    /// Editor grid subdivisions per beat
    pub grid_resolution: u32,
    pub patterns: Vec<MidiPattern>,
    pub samples: Vec<Sample>,
    pub tracks: Vec<Track>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: "New Project".to_string(),
            master_volume: 0.5,
            bpm: 120.0,
            time_signature: TimeSignature::default(),
            grid_resolution: 4,
            patterns: Vec::new(),
            samples: Vec::new(),
            tracks: Vec::new(),
        }
    }
}

impl Project {
    pub fn sec_per_beat(&self) -> f64 {
        if self.bpm > 0.0 {
            60.0 / self.bpm as f64
        } else {
            0.0
        }
    }

    pub fn beats_per_bar(&self) -> f64 {
        self.time_signature.numerator.max(1) as f64
    }

    pub fn add_pattern(&mut self, pattern: MidiPattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub fn add_sample(&mut self, sample: Sample) -> usize {
        self.samples.push(sample);
        self.samples.len() - 1
    }

    pub fn add_track(&mut self, name: impl Into<String>, track_type: TrackType) -> usize {
        self.tracks.push(Track::new(name, track_type));
        self.tracks.len() - 1
    }

    /// Place a block after checking the track exists, the block variant matches and the index is valid.
    pub fn place_block(&mut self, track_index: usize, block: TimelineBlock) -> Result<usize, ProjectError> {
        match block {
            TimelineBlock::Pattern(b) if b.pattern_index >= self.patterns.len() => {
                return Err(ProjectError::PatternOutOfRange(b.pattern_index));
            }
            TimelineBlock::Sample(b) if b.sample_index >= self.samples.len() => {
                return Err(ProjectError::SampleOutOfRange(b.sample_index));
            }
            _ => {}
        }
        let track = self
            .tracks
            .get_mut(track_index)
            .ok_or(ProjectError::TrackOutOfRange(track_index))?;
        track.add_block(block)
    }

    /// Remove a pattern and every placement of it; later placements are re-indexed.
    pub fn remove_pattern(&mut self, index: usize) -> Result<MidiPattern, ProjectError> {
        if index >= self.patterns.len() {
            return Err(ProjectError::PatternOutOfRange(index));
        }
        let removed = self.patterns.remove(index);
        for track in &mut self.tracks {
            track.retain_blocks(|block| match block {
                TimelineBlock::Pattern(b) if b.pattern_index == index => false,
                TimelineBlock::Pattern(b) => {
                    if b.pattern_index > index {
                        b.pattern_index -= 1;
                    }
                    true
                }
                TimelineBlock::Sample(_) => true,
            });
        }
        Ok(removed)
    }

    pub fn remove_sample(&mut self, index: usize) -> Result<Sample, ProjectError> {
        if index >= self.samples.len() {
            return Err(ProjectError::SampleOutOfRange(index));
        }
        let removed = self.samples.remove(index);
        for track in &mut self.tracks {
            track.retain_blocks(|block| match block {
                TimelineBlock::Sample(b) if b.sample_index == index => false,
                TimelineBlock::Sample(b) => {
                    if b.sample_index > index {
                        b.sample_index -= 1;
                    }
                    true
                }
                TimelineBlock::Pattern(_) => true,
            });
        }
        Ok(removed)
    }

    /// Furthest end of any timeline block, in beats.
    pub fn song_length_beats(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.blocks.iter())
            .map(TimelineBlock::end_time)
            .fold(0.0, f64::max)
    }

    pub fn song_length_seconds(&self) -> f64 {
        self.song_length_beats() * self.sec_per_beat()
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }
}
