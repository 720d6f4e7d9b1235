use crossbeam_channel::Sender;
use uphonic_shared::PluginInstance;
use uphonic_shared::project::{
    MidiPattern, Note, Project, Sample, TimeSignature, TimelineBlock, Track, TrackType,
};

use crate::instruments::InstrumentRack;

/// Spare capacity reserved before a project reaches the audio thread, so
/// edits that append can be applied without reallocating.
pub const PATTERN_HEADROOM: usize = 64;
pub const SAMPLE_HEADROOM: usize = 64;
pub const NOTE_HEADROOM: usize = 256;
pub const BLOCK_HEADROOM: usize = 64;

/// Edits sent from the UI to the audio thread, applied at the next block boundary.
pub enum EngineCommand {
    SetMasterVolume(f32),
    SetBpm(f32),
    SetTimeSignature(TimeSignature),
    SetTrackVolume { track: usize, volume: f32 },
    SetTrackPan { track: usize, pan: f32 },
    SetMute { track: usize, muted: bool },
    SetSolo { track: usize, solo: bool },
    AddTrack(Track),
    RemoveTrack { track: usize },
    AddPattern(MidiPattern),
    /// Delete a pattern along with its placements; later pattern indices shift down.
    RemovePattern { pattern: usize },
    SetPatternNotes { pattern: usize, notes: Vec<Note> },
    AddNote { pattern: usize, note: Note },
    RemoveNote { pattern: usize, index: usize },
    AddSample(Sample),
    /// Delete a sample along with its placements; later sample indices shift down.
    RemoveSample { sample: usize },
    PlaceBlock { track: usize, block: TimelineBlock },
    RemoveBlock { track: usize, index: usize },
    MoveBlock { track: usize, index: usize, start_time: f64 },
    SetInstrumentVolume { track: usize, volume: f32 },
    SetInstrumentPan { track: usize, pan: f32 },
    SetInstrumentPitch { track: usize, pitch: i8 },
    InstallInstrument { track: usize, instrument: Box<dyn PluginInstance>, path: Option<String> },
    RemoveInstrument { track: usize },
    /// Swap in a whole project with its instruments (see [`prepare_project`]).
    ReplaceProject { project: Box<Project>, rack: Box<InstrumentRack> },
}

/// Anything the audio thread lets go of. It is shipped to a non-audio thread
/// to be dropped there.
pub enum Garbage {
    Project(Box<Project>),
    Rack(Box<InstrumentRack>),
    Track(Track),
    Pattern(MidiPattern),
    Notes(Vec<Note>),
    Sample(Sample),
    Instrument(Box<dyn PluginInstance>),
    Path(Option<String>),
    /// An edit that could not be applied without allocating, or that was invalid
    Rejected(EngineCommand),
}

#[derive(Clone)]
pub struct GarbageSink {
    tx: Sender<Garbage>,
}

impl GarbageSink {
    pub fn new(tx: Sender<Garbage>) -> Self {
        Self { tx }
    }

    pub fn dispose(&self, garbage: Garbage) {
        if let Err(e) = self.tx.try_send(garbage) {
            // Channel full or closed: nothing else can free it.
            drop(e.into_inner());
        }
    }
}

fn push_within_capacity<T>(vec: &mut Vec<T>, item: T) -> Result<(), T> {
    if vec.len() < vec.capacity() {
        vec.push(item);
        Ok(())
    } else {
        Err(item)
    }
}

/// Reserve room for appending edits. Call off the audio thread.
pub fn prepare_project(project: &mut Project, max_tracks: usize) {
    let tracks = max_tracks.saturating_sub(project.tracks.len());
    project.tracks.reserve_exact(tracks);
    project.patterns.reserve(PATTERN_HEADROOM);
    project.samples.reserve(SAMPLE_HEADROOM);
    for pattern in &mut project.patterns {
        pattern.notes.reserve(NOTE_HEADROOM);
    }
    for track in &mut project.tracks {
        track.reserve_blocks(BLOCK_HEADROOM);
    }
}

/// Build a track the audio thread can take without reallocating later edits.
pub fn prepare_track(mut track: Track) -> Track {
    track.reserve_blocks(BLOCK_HEADROOM);
    track
}

/// Build a pattern with room for note edits.
pub fn prepare_pattern(mut pattern: MidiPattern) -> MidiPattern {
    pattern.notes.reserve(NOTE_HEADROOM);
    pattern
}

impl EngineCommand {
    /// Apply the edit. Returns false when the edit was rejected; the command
    /// itself then goes to `garbage`.
    pub fn apply(self, project: &mut Project, rack: &mut InstrumentRack, garbage: &GarbageSink) -> bool {
        match self {
            EngineCommand::SetMasterVolume(volume) => {
                project.master_volume = volume.max(0.0);
            }
            EngineCommand::SetBpm(bpm) => {
                if !(bpm.is_finite() && bpm > 0.0) {
                    return false;
                }
                project.bpm = bpm;
            }
            EngineCommand::SetTimeSignature(signature) => {
                project.time_signature = signature;
            }
            EngineCommand::SetTrackVolume { track, volume } => match project.tracks.get_mut(track) {
                Some(t) => t.volume = volume.max(0.0),
                None => return false,
            },
            EngineCommand::SetTrackPan { track, pan } => match project.tracks.get_mut(track) {
                Some(t) => t.pan = pan.clamp(-1.0, 1.0),
                None => return false,
            },
            EngineCommand::SetMute { track, muted } => match project.tracks.get_mut(track) {
                Some(t) => t.muted = muted,
                None => return false,
            },
            EngineCommand::SetSolo { track, solo } => match project.tracks.get_mut(track) {
                Some(t) => t.solo = solo,
                None => return false,
            },
            EngineCommand::AddTrack(track) => {
                if project.tracks.len() >= rack.capacity() {
                    garbage.dispose(Garbage::Rejected(EngineCommand::AddTrack(track)));
                    return false;
                }
                let index = project.tracks.len();
                if let Err(track) = push_within_capacity(&mut project.tracks, track) {
                    garbage.dispose(Garbage::Rejected(EngineCommand::AddTrack(track)));
                    return false;
                }
                if let Some(stale) = rack.take(index) {
                    garbage.dispose(Garbage::Instrument(stale));
                }
            }
            EngineCommand::RemoveTrack { track } => {
                if track >= project.tracks.len() {
                    return false;
                }
                garbage.dispose(Garbage::Track(project.tracks.remove(track)));
                if let Some(instrument) = rack.remove_slot(track) {
                    garbage.dispose(Garbage::Instrument(instrument));
                }
            }
            EngineCommand::AddPattern(pattern) => {
                if let Err(pattern) = push_within_capacity(&mut project.patterns, pattern) {
                    garbage.dispose(Garbage::Rejected(EngineCommand::AddPattern(pattern)));
                    return false;
                }
            }
            EngineCommand::RemovePattern { pattern } => {
                let Ok(removed) = project.remove_pattern(pattern) else {
                    return false;
                };
                garbage.dispose(Garbage::Pattern(removed));
                // Notes started by the removed placements would never see their note-off.
                rack.stop_all_notes(project);
            }
            EngineCommand::SetPatternNotes { pattern, notes } => match project.patterns.get_mut(pattern) {
                Some(p) => {
                    let old = std::mem::replace(&mut p.notes, notes);
                    garbage.dispose(Garbage::Notes(old));
                }
                None => {
                    garbage.dispose(Garbage::Notes(notes));
                    return false;
                }
            },
            EngineCommand::AddNote { pattern, note } => {
                let Some(p) = project.patterns.get_mut(pattern) else {
                    return false;
                };
                if push_within_capacity(&mut p.notes, note).is_err() {
                    return false;
                }
            }
            EngineCommand::RemoveNote { pattern, index } => {
                match project.patterns.get_mut(pattern) {
                    Some(p) if index < p.notes.len() => {
                        p.notes.remove(index);
                    }
                    _ => return false,
                }
            }
            EngineCommand::AddSample(sample) => {
                if let Err(sample) = push_within_capacity(&mut project.samples, sample) {
                    garbage.dispose(Garbage::Rejected(EngineCommand::AddSample(sample)));
                    return false;
                }
            }
            EngineCommand::RemoveSample { sample } => match project.remove_sample(sample) {
                Ok(removed) => garbage.dispose(Garbage::Sample(removed)),
                Err(_) => return false,
            },
            EngineCommand::PlaceBlock { track, block } => {
                let has_room = project.tracks.get(track).is_some_and(|t| t.spare_block_capacity() > 0);
                if !has_room || project.place_block(track, block).is_err() {
                    return false;
                }
            }
            EngineCommand::RemoveBlock { track, index } => {
                if project.tracks.get_mut(track).and_then(|t| t.remove_block(index)).is_none() {
                    return false;
                }
            }
            EngineCommand::MoveBlock { track, index, start_time } => {
                let moved = project.tracks.get_mut(track).is_some_and(|t| t.move_block(index, start_time));
                if !moved {
                    return false;
                }
            }
            EngineCommand::SetInstrumentVolume { track, volume } => match project.tracks.get_mut(track) {
                Some(t) => t.instrument.volume = volume.max(0.0),
                None => return false,
            },
            EngineCommand::SetInstrumentPan { track, pan } => match project.tracks.get_mut(track) {
                Some(t) => t.instrument.pan = pan.clamp(-1.0, 1.0),
                None => return false,
            },
            EngineCommand::SetInstrumentPitch { track, pitch } => {
                let Some(t) = project.tracks.get_mut(track) else {
                    return false;
                };
                if t.instrument.pitch != pitch {
                    t.instrument.pitch = pitch;
                    // Held notes were sent transposed by the old amount.
                    if let Some(instrument) = rack.get_mut(track) {
                        instrument.stop_all_notes();
                    }
                }
            }
            EngineCommand::InstallInstrument { track, instrument, path } => {
                let is_midi = project
                    .tracks
                    .get(track)
                    .is_some_and(|t| t.track_type() == TrackType::Midi);
                if !is_midi {
                    garbage.dispose(Garbage::Instrument(instrument));
                    garbage.dispose(Garbage::Path(path));
                    return false;
                }
                if let Some(previous) = rack.install(track, instrument) {
                    garbage.dispose(Garbage::Instrument(previous));
                }
                if let Some(t) = project.tracks.get_mut(track) {
                    let old = std::mem::replace(&mut t.instrument.plugin_path, path);
                    garbage.dispose(Garbage::Path(old));
                }
            }
            EngineCommand::RemoveInstrument { track } => {
                let Some(instrument) = rack.take(track) else {
                    return false;
                };
                garbage.dispose(Garbage::Instrument(instrument));
                if let Some(t) = project.tracks.get_mut(track) {
                    garbage.dispose(Garbage::Path(t.instrument.plugin_path.take()));
                }
            }
            EngineCommand::ReplaceProject { project: mut incoming, rack: mut incoming_rack } => {
                std::mem::swap(project, &mut *incoming);
                std::mem::swap(rack, &mut *incoming_rack);
                garbage.dispose(Garbage::Project(incoming));
                garbage.dispose(Garbage::Rack(incoming_rack));
            }
        }
        true
    }
}
