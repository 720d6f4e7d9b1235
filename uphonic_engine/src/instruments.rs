use std::path::Path;

use uphonic_shared::project::{Project, TrackType};
use uphonic_shared::{EventQueue, NoteEvent, NoteStatus, PluginError, PluginInstance};

/// Plugin path that selects [`SineInstrument`] instead of a library on disk.
pub const BUILTIN_SINE: &str = "builtin:sine";

const SINE_VOICES: usize = 16;

#[derive(Clone, Copy)]
struct Voice {
    pitch: u8,
    gain: f32,
    phase: f32,
    increment: f32,
    active: bool,
}

impl Voice {
    const IDLE: Voice = Voice {
        pitch: 0,
        gain: 0.0,
        phase: 0.0,
        increment: 0.0,
        active: false,
    };
}

/// Small polyphonic sine synth. Voices start and stop on the exact frame of
/// their event.
pub struct SineInstrument {
    voices: [Voice; SINE_VOICES],
    pending: EventQueue,
    sample_rate: f32,
    next_steal: usize,
    pub level: f32,
}

impl SineInstrument {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            voices: [Voice::IDLE; SINE_VOICES],
            pending: EventQueue::new(),
            sample_rate: sample_rate.max(1.0),
            next_steal: 0,
            level: 0.2,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn apply(&mut self, event: &NoteEvent) {
        match event.status {
            NoteStatus::On if event.velocity > 0 => {
                let frequency = 440.0 * 2f32.powf((event.pitch as f32 - 69.0) / 12.0);
                let slot = match self.voices.iter().position(|v| !v.active) {
                    Some(i) => i,
                    None => {
                        let i = self.next_steal;
                        self.next_steal = (self.next_steal + 1) % SINE_VOICES;
                        i
                    }
                };
                self.voices[slot] = Voice {
                    pitch: event.pitch,
                    gain: event.velocity as f32 / 127.0,
                    phase: 0.0,
                    increment: frequency / self.sample_rate,
                    active: true,
                };
            }
            _ => {
                for voice in self.voices.iter_mut().filter(|v| v.active && v.pitch == event.pitch) {
                    voice.active = false;
                }
            }
        }
    }
}

impl PluginInstance for SineInstrument {
    fn name(&self) -> &str {
        "Sine"
    }

    fn process(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]], frame_count: usize) {
        self.pending.sort_by_offset();
        let events = std::mem::take(&mut self.pending);
        let mut next = 0;
        let pending = events.as_slice();

        let frames = outputs.iter().map(|ch| ch.len()).fold(frame_count, usize::min);
        for i in 0..frames {
            while next < pending.len() && pending[next].sample_offset as usize <= i {
                self.apply(&pending[next]);
                next += 1;
            }

            let mut s = 0.0;
            for voice in self.voices.iter_mut().filter(|v| v.active) {
                s += (voice.phase * 2.0 * std::f32::consts::PI).sin() * voice.gain;
                voice.phase = (voice.phase + voice.increment) % 1.0;
            }
            for out in outputs.iter_mut() {
                out[i] = s * self.level;
            }
        }
        // Offsets past the rendered frames still take effect.
        for event in &pending[next..] {
            self.apply(event);
        }
        self.pending = events;
        self.pending.clear();
    }

    fn play_note(&mut self, pitch: u8, velocity: u8, sample_offset: u32) {
        self.pending.push(NoteEvent::note_on(pitch, velocity, sample_offset));
    }

    fn stop_note(&mut self, pitch: u8, sample_offset: u32) {
        self.pending.push(NoteEvent::note_off(pitch, sample_offset));
    }

    fn stop_all_notes(&mut self) {
        self.pending.fill_all_notes_off();
    }

    fn take_dropped_events(&mut self) -> u32 {
        self.pending.take_dropped()
    }
}

/// One instrument slot per track, indexed like `Project::tracks`.
///
/// Slots are allocated up front; installing, taking and removing never
/// reallocate, so the rack can live on the audio thread.
pub struct InstrumentRack {
    slots: Vec<Option<Box<dyn PluginInstance>>>,
}

impl InstrumentRack {
    pub fn with_capacity(max_tracks: usize) -> Self {
        Self {
            slots: (0..max_tracks).map(|_| None).collect(),
        }
    }

    /// Create the instrument for `path`: a built-in, or a plugin library.
    /// Blocking; never call on the audio thread.
    pub fn instantiate(path: &str, sample_rate: f32, block_size: usize) -> Result<Box<dyn PluginInstance>, PluginError> {
        if path == BUILTIN_SINE {
            return Ok(Box::new(SineInstrument::new(sample_rate)));
        }
        uphonic_plugin_host::load_plugin(Path::new(path), sample_rate, block_size)
    }

    /// Instantiate every Midi track's instrument. Tracks whose instrument
    /// fails to load are left empty.
    pub fn from_project(project: &Project, sample_rate: f32, block_size: usize, max_tracks: usize) -> Self {
        let mut rack = Self::with_capacity(max_tracks);
        for (index, track) in project.tracks.iter().enumerate().take(max_tracks) {
            if track.track_type() != TrackType::Midi {
                continue;
            }
            let Some(path) = track.instrument.plugin_path.as_deref() else {
                continue;
            };
            match Self::instantiate(path, sample_rate, block_size) {
                Ok(instrument) => {
                    log::info!("[Rack] Track {} '{}': loaded {}", index, track.name, instrument.name());
                    rack.slots[index] = Some(instrument);
                }
                Err(e) => {
                    log::warn!("[Rack] Track {} '{}': failed to load {}: {}", index, track.name, path, e);
                }
            }
        }
        rack
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get_mut(&mut self, track: usize) -> Option<&mut (dyn PluginInstance + 'static)> {
        self.slots.get_mut(track)?.as_deref_mut()
    }

    pub fn is_loaded(&self, track: usize) -> bool {
        matches!(self.slots.get(track), Some(Some(_)))
    }

    /// Put `instrument` in the track's slot. Returns whatever has to be
    /// disposed of: the previous instrument, or `instrument` itself when the
    /// track is out of range.
    pub fn install(&mut self, track: usize, instrument: Box<dyn PluginInstance>) -> Option<Box<dyn PluginInstance>> {
        match self.slots.get_mut(track) {
            Some(slot) => slot.replace(instrument),
            None => Some(instrument),
        }
    }

    pub fn take(&mut self, track: usize) -> Option<Box<dyn PluginInstance>> {
        self.slots.get_mut(track)?.take()
    }

    /// Drop the slot of a removed track, shifting later slots down.
    pub fn remove_slot(&mut self, track: usize) -> Option<Box<dyn PluginInstance>> {
        if track >= self.slots.len() {
            return None;
        }
        let removed = self.slots.remove(track);
        self.slots.push(None);
        removed
    }

    pub fn stop_all_notes(&mut self, project: &Project) {
        for (index, track) in project.tracks.iter().enumerate() {
            if track.track_type() != TrackType::Midi {
                continue;
            }
            if let Some(instrument) = self.get_mut(index) {
                instrument.stop_all_notes();
            }
        }
    }
}
