use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use thiserror::Error;
use uphonic_shared::project::{Project, TimelineBlock, TrackType};
use uphonic_shared::{NoteEvent, NoteStatus, PluginInstance};

use crate::commands::{EngineCommand, Garbage, GarbageSink, prepare_project};
use crate::config::EngineConfig;
use crate::instruments::InstrumentRack;
use crate::loader::{InstrumentLoader, InstrumentQueue};
use crate::mixer::{AudioBuffers, MeterBank, apply_master_volume, balance_gains, is_audible, mix_track};
use crate::resampler::render_sample_block;
use crate::scheduler::{BlockWindow, Region, schedule_note_events, schedule_pattern_loop};
use crate::transport::{Transport, TransportState};

const NO_SELECTION: usize = usize::MAX;
const GARBAGE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no output device available")]
    NoDevice,
    #[error("failed to query output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("unsupported sample format {0:?}")]
    UnsupportedSampleFormat(cpal::SampleFormat),
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

/// State visible to both the UI and the audio thread.
pub struct EngineShared {
    pub transport: Transport,
    pub meters: MeterBank,
    selected_pattern: AtomicUsize,
    selected_track: AtomicUsize,
    dropped_events: AtomicU64,
    oversized_blocks: AtomicU64,
    rejected_edits: AtomicU64,
}

impl EngineShared {
    pub fn new(max_tracks: usize) -> Self {
        Self {
            transport: Transport::new(),
            meters: MeterBank::new(max_tracks),
            selected_pattern: AtomicUsize::new(NO_SELECTION),
            selected_track: AtomicUsize::new(NO_SELECTION),
            dropped_events: AtomicU64::new(0),
            oversized_blocks: AtomicU64::new(0),
            rejected_edits: AtomicU64::new(0),
        }
    }

    pub fn select_pattern(&self, pattern: Option<usize>) {
        self.selected_pattern.store(pattern.unwrap_or(NO_SELECTION), Ordering::Relaxed);
    }

    pub fn selected_pattern(&self) -> Option<usize> {
        match self.selected_pattern.load(Ordering::Relaxed) {
            NO_SELECTION => None,
            i => Some(i),
        }
    }

    /// Track whose instrument plays the pattern preview.
    pub fn select_track(&self, track: Option<usize>) {
        self.selected_track.store(track.unwrap_or(NO_SELECTION), Ordering::Relaxed);
    }

    pub fn selected_track(&self) -> Option<usize> {
        match self.selected_track.load(Ordering::Relaxed) {
            NO_SELECTION => None,
            i => Some(i),
        }
    }

    /// Beat position of whatever is playing, for display.
    pub fn song_position_beats(&self) -> f64 {
        self.transport.position(self.transport.state())
    }

    /// Note events lost to per-block capacity, in the scheduler or an
    /// instrument's queue.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Device requests larger than the render buffers, rendered in chunks.
    pub fn oversized_blocks(&self) -> u64 {
        self.oversized_blocks.load(Ordering::Relaxed)
    }

    /// Edits refused because they were invalid or needed to allocate.
    pub fn rejected_edits(&self) -> u64 {
        self.rejected_edits.load(Ordering::Relaxed)
    }

    fn add_dropped_events(&self, count: u64) {
        if count > 0 {
            self.dropped_events.fetch_add(count, Ordering::Relaxed);
        }
    }

    fn add_oversized_block(&self) {
        self.oversized_blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn add_rejected_edit(&self) {
        self.rejected_edits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything one block of rendering reads or drives.
pub struct RenderContext<'a> {
    pub project: &'a Project,
    pub rack: &'a mut InstrumentRack,
    pub shared: &'a EngineShared,
}

/// The block renderer shared by the device callback and offline export.
pub struct EngineCore {
    sample_rate: f64,
    buffers: AudioBuffers,
}

impl EngineCore {
    pub fn new(sample_rate: f64, max_tracks: usize, max_block_size: usize) -> Self {
        Self {
            sample_rate,
            buffers: AudioBuffers::new(max_tracks, max_block_size.max(1)),
        }
    }

    pub fn from_config(sample_rate: f64, config: &EngineConfig) -> Self {
        Self::new(sample_rate, config.max_tracks, config.max_block_size)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn max_block_size(&self) -> usize {
        self.buffers.max_frames()
    }

    /// Render interleaved stereo into `out`, one block per `max_block_size` frames.
    pub fn render(&mut self, ctx: &mut RenderContext<'_>, out: &mut [f32]) {
        let max_frames = self.buffers.max_frames();
        let frames = out.len() / 2;
        if frames > max_frames {
            ctx.shared.add_oversized_block();
        }
        for chunk in out[..frames * 2].chunks_mut(max_frames * 2) {
            let n = chunk.len() / 2;
            self.render_block(ctx, n);
            chunk.copy_from_slice(&self.buffers.master_mix[..n * 2]);
        }
    }

    fn render_block(&mut self, ctx: &mut RenderContext<'_>, frames: usize) {
        let project = ctx.project;
        let shared = ctx.shared;

        if shared.transport.take_panic() {
            ctx.rack.stop_all_notes(project);
        }
        let state = shared.transport.begin_block();

        let track_count = project.tracks.len().min(self.buffers.max_tracks());
        self.buffers.prepare_buffers(frames, track_count);
        let window = BlockWindow::new(
            project.sec_per_beat(),
            shared.transport.position(state),
            self.sample_rate,
            frames,
        );

        match state {
            TransportState::PlayingPattern => self.schedule_pattern(project, shared, &window, track_count),
            TransportState::PlayingTimeline => self.schedule_timeline(project, &window, track_count),
            TransportState::Stopped => {}
        }

        let mut dropped = 0u64;
        for (index, track) in project.tracks.iter().enumerate().take(track_count) {
            let events = &mut self.buffers.track_events[index];
            dropped += events.take_dropped() as u64;
            if events.is_empty() || track.track_type() != TrackType::Midi {
                continue;
            }
            if let Some(instrument) = ctx.rack.get_mut(index) {
                forward_events(events.as_slice(), track.instrument.pitch, instrument);
                dropped += instrument.take_dropped_events() as u64;
            }
        }
        shared.add_dropped_events(dropped);

        let any_solo = project.any_solo();
        let master = &mut self.buffers.master_mix[..frames * 2];
        for (index, track) in project.tracks.iter().enumerate().take(track_count) {
            let left = &mut self.buffers.track_left[index][..frames];
            let right = &mut self.buffers.track_right[index][..frames];

            match track.track_type() {
                TrackType::Midi => {
                    if let Some(instrument) = ctx.rack.get_mut(index) {
                        {
                            let mut outputs: [&mut [f32]; 2] = [&mut *left, &mut *right];
                            instrument.process(&[], &mut outputs, frames);
                        }
                        let (bal_l, bal_r) = balance_gains(track.instrument.pan);
                        let volume = track.instrument.volume;
                        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                            *l *= volume * bal_l;
                            *r *= volume * bal_r;
                        }
                    }
                }
                TrackType::Sample if state == TransportState::PlayingTimeline => {
                    for block in track.blocks() {
                        let TimelineBlock::Sample(block) = block else {
                            continue;
                        };
                        if let Some(sample) = project.samples.get(block.sample_index) {
                            render_sample_block(sample, block, &window, left, right);
                        }
                    }
                }
                TrackType::Sample => {}
            }

            let peaks = mix_track(track, left, right, is_audible(track, any_solo), master);
            shared.meters.store(index, peaks);
        }
        shared.meters.clear_from(track_count);

        apply_master_volume(master, project.master_volume);
        shared.transport.advance(state, window.new_beat);
    }

    fn schedule_pattern(&mut self, project: &Project, shared: &EngineShared, window: &BlockWindow, track_count: usize) {
        let Some(pattern) = shared.selected_pattern().and_then(|i| project.patterns.get(i)) else {
            return;
        };
        let loop_length = pattern.loop_length_beats(project.beats_per_bar());
        shared.transport.set_pattern_loop(loop_length);

        let Some(track) = shared.selected_track().filter(|&i| i < track_count) else {
            return;
        };
        if project.tracks[track].track_type() != TrackType::Midi {
            return;
        }
        schedule_pattern_loop(pattern, window, loop_length, &mut self.buffers.track_events[track]);
    }

    fn schedule_timeline(&mut self, project: &Project, window: &BlockWindow, track_count: usize) {
        for (index, track) in project.tracks.iter().enumerate().take(track_count) {
            if track.track_type() != TrackType::Midi {
                continue;
            }
            let events = &mut self.buffers.track_events[index];
            for block in track.blocks() {
                let TimelineBlock::Pattern(block) = block else {
                    continue;
                };
                if let Some(pattern) = project.patterns.get(block.pattern_index) {
                    schedule_note_events(pattern, window, &Region::from(block), events);
                }
            }
        }
    }
}

/// Hand scheduled events to an instrument with the track's transpose applied.
fn forward_events(events: &[NoteEvent], transpose: i8, instrument: &mut dyn PluginInstance) {
    for event in events {
        let pitch = (event.pitch as i16 + transpose as i16).clamp(0, 127) as u8;
        match event.status {
            NoteStatus::On => instrument.play_note(pitch, event.velocity, event.sample_offset),
            NoteStatus::Off => instrument.stop_note(pitch, event.sample_offset),
        }
    }
}

/// Apply queued edits at a block boundary.
pub fn drain_commands(
    commands: &Receiver<EngineCommand>,
    project: &mut Project,
    rack: &mut InstrumentRack,
    shared: &EngineShared,
    garbage: &GarbageSink,
) {
    while let Ok(command) = commands.try_recv() {
        if !command.apply(project, rack, garbage) {
            shared.add_rejected_edit();
        }
    }
}

/// Live playback through the default output device.
pub struct AudioEngine {
    _stream: cpal::Stream,
    shared: Arc<EngineShared>,
    commands: Sender<EngineCommand>,
    queue: InstrumentQueue,
    loader: Option<InstrumentLoader>,
    config: EngineConfig,
    sample_rate: u32,
}

impl AudioEngine {
    /// Open the default device and start playing `project` (initially stopped).
    pub fn new(mut project: Project, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate().map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(EngineError::NoDevice)?;
        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        if sample_format != cpal::SampleFormat::F32 {
            return Err(EngineError::UnsupportedSampleFormat(sample_format));
        }
        let sample_rate: u32 = supported.sample_rate();

        if let cpal::SupportedBufferSize::Range { min, max } = supported.buffer_size() {
            log::debug!("[AudioEngine] Device buffer range: {}-{}", min, max);
        }
        let mut stream_config: cpal::StreamConfig = supported.into();
        stream_config.buffer_size = cpal::BufferSize::Fixed(config.block_size as u32);
        stream_config.channels = config.output_channels;
        log::info!("[AudioEngine] Using config: {:?}", stream_config);

        let channels = stream_config.channels.max(1) as usize;
        let max_block = config.max_block_size;
        let plugin_block = config.plugin_block_size();

        prepare_project(&mut project, config.max_tracks);
        let mut rack = InstrumentRack::from_project(&project, sample_rate as f32, plugin_block, config.max_tracks);
        let shared = Arc::new(EngineShared::new(config.max_tracks));
        let (command_tx, command_rx) = unbounded::<EngineCommand>();
        let (garbage_tx, garbage_rx) = bounded::<Garbage>(GARBAGE_CAPACITY);
        let (queue, loader) =
            InstrumentLoader::new(command_tx.clone(), garbage_rx, sample_rate as f32, plugin_block);

        let mut core = EngineCore::from_config(sample_rate as f64, &config);
        let garbage = GarbageSink::new(garbage_tx);
        let shared_cb = shared.clone();
        let mut scratch = vec![0.0f32; max_block * 2];

        let err_fn = |err: cpal::StreamError| {
            let s = err.to_string();
            if !s.contains("underrun") && !s.contains("overrun") {
                log::error!("[AudioEngine] Stream error: {}", s);
            }
        };

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                drain_commands(&command_rx, &mut project, &mut rack, &shared_cb, &garbage);

                let mut ctx = RenderContext {
                    project: &project,
                    rack: &mut rack,
                    shared: &shared_cb,
                };
                if channels == 2 {
                    core.render(&mut ctx, data);
                    return;
                }

                if data.len() / channels > max_block {
                    shared_cb.add_oversized_block();
                }
                for chunk in data.chunks_mut(max_block * channels) {
                    let frames = chunk.len() / channels;
                    let stereo = &mut scratch[..frames * 2];
                    core.render(&mut ctx, stereo);
                    for (frame, lr) in chunk.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                        if channels == 1 {
                            frame[0] = (lr[0] + lr[1]) * 0.5;
                        } else {
                            frame[0] = lr[0];
                            frame[1] = lr[1];
                            frame[2..].fill(0.0);
                        }
                    }
                }
            },
            err_fn,
            None,
        )?;
        stream.play()?;
        log::info!("[AudioEngine] Started at {} Hz, {} channel(s)", sample_rate, channels);

        Ok(Self {
            _stream: stream,
            shared,
            commands: command_tx,
            queue,
            loader: Some(loader),
            config,
            sample_rate,
        })
    }

    pub fn commands(&self) -> Sender<EngineCommand> {
        self.commands.clone()
    }

    pub fn send(&self, command: EngineCommand) {
        let _ = self.commands.send(command);
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    pub fn instrument_queue(&self) -> InstrumentQueue {
        self.queue.clone()
    }

    /// The loader half, for the thread that drains load requests. Available once.
    pub fn take_instrument_loader(&mut self) -> Option<InstrumentLoader> {
        self.loader.take()
    }

    /// Swap in `project` with freshly instantiated instruments. Blocking.
    pub fn load_project(&self, mut project: Project) {
        prepare_project(&mut project, self.config.max_tracks);
        let rack = InstrumentRack::from_project(
            &project,
            self.sample_rate as f32,
            self.config.plugin_block_size(),
            self.config.max_tracks,
        );
        self.send(EngineCommand::ReplaceProject {
            project: Box::new(project),
            rack: Box::new(rack),
        });
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
