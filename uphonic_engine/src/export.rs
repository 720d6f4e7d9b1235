//! Offline audio export/bounce module.
//! Renders the timeline to WAV files without real-time constraints, using the
//! same block renderer as live playback.

use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, bounded};
use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use uphonic_shared::project::Project;

use crate::config::EngineConfig;
use crate::engine::{EngineCore, EngineShared, RenderContext};
use crate::instruments::InstrumentRack;
use crate::transport::PlayMode;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportBitDepth {
    Int16,
    Int24,
    Float32,
}

/// Export configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: ExportBitDepth,
    pub normalize: bool,
    pub dither: bool,      // Apply TPDF dither when converting to int
    pub tail_seconds: f64, // Extra tail for releases
    /// Frames per rendered block
    pub block_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bit_depth: ExportBitDepth::Int24,
            normalize: false,
            dither: true,
            tail_seconds: 2.0,
            block_size: 512,
        }
    }
}

impl ExportConfig {
    /// Defaults for rendering without a device: the engine's fallback rate
    /// and block size.
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.fallback_sample_rate,
            block_size: config.block_size,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ExportError> {
        if self.sample_rate == 0 {
            return Err(ExportError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ExportError::InvalidConfig(format!("{} channels; only 1 or 2", self.channels)));
        }
        if self.block_size == 0 {
            return Err(ExportError::InvalidConfig("block size must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("not enough memory for {frames} frames of output")]
    OutOfMemory { frames: usize },
    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid export config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    Finished(PathBuf),
    Failed(String),
}

/// Render `duration_seconds` of the timeline from beat 0 into interleaved stereo.
pub fn render_to_buffer(
    project: &Project,
    rack: &mut InstrumentRack,
    duration_seconds: f64,
    config: &ExportConfig,
) -> Result<Vec<f32>, ExportError> {
    config.validate()?;
    if !duration_seconds.is_finite() || duration_seconds < 0.0 {
        return Err(ExportError::InvalidConfig(format!("duration {duration_seconds} s")));
    }

    let frames = (duration_seconds * config.sample_rate as f64).ceil() as usize;
    let samples = frames.checked_mul(2).ok_or(ExportError::OutOfMemory { frames })?;
    let mut out = Vec::new();
    out.try_reserve_exact(samples)
        .map_err(|_| ExportError::OutOfMemory { frames })?;
    out.resize(samples, 0.0);

    let shared = EngineShared::new(rack.capacity());
    let mut core = EngineCore::new(config.sample_rate as f64, rack.capacity(), config.block_size);
    shared.transport.play(PlayMode::Timeline);

    let mut ctx = RenderContext { project, rack, shared: &shared };
    for chunk in out.chunks_mut(config.block_size * 2) {
        core.render(&mut ctx, chunk);
    }

    if shared.dropped_events() > 0 {
        log::warn!("[Export] {} note events dropped to block capacity", shared.dropped_events());
    }
    Ok(out)
}

/// Render the whole song plus `tail_seconds` with freshly loaded instruments
/// and write it to `path`.
pub fn export_song_to_wav(path: &Path, project: &Project, config: &ExportConfig) -> Result<(), ExportError> {
    config.validate()?;
    let mut rack = InstrumentRack::from_project(
        project,
        config.sample_rate as f32,
        config.block_size,
        project.tracks.len().max(1),
    );
    let duration = project.song_length_seconds() + config.tail_seconds.max(0.0);
    log::info!("[Export] Rendering {:.2} s to {}", duration, path.display());

    let data = render_to_buffer(project, &mut rack, duration, config)?;
    write_wav(path, &data, config)?;
    log::info!("[Export] Wrote {}", path.display());
    Ok(())
}

/// Run [`export_song_to_wav`] on a worker thread. The receiver yields exactly one event.
pub fn spawn_export(path: PathBuf, project: Project, config: ExportConfig) -> Receiver<ExportEvent> {
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let event = match export_song_to_wav(&path, &project, &config) {
            Ok(()) => ExportEvent::Finished(path),
            Err(e) => {
                log::error!("[Export] Failed: {}", e);
                ExportEvent::Failed(e.to_string())
            }
        };
        let _ = tx.send(event);
    });
    rx
}

/// Write interleaved stereo f32 audio to a WAV file with `config.channels`
/// channels (mono is a downmix). Handles bit-depth conversion, normalization
/// and dithering.
pub fn write_wav(path: &Path, data: &[f32], config: &ExportConfig) -> Result<(), ExportError> {
    config.validate()?;
    let (bits_per_sample, sample_format) = match config.bit_depth {
        ExportBitDepth::Int16 => (16, SampleFormat::Int),
        ExportBitDepth::Int24 => (24, SampleFormat::Int),
        ExportBitDepth::Float32 => (32, SampleFormat::Float),
    };

    let spec = WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample,
        sample_format,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let channels = config.channels as usize;
    let output = data.chunks_exact(2).flat_map(|lr| {
        let mono = (lr[0] + lr[1]) * 0.5;
        let frame = if channels == 1 { [mono, 0.0] } else { [lr[0], lr[1]] };
        frame.into_iter().take(channels)
    });

    // Find peak for normalization
    let peak = data.iter().fold(0.0f32, |max, &s| max.max(s.abs())).max(1e-10);
    let norm_gain = if config.normalize { 1.0 / peak } else { 1.0 };

    // One dither state per channel for decorrelation
    let mut dither_states: [u32; 2] = [0xDEADBEEF, 0xCAFEBABE];

    match config.bit_depth {
        ExportBitDepth::Float32 => {
            for sample in output {
                writer.write_sample(sample * norm_gain)?;
            }
        }
        ExportBitDepth::Int16 | ExportBitDepth::Int24 => {
            let bits = bits_per_sample as u32;
            let scale = (1u32 << (bits - 1)) as f32 - 1.0;
            for (i, sample) in output.enumerate() {
                let mut s = sample * norm_gain;
                if config.dither {
                    s += tpdf_dither(&mut dither_states[i % channels], bits);
                }
                let quantized = (s * scale).round().clamp(-(scale + 1.0), scale) as i32;
                if bits == 16 {
                    writer.write_sample(quantized as i16)?;
                } else {
                    writer.write_sample(quantized)?;
                }
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

/// TPDF dither for target bit depth
#[inline]
fn tpdf_dither(state: &mut u32, bits: u32) -> f32 {
    let r1 = lcg_next(state);
    let r2 = lcg_next(state);
    let lsb = 1.0 / (1u64 << (bits - 1)) as f32;
    (r1 - r2) * lsb
}

#[inline]
fn lcg_next(state: &mut u32) -> f32 {
    *state = state.wrapping_mul(1103515245).wrapping_add(12345);
    (*state as f32) / (u32::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use uphonic_shared::project::{ChannelLayout, Sample, TimelineBlock, TrackType};

    fn config(sample_rate: u32) -> ExportConfig {
        ExportConfig {
            sample_rate,
            channels: 2,
            bit_depth: ExportBitDepth::Float32,
            normalize: false,
            dither: false,
            tail_seconds: 0.0,
            block_size: 64,
        }
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("uphonic_export_{}_{}.wav", tag, std::process::id()))
    }

    /// One sample track playing a constant 0.5 for one beat.
    fn sample_project() -> Project {
        let mut project = Project::default();
        project.master_volume = 1.0;
        let sample = project.add_sample(Sample::new("dc", ChannelLayout::Mono, 1000.0, vec![0.5; 1000]));
        let track = project.add_track("drums", TrackType::Sample);
        project.place_block(track, TimelineBlock::sample(sample, 0.0, 0.0, 1.0, 1.0).unwrap()).unwrap();
        project
    }

    #[test]
    fn test_render_length_and_content() {
        let project = sample_project();
        let mut rack = InstrumentRack::with_capacity(1);
        let out = render_to_buffer(&project, &mut rack, 1.0, &config(1000)).unwrap();

        assert_eq!(out.len(), 2000);
        // One beat at 120 BPM is 500 frames; centre pan is -3 dB
        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert!((out[0] - expected).abs() < 1e-6);
        assert!((out[2 * 498 + 1] - expected).abs() < 1e-6);
        assert!(out[2 * 502..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_engine_fallback_rate_drives_export() {
        let engine = EngineConfig { fallback_sample_rate: 22_050, block_size: 128, ..EngineConfig::default() };
        let cfg = ExportConfig::from_engine(&engine);
        assert_eq!((cfg.sample_rate, cfg.block_size), (22_050, 128));

        let path = temp_path("fallback");
        export_song_to_wav(&path, &sample_project(), &ExportConfig { tail_seconds: 0.0, ..cfg }).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(reader.spec().sample_rate, 22_050);
        // One beat at 120 BPM
        assert_eq!(reader.duration(), 11_025);
    }

    #[test]
    fn test_impossible_length_reports_out_of_memory() {
        let project = Project::default();
        let mut rack = InstrumentRack::with_capacity(1);
        let err = render_to_buffer(&project, &mut rack, 1e18, &config(48000)).unwrap_err();
        assert!(matches!(err, ExportError::OutOfMemory { .. }));
        assert!(render_to_buffer(&project, &mut rack, f64::NAN, &config(48000)).is_err());
    }

    #[test]
    fn test_write_wav_mono_downmix() {
        let path = temp_path("mono");
        let mut cfg = config(8000);
        cfg.channels = 1;
        write_wav(&path, &[0.2, 0.4, -1.0, 0.0], &cfg).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        std::fs::remove_file(&path).ok();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.3).abs() < 1e-6);
        assert!((samples[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_write_wav_int16_normalized() {
        let path = temp_path("int16");
        let mut cfg = config(8000);
        cfg.bit_depth = ExportBitDepth::Int16;
        cfg.normalize = true;
        write_wav(&path, &[0.25, -0.5], &cfg).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        std::fs::remove_file(&path).ok();
        assert_eq!(samples, vec![16384, -32767]);
    }

    #[test]
    fn test_spawn_export_reports_completion() {
        let path = temp_path("spawn");
        let rx = spawn_export(path.clone(), sample_project(), config(1000));
        let event = rx.recv().unwrap();
        assert_eq!(event, ExportEvent::Finished(path.clone()));

        let reader = hound::WavReader::open(&path).unwrap();
        // Song is one beat, 0.5 s
        assert_eq!(reader.duration(), 500);
        std::fs::remove_file(&path).ok();

        let mut bad = config(1000);
        bad.channels = 6;
        let rx = spawn_export(temp_path("bad"), Project::default(), bad);
        assert!(matches!(rx.recv().unwrap(), ExportEvent::Failed(_)));
    }
}
