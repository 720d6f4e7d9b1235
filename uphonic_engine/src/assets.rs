use std::path::Path;

use thiserror::Error;
use uphonic_shared::project::{ChannelLayout, Sample};

#[derive(Debug, Error)]
pub enum SampleLoadError {
    #[error("failed to decode WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported channel count {0}; only mono and stereo are supported")]
    UnsupportedChannels(u16),
}

/// Decode a WAV file into a [`Sample`] normalized to [-1, 1].
/// Blocking; never call on the audio thread.
pub fn load_sample(path: &Path) -> Result<Sample, SampleLoadError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let layout = match spec.channels {
        1 => ChannelLayout::Mono,
        2 => ChannelLayout::Stereo,
        n => return Err(SampleLoadError::UnsupportedChannels(n)),
    };

    let frames: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = 2.0_f32.powi(spec.bits_per_sample as i32 - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Sample".to_string());
    let sample = Sample::new(name, layout, spec.sample_rate as f32, frames).with_path(path.to_string_lossy());
    log::info!(
        "[Assets] Loaded '{}': {} Hz, {:?}, {:.3} s",
        sample.name,
        spec.sample_rate,
        layout,
        sample.duration_seconds()
    );
    Ok(sample)
}
