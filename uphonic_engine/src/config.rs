use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine sizing. Every buffer the audio thread touches is allocated from
/// these numbers up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames requested from the device per callback
    pub block_size: usize,
    /// Largest block rendered in one pass; bigger device requests are chunked
    pub max_block_size: usize,
    pub max_tracks: usize,
    /// Rate for offline rendering when no device rate applies
    pub fallback_sample_rate: u32,
    pub output_channels: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            max_block_size: 4096,
            max_tracks: 64,
            fallback_sample_rate: 44_100,
            output_channels: 2,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing engine config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Block size instruments are prepared for. Covers every chunk the
    /// renderer can hand them, not just the nominal device block.
    pub fn plugin_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.max_block_size == 0 {
            bail!("block sizes must be non-zero");
        }
        if self.block_size > self.max_block_size {
            bail!(
                "block_size {} exceeds max_block_size {}",
                self.block_size,
                self.max_block_size
            );
        }
        if self.max_tracks == 0 {
            bail!("max_tracks must be non-zero");
        }
        if self.fallback_sample_rate == 0 {
            bail!("fallback_sample_rate must be non-zero");
        }
        if !(1..=2).contains(&self.output_channels) {
            bail!("output_channels must be 1 or 2, got {}", self.output_channels);
        }
        Ok(())
    }
}
