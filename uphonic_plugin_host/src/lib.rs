//! Loads instrument plugin binaries and exposes them as [`PluginInstance`]s.
//!
//! Everything `unsafe` about talking to foreign plugin code stays in this crate.

pub mod vst2_defs;
pub mod vst2_wrapper;

use std::path::Path;

use uphonic_shared::{PluginError, PluginInstance};

pub use vst2_wrapper::Vst2Plugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFormat {
    Vst2,
    Vst3,
    Uvi,
}

impl PluginFormat {
    /// Protocol guessed from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "dll" | "so" | "dylib" => Some(PluginFormat::Vst2),
            "vst3" => Some(PluginFormat::Vst3),
            "uvi" => Some(PluginFormat::Uvi),
            _ => None,
        }
    }
}

/// Instantiate the plugin at `path`, ready to `process` at `sample_rate` with
/// blocks of at most `block_size` frames.
///
/// Must be called off the audio thread; the returned instance may then be
/// moved onto it.
pub fn load_plugin(path: &Path, sample_rate: f32, block_size: usize) -> Result<Box<dyn PluginInstance>, PluginError> {
    let format = PluginFormat::from_path(path)
        .ok_or_else(|| PluginError::UnsupportedFormat(path.display().to_string()))?;

    match format {
        PluginFormat::Vst2 => {
            if !path.exists() {
                return Err(PluginError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    path.display().to_string(),
                )));
            }
            let plugin = unsafe { Vst2Plugin::load(path, sample_rate, block_size)? };
            Ok(Box::new(plugin))
        }
        PluginFormat::Vst3 | PluginFormat::Uvi => {
            log::warn!("[Plugin] {:?} plugins are not supported: {}", format, path.display());
            Err(PluginError::UnsupportedFormat(format!("{:?}", format)))
        }
    }
}
