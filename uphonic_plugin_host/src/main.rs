//! Loads a plugin, plays one note through it and reports the output level.
//!
//! Usage: `uphonic_plugin_host <plugin path> [sample rate] [block size]`

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use uphonic_plugin_host::load_plugin;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().ok_or_else(|| anyhow!("missing plugin path"))?);
    let sample_rate: f32 = match args.next() {
        Some(s) => s.parse().context("sample rate")?,
        None => 44_100.0,
    };
    let block_size: usize = match args.next() {
        Some(s) => s.parse().context("block size")?,
        None => 512,
    };

    let mut plugin = load_plugin(&path, sample_rate, block_size)
        .with_context(|| format!("loading {}", path.display()))?;
    log::info!("[Probe] {} editor size: {:?}", plugin.name(), plugin.editor_size());

    let mut left = vec![0.0f32; block_size];
    let mut right = vec![0.0f32; block_size];
    let blocks = (sample_rate as usize / block_size.max(1)).max(1);
    let mut peak = 0.0f32;

    plugin.play_note(60, 100, 0);
    for i in 0..blocks {
        if i == blocks / 2 {
            plugin.stop_note(60, 0);
        }
        let mut outputs: [&mut [f32]; 2] = [&mut left, &mut right];
        plugin.process(&[], &mut outputs, block_size);
        peak = left.iter().chain(right.iter()).fold(peak, |p, s| p.max(s.abs()));
    }
    plugin.stop_all_notes();

    log::info!("[Probe] rendered {} blocks, peak {:.4}", blocks, peak);
    Ok(())
}
