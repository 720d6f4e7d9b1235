use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2};
use std::sync::atomic::{AtomicU32, Ordering};

use uphonic_shared::project::Track;

use crate::scheduler::TrackEvents;

/// Per-track scratch for one block. Sized once for `max_tracks` x `max_frames`.
pub struct AudioBuffers {
    pub track_left: Vec<Vec<f32>>,
    pub track_right: Vec<Vec<f32>>,
    pub track_events: Vec<TrackEvents>,
    /// Interleaved stereo
    pub master_mix: Vec<f32>,
    max_frames: usize,
}

impl AudioBuffers {
    pub fn new(max_tracks: usize, max_frames: usize) -> Self {
        Self {
            track_left: vec![vec![0.0; max_frames]; max_tracks],
            track_right: vec![vec![0.0; max_frames]; max_tracks],
            track_events: (0..max_tracks).map(|_| TrackEvents::new()).collect(),
            master_mix: vec![0.0; max_frames * 2],
            max_frames,
        }
    }

    pub fn max_tracks(&self) -> usize {
        self.track_left.len()
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Zero the first `frames` of every active buffer and reset event lists. Never resizes.
    pub fn prepare_buffers(&mut self, frames: usize, track_count: usize) {
        let frames = frames.min(self.max_frames);
        let track_count = track_count.min(self.max_tracks());

        self.master_mix[..frames * 2].fill(0.0);
        for i in 0..track_count {
            self.track_left[i][..frames].fill(0.0);
            self.track_right[i][..frames].fill(0.0);
            self.track_events[i].begin_block();
        }
    }
}

/// Constant-power pan law. `pan` is clamped to [-1, 1]; the hard-pan ends
/// give an exact zero on the opposite side.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = if pan.is_nan() { 0.0 } else { pan.clamp(-1.0, 1.0) };
    if pan <= -1.0 {
        return (1.0, 0.0);
    }
    if pan >= 1.0 {
        return (0.0, 1.0);
    }
    if pan == 0.0 {
        return (FRAC_1_SQRT_2, FRAC_1_SQRT_2);
    }
    let angle = (pan + 1.0) * 0.5 * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Linear balance used for instrument pan: attenuates the far side only.
pub fn balance_gains(pan: f32) -> (f32, f32) {
    let pan = if pan.is_nan() { 0.0 } else { pan.clamp(-1.0, 1.0) };
    if pan > 0.0 {
        (1.0 - pan, 1.0)
    } else if pan < 0.0 {
        (1.0, 1.0 + pan)
    } else {
        (1.0, 1.0)
    }
}

/// Mute always silences; otherwise, while any track is soloed only soloed tracks sound.
#[inline]
pub fn is_audible(track: &Track, any_solo: bool) -> bool {
    !track.muted && (!any_solo || track.solo)
}

/// Sum one track into the interleaved master buffer with its volume and pan.
/// Returns the post-fader peaks, or zeros when the track is not audible.
pub fn mix_track(track: &Track, left: &[f32], right: &[f32], audible: bool, master_mix: &mut [f32]) -> (f32, f32) {
    if !audible {
        return (0.0, 0.0);
    }
    let (pan_l, pan_r) = pan_gains(track.pan);
    let l_gain = track.volume * pan_l;
    let r_gain = track.volume * pan_r;

    let mut peak_l = 0.0f32;
    let mut peak_r = 0.0f32;
    for ((frame, &l), &r) in master_mix.chunks_exact_mut(2).zip(left).zip(right) {
        let l = l * l_gain;
        let r = r * r_gain;
        frame[0] += l;
        frame[1] += r;
        peak_l = peak_l.max(l.abs());
        peak_r = peak_r.max(r.abs());
    }
    (peak_l, peak_r)
}

pub fn apply_master_volume(master_mix: &mut [f32], master_volume: f32) {
    for s in master_mix.iter_mut() {
        *s *= master_volume;
    }
}

#[derive(Default)]
struct PeakPair {
    left: AtomicU32,
    right: AtomicU32,
}

/// Per-track peak levels published by the audio thread once per block.
pub struct MeterBank {
    peaks: Box<[PeakPair]>,
}

impl MeterBank {
    pub fn new(max_tracks: usize) -> Self {
        Self {
            peaks: (0..max_tracks).map(|_| PeakPair::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn store(&self, track: usize, (left, right): (f32, f32)) {
        if let Some(pair) = self.peaks.get(track) {
            pair.left.store(left.to_bits(), Ordering::Relaxed);
            pair.right.store(right.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn load(&self, track: usize) -> (f32, f32) {
        self.peaks
            .get(track)
            .map(|pair| {
                (
                    f32::from_bits(pair.left.load(Ordering::Relaxed)),
                    f32::from_bits(pair.right.load(Ordering::Relaxed)),
                )
            })
            .unwrap_or((0.0, 0.0))
    }

    /// Zero every meter from `track` on.
    pub fn clear_from(&self, track: usize) {
        for i in track..self.peaks.len() {
            self.store(i, (0.0, 0.0));
        }
    }
}
