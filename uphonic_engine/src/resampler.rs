//! Real-time sample playback with linear interpolation.
//!
//! Time stretch is plain resampling: pitch follows playback speed.

use uphonic_shared::project::{Sample, SampleBlock};

use crate::scheduler::BlockWindow;

/// Source frames consumed per output frame. `stretch_scale` multiplies the
/// playback speed, so 2.0 plays a sample through in half the time.
#[inline]
pub fn playback_rate(sample: &Sample, device_rate: f64, stretch_scale: f64) -> Option<f64> {
    if !(stretch_scale > 0.0) || !stretch_scale.is_finite() || !(device_rate > 0.0) || !(sample.sample_rate > 0.0) {
        return None;
    }
    Some((sample.sample_rate as f64 / device_rate) * stretch_scale)
}

/// Render the part of `block` that falls in `window`, adding into the
/// planar accumulation buffers. Returns the number of frames written.
///
/// Reads stop at the last source frame; frames past the end of the source
/// stay untouched.
pub fn render_sample_block(
    sample: &Sample,
    block: &SampleBlock,
    window: &BlockWindow,
    out_left: &mut [f32],
    out_right: &mut [f32],
) -> usize {
    let frames = window.frame_count.min(out_left.len()).min(out_right.len());
    let region_start = block.start_time;
    let region_end = block.start_time + block.length;
    if frames == 0 || region_end <= window.prev_beat || region_start >= window.new_beat {
        return 0;
    }
    let Some(rate) = playback_rate(sample, window.sample_rate, block.stretch_scale) else {
        return 0;
    };
    let source_frames = sample.frame_count();
    let beats_per_frame = window.beats_per_frame();
    if source_frames == 0 || !(beats_per_frame > 0.0) {
        return 0;
    }

    let Some(first) = (0..frames).find(|&i| window.frame_beat(i) >= region_start) else {
        return 0;
    };

    let frames_per_beat = window.sec_per_beat * window.sample_rate;
    let mut cursor = (window.frame_beat(first) - region_start + block.start_offset) * frames_per_beat * rate;
    if cursor < 0.0 {
        cursor = 0.0;
    }

    let mut written = 0;
    for i in first..frames {
        if window.frame_beat(i) >= region_end {
            break;
        }
        let index = cursor as usize;
        if index >= source_frames {
            break;
        }
        let Some((l0, r0)) = sample.frame(index) else {
            break;
        };
        let (l1, r1) = sample.frame(index + 1).unwrap_or((l0, r0));
        let frac = (cursor - index as f64) as f32;

        out_left[i] += l0 + (l1 - l0) * frac;
        out_right[i] += r0 + (r1 - r0) * frac;

        written += 1;
        cursor += rate;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use uphonic_shared::project::ChannelLayout;

    fn block(start_time: f64, start_offset: f64, length: f64, stretch_scale: f64) -> SampleBlock {
        SampleBlock {
            sample_index: 0,
            start_time,
            start_offset,
            length,
            stretch_scale,
        }
    }

    #[test]
    fn test_mono_is_duplicated_and_interpolated() {
        // Half-speed playback lands between source frames
        let sample = Sample::new("ramp", ChannelLayout::Mono, 100.0, vec![0.0, 1.0, 2.0, 3.0]);
        let window = BlockWindow::new(1.0, 0.0, 100.0, 4);
        let mut l = [0.0f32; 4];
        let mut r = [0.0f32; 4];
        let n = render_sample_block(&sample, &block(0.0, 0.0, 10.0, 0.5), &window, &mut l, &mut r);

        assert_eq!(n, 4);
        assert_eq!(l, [0.0, 0.5, 1.0, 1.5]);
        assert_eq!(l, r);
    }

    #[test]
    fn test_is_additive() {
        let sample = Sample::new("one", ChannelLayout::Stereo, 100.0, vec![0.25, -0.25, 0.25, -0.25]);
        let window = BlockWindow::new(1.0, 0.0, 100.0, 2);
        let mut l = [1.0f32; 2];
        let mut r = [1.0f32; 2];
        render_sample_block(&sample, &block(0.0, 0.0, 1.0, 1.0), &window, &mut l, &mut r);
        assert_eq!(l, [1.25, 1.25]);
        assert_eq!(r, [0.75, 0.75]);
    }

    #[test]
    fn test_exhaustion_leaves_remainder_silent() {
        let sample = Sample::new("short", ChannelLayout::Mono, 100.0, vec![1.0; 3]);
        let window = BlockWindow::new(1.0, 0.0, 100.0, 8);
        let mut l = [0.0f32; 8];
        let mut r = [0.0f32; 8];
        let n = render_sample_block(&sample, &block(0.0, 0.0, 10.0, 1.0), &window, &mut l, &mut r);
        assert_eq!(n, 3);
        assert_eq!(&l[3..], &[0.0; 5]);
    }

    #[test]
    fn test_starts_mid_block_and_honours_offset() {
        // 100 frames per beat; block starts at beat 0.05 = frame 5, trimmed by 0.02 beats = 2 frames
        let frames: Vec<f32> = (0..50).map(|i| i as f32).collect();
        let sample = Sample::new("idx", ChannelLayout::Mono, 100.0, frames);
        let window = BlockWindow::new(1.0, 0.0, 100.0, 10);
        let mut l = [0.0f32; 10];
        let mut r = [0.0f32; 10];
        render_sample_block(&sample, &block(0.05, 0.02, 1.0, 1.0), &window, &mut l, &mut r);

        assert_eq!(&l[..5], &[0.0; 5]);
        assert!((l[5] - 2.0).abs() < 1e-4);
        assert!((l[9] - 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_region_outside_window_is_skipped() {
        let sample = Sample::new("s", ChannelLayout::Mono, 100.0, vec![1.0; 100]);
        let window = BlockWindow::new(1.0, 2.0, 100.0, 10);
        let mut l = [0.0f32; 10];
        let mut r = [0.0f32; 10];
        assert_eq!(render_sample_block(&sample, &block(0.0, 0.0, 2.0, 1.0), &window, &mut l, &mut r), 0);
        assert_eq!(render_sample_block(&sample, &block(0.0, 0.0, 5.0, 0.0), &window, &mut l, &mut r), 0);
        assert_eq!(l, [0.0; 10]);
    }
}
