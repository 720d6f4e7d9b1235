#[cfg(test)]
mod tests {
    use crate::commands::{EngineCommand, GarbageSink};
    use crate::engine::{EngineCore, EngineShared, RenderContext, drain_commands};
    use crate::export::{ExportBitDepth, ExportConfig, render_to_buffer};
    use crate::instruments::{BUILTIN_SINE, InstrumentRack, SineInstrument};
    use crate::loader::{InstrumentLoader, LoadOutcome};
    use crate::resampler::render_sample_block;
    use crate::scheduler::{BlockWindow, Region, TrackEvents, schedule_note_events};
    use crate::transport::PlayMode;
    use crossbeam_channel::{bounded, unbounded};
    use std::f32::consts::FRAC_1_SQRT_2;
    use uphonic_shared::NoteStatus;
    use uphonic_shared::project::{
        ChannelLayout, MidiPattern, Note, Project, Sample, SampleBlock, TimelineBlock, TrackType,
    };

    fn render_blocks(core: &mut EngineCore, project: &Project, rack: &mut InstrumentRack, shared: &EngineShared, frames: usize, blocks: usize) -> Vec<f32> {
        let mut all = Vec::new();
        let mut out = vec![0.0; frames * 2];
        for _ in 0..blocks {
            core.render(&mut RenderContext { project, rack: &mut *rack, shared }, &mut out);
            all.extend_from_slice(&out);
        }
        all
    }

    fn dc_sample(value: f32, frames: usize, sample_rate: f32) -> Sample {
        Sample::new("dc", ChannelLayout::Mono, sample_rate, vec![value; frames])
    }

    #[test]
    fn test_half_open_windows_emit_each_event_once() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..20 {
            let mut pattern = MidiPattern::new("random");
            for _ in 0..40 {
                let start = rng.f64() * 8.0;
                let length = 0.01 + rng.f64() * 2.0;
                pattern.notes.push(Note::new(start, length, rng.u8(0..128), 100).unwrap());
            }
            let sample_rate = [22050.0, 44100.0, 48000.0][rng.usize(0..3)];
            let frames = rng.usize(16..2048);
            let sec_per_beat = 60.0 / (60.0 + rng.f64() * 120.0);

            let mut ons = 0;
            let mut offs = 0;
            let mut events = TrackEvents::new();
            let mut prev = 0.0;
            while prev < 12.0 {
                let window = BlockWindow::new(sec_per_beat, prev, sample_rate, frames);
                events.begin_block();
                schedule_note_events(&pattern, &window, &Region::WHOLE, &mut events);
                assert_eq!(events.take_dropped(), 0);
                for e in events.as_slice() {
                    match e.status {
                        NoteStatus::On => ons += 1,
                        NoteStatus::Off => offs += 1,
                    }
                    assert!((e.sample_offset as usize) < frames);
                }
                prev = window.new_beat;
            }
            assert_eq!(ons, pattern.notes.len());
            assert_eq!(offs, pattern.notes.len());
        }
    }

    #[test]
    fn test_chord_offsets_never_collide() {
        let mut pattern = MidiPattern::new("chord");
        for pitch in [60, 64, 67] {
            pattern.notes.push(Note::new(0.25, 1.0, pitch, 100).unwrap());
        }
        let window = BlockWindow::new(0.5, 0.0, 44100.0, 44100);
        let mut events = TrackEvents::new();
        schedule_note_events(&pattern, &window, &Region::WHOLE, &mut events);

        let mut on_offsets: Vec<u32> = events
            .as_slice()
            .iter()
            .filter(|e| e.status == NoteStatus::On)
            .map(|e| e.sample_offset)
            .collect();
        assert_eq!(on_offsets, vec![5513, 5514, 5515]);
        on_offsets.dedup();
        assert_eq!(on_offsets.len(), 3);
    }

    #[test]
    fn test_interleaved_notes_get_distinct_offsets() {
        let mut pattern = MidiPattern::new("interleaved");
        for (start, pitch) in [(0.25, 60), (0.5, 62), (0.25, 64), (0.5, 65)] {
            pattern.notes.push(Note::new(start, 1.0, pitch, 100).unwrap());
        }
        let window = BlockWindow::new(0.5, 0.0, 44100.0, 44100);
        let mut events = TrackEvents::new();
        schedule_note_events(&pattern, &window, &Region::WHOLE, &mut events);

        let on_offsets: Vec<u32> = events
            .as_slice()
            .iter()
            .filter(|e| e.status == NoteStatus::On)
            .map(|e| e.sample_offset)
            .collect();
        assert_eq!(on_offsets, vec![5513, 11025, 5514, 11026]);
    }

    #[test]
    fn test_offsets_distinct_per_type_in_every_block() {
        let mut rng = fastrand::Rng::with_seed(0xc011);
        for _ in 0..50 {
            let mut pattern = MidiPattern::new("crowded");
            for _ in 0..60 {
                // Coarse grid so many notes share a raw offset
                let start = rng.u32(0..16) as f64 * 0.125;
                pattern.notes.push(Note::new(start, 0.125 * rng.u32(1..8) as f64, rng.u8(0..128), 100).unwrap());
            }
            let frames = rng.usize(32..512);
            let mut events = TrackEvents::new();
            let mut prev = 0.0;
            while prev < 3.0 {
                let window = BlockWindow::new(0.5, prev, 1000.0, frames);
                events.begin_block();
                schedule_note_events(&pattern, &window, &Region::WHOLE, &mut events);
                for status in [NoteStatus::On, NoteStatus::Off] {
                    let mut offsets: Vec<u32> =
                        events.as_slice().iter().filter(|e| e.status == status).map(|e| e.sample_offset).collect();
                    let count = offsets.len();
                    offsets.sort_unstable();
                    offsets.dedup();
                    assert_eq!(offsets.len(), count.min(frames));
                    assert!(offsets.iter().all(|&o| (o as usize) < frames));
                }
                prev = window.new_beat;
            }
        }
    }

    #[test]
    fn test_single_note_at_120_bpm() {
        let mut pattern = MidiPattern::new("one");
        pattern.notes.push(Note::new(0.0, 1.0, 60, 100).unwrap());

        let mut events = TrackEvents::new();
        let mut prev = 0.0;
        let mut seen = Vec::new();
        for block in 0..100 {
            let window = BlockWindow::new(0.5, prev, 44100.0, 512);
            events.begin_block();
            schedule_note_events(&pattern, &window, &Region::WHOLE, &mut events);
            for e in events.as_slice() {
                seen.push((block, e.status, e.pitch, e.sample_offset, window.prev_beat, window.new_beat));
            }
            prev = window.new_beat;
        }

        assert_eq!(seen.len(), 2);
        let (block, status, pitch, offset, _, new_beat) = seen[0];
        assert_eq!((block, status, pitch, offset), (0, NoteStatus::On, 60, 0));
        assert!((new_beat - 0.023219954648526078).abs() < 1e-12);

        let (block, status, pitch, _, prev_beat, new_beat) = seen[1];
        assert_eq!((status, pitch), (NoteStatus::Off, 60));
        // Pulled in just ahead of beat 1.0
        assert!(prev_beat <= 0.999 && 0.999 < new_beat);
        assert_eq!(block, 43);
    }

    #[test]
    fn test_stretch_two_halves_occupancy() {
        let sample = Sample::new("one second", ChannelLayout::Stereo, 44100.0, vec![0.25; 44100 * 2]);
        let block = SampleBlock {
            sample_index: 0,
            start_time: 0.0,
            start_offset: 0.0,
            length: 4.0,
            stretch_scale: 2.0,
        };
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        let mut prev = 0.0;
        let mut written = 0;
        for _ in 0..200 {
            let window = BlockWindow::new(0.5, prev, 44100.0, 512);
            left.fill(0.0);
            right.fill(0.0);
            written += render_sample_block(&sample, &block, &window, &mut left, &mut right);
            prev = window.new_beat;
        }
        assert!((22048..=22052).contains(&written), "wrote {written} frames");
    }

    #[test]
    fn test_resampler_stays_in_bounds() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let source_frames = rng.usize(1..4000);
            let layout = if rng.bool() { ChannelLayout::Stereo } else { ChannelLayout::Mono };
            let sample_rate = [8000.0, 44100.0, 96000.0][rng.usize(0..3)];
            let data = vec![1.0; source_frames * layout.channels()];
            let sample = Sample::new("s", layout, sample_rate, data);
            let stretch = (rng.f64() * 10.0).max(1e-3);
            let block = SampleBlock {
                sample_index: 0,
                start_time: rng.f64() * 2.0,
                start_offset: rng.f64() * 2.0,
                length: 0.1 + rng.f64() * 4.0,
                stretch_scale: stretch,
            };

            let frames = rng.usize(1..1024);
            let mut left = vec![0.0f32; frames];
            let mut right = vec![0.0f32; frames];
            let mut prev = 0.0;
            let mut total = 0;
            while prev < 8.0 {
                let window = BlockWindow::new(0.5, prev, 44100.0, frames);
                left.fill(0.0);
                right.fill(0.0);
                let n = render_sample_block(&sample, &block, &window, &mut left, &mut right);
                assert!(n <= frames);
                // Interpolating between in-range frames of ones never exceeds 1
                assert!(left.iter().chain(&right).all(|&s| s <= 1.0 + 1e-6));
                total += n;
                prev = window.new_beat;
            }
            let rate = sample_rate as f64 / 44100.0 * stretch;
            assert!(total as f64 <= source_frames as f64 / rate + 2.0);
        }
    }

    #[test]
    fn test_solo_silences_other_tracks() {
        let mut project = Project::default();
        project.master_volume = 1.0;
        let loud = project.add_sample(dc_sample(0.5, 4000, 1000.0));
        let quiet = project.add_sample(dc_sample(0.25, 4000, 1000.0));
        for (name, sample) in [("loud", loud), ("quiet", quiet)] {
            let track = project.add_track(name, TrackType::Sample);
            project.place_block(track, TimelineBlock::sample(sample, 0.0, 0.0, 4.0, 1.0).unwrap()).unwrap();
        }
        project.tracks[1].solo = true;

        let shared = EngineShared::new(4);
        let mut rack = InstrumentRack::with_capacity(4);
        let mut core = EngineCore::new(1000.0, 4, 128);
        shared.transport.play(PlayMode::Timeline);
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 128, 1);

        let expected = 0.25 * FRAC_1_SQRT_2;
        assert!(out.iter().all(|&s| (s - expected).abs() < 1e-6));
        assert_eq!(shared.meters.load(0), (0.0, 0.0));
        assert!(shared.meters.load(1).0 > 0.0);

        // Mute wins over solo
        project.tracks[1].muted = true;
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 128, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    fn song() -> Project {
        let mut project = Project::default();
        let mut pattern = MidiPattern::new("riff");
        for i in 0..6 {
            pattern.notes.push(Note::new(i as f64 * 0.5, 0.75, 57 + i as u8 * 2, 90).unwrap());
        }
        let pattern = project.add_pattern(pattern);
        let keys = project.add_track("keys", TrackType::Midi);
        project.tracks[keys].instrument.plugin_path = Some(BUILTIN_SINE.to_string());
        project.tracks[keys].pan = -0.4;
        project.place_block(keys, TimelineBlock::pattern(pattern, 0.0, 0.5, 3.0).unwrap()).unwrap();

        let sample = project.add_sample(Sample::new(
            "ramp",
            ChannelLayout::Stereo,
            2048.0,
            (0..4096).map(|i| (i as f32 / 4096.0) - 0.5).collect(),
        ));
        let drums = project.add_track("drums", TrackType::Sample);
        project.place_block(drums, TimelineBlock::sample(sample, 0.75, 0.1, 2.0, 1.5).unwrap()).unwrap();
        project
    }

    #[test]
    fn test_export_matches_live_rendering() {
        let project = song();
        let sample_rate = 1024;
        let block_size = 256;
        let blocks = 12;

        let config = ExportConfig {
            sample_rate,
            channels: 2,
            bit_depth: ExportBitDepth::Float32,
            normalize: false,
            dither: false,
            tail_seconds: 0.0,
            block_size,
        };
        let mut export_rack = InstrumentRack::from_project(&project, sample_rate as f32, block_size, 4);
        let duration = (blocks * block_size) as f64 / sample_rate as f64;
        let exported = render_to_buffer(&project, &mut export_rack, duration, &config).unwrap();

        let mut live_rack = InstrumentRack::from_project(&project, sample_rate as f32, block_size, 4);
        let shared = EngineShared::new(4);
        let mut core = EngineCore::new(sample_rate as f64, 4, block_size);
        shared.transport.play(PlayMode::Timeline);
        let live = render_blocks(&mut core, &project, &mut live_rack, &shared, block_size, blocks);

        assert_eq!(exported.len(), live.len());
        assert!(live.iter().any(|&s| s != 0.0));
        for (a, b) in exported.iter().zip(&live) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stop_silences_held_notes() {
        let mut project = Project::default();
        let mut pattern = MidiPattern::new("drone");
        pattern.notes.push(Note::new(0.0, 16.0, 60, 127).unwrap());
        let pattern = project.add_pattern(pattern);
        let track = project.add_track("keys", TrackType::Midi);
        project.place_block(track, TimelineBlock::pattern(pattern, 0.0, 0.0, 16.0).unwrap()).unwrap();

        let shared = EngineShared::new(2);
        let mut rack = InstrumentRack::with_capacity(2);
        rack.install(0, Box::new(SineInstrument::new(1000.0)));
        let mut core = EngineCore::new(1000.0, 2, 64);

        shared.transport.play(PlayMode::Timeline);
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 64, 2);
        assert!(out.iter().any(|&s| s != 0.0));

        shared.transport.stop();
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 64, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        let stopped_at = shared.transport.timeline_position();
        render_blocks(&mut core, &project, &mut rack, &shared, 64, 1);
        assert_eq!(shared.transport.timeline_position(), stopped_at);
    }

    #[test]
    fn test_failed_load_keeps_current_instrument() {
        let mut project = Project::default();
        project.add_track("keys", TrackType::Midi);
        let mut rack = InstrumentRack::with_capacity(2);
        rack.install(0, Box::new(SineInstrument::new(44100.0)));
        let shared = EngineShared::new(2);

        let (cmd_tx, cmd_rx) = unbounded();
        let (garbage_tx, garbage_rx) = bounded(16);
        let sink = GarbageSink::new(garbage_tx);
        let (queue, mut loader) = InstrumentLoader::new(cmd_tx, garbage_rx, 44100.0, 512);

        queue.request_load(0, "/missing/synth.vst3");
        let outcomes = loader.process_pending();
        assert!(matches!(outcomes[0], LoadOutcome::Failed { track: 0, .. }));
        drain_commands(&cmd_rx, &mut project, &mut rack, &shared, &sink);
        assert!(rack.is_loaded(0));

        queue.request_load(0, BUILTIN_SINE);
        loader.process_pending();
        drain_commands(&cmd_rx, &mut project, &mut rack, &shared, &sink);
        assert!(rack.is_loaded(0));
        assert_eq!(project.tracks[0].instrument.plugin_path.as_deref(), Some(BUILTIN_SINE));
        // The replaced instrument comes back to be dropped off the audio thread
        assert!(loader.collect_garbage() >= 1);
        assert_eq!(shared.rejected_edits(), 0);
    }

    #[test]
    fn test_unload_after_load_leaves_track_empty() {
        let mut project = Project::default();
        project.add_track("keys", TrackType::Midi);
        let mut rack = InstrumentRack::with_capacity(2);
        let shared = EngineShared::new(2);

        let (cmd_tx, cmd_rx) = unbounded();
        let (garbage_tx, garbage_rx) = bounded(16);
        let sink = GarbageSink::new(garbage_tx);
        let (queue, mut loader) = InstrumentLoader::new(cmd_tx, garbage_rx, 44100.0, 512);

        queue.request_load(0, BUILTIN_SINE);
        queue.request_unload(0);
        loader.process_pending();
        drain_commands(&cmd_rx, &mut project, &mut rack, &shared, &sink);
        assert!(!rack.is_loaded(0));
        assert_eq!(project.tracks[0].instrument.plugin_path, None);

        queue.request_unload(0);
        queue.request_load(0, BUILTIN_SINE);
        loader.process_pending();
        drain_commands(&cmd_rx, &mut project, &mut rack, &shared, &sink);
        assert!(rack.is_loaded(0));
    }

    #[test]
    fn test_remove_pattern_command_on_live_project() {
        let mut project = Project::default();
        for name in ["a", "b"] {
            let mut pattern = MidiPattern::new(name);
            pattern.notes.push(Note::new(0.0, 1.0, 60, 100).unwrap());
            project.add_pattern(pattern);
        }
        let track = project.add_track("keys", TrackType::Midi);
        project.place_block(track, TimelineBlock::pattern(0, 0.0, 0.0, 1.0).unwrap()).unwrap();
        project.place_block(track, TimelineBlock::pattern(1, 4.0, 0.0, 1.0).unwrap()).unwrap();
        crate::commands::prepare_project(&mut project, 2);

        let shared = EngineShared::new(2);
        let mut rack = InstrumentRack::with_capacity(2);
        rack.install(0, Box::new(SineInstrument::new(1000.0)));
        let mut core = EngineCore::new(1000.0, 2, 100);
        let (tx, rx) = unbounded();
        let (garbage_tx, garbage_rx) = bounded(8);
        let sink = GarbageSink::new(garbage_tx);

        tx.send(EngineCommand::RemovePattern { pattern: 0 }).unwrap();
        tx.send(EngineCommand::RemoveSample { sample: 3 }).unwrap();
        drain_commands(&rx, &mut project, &mut rack, &shared, &sink);
        assert_eq!(shared.rejected_edits(), 1);
        assert_eq!(project.patterns.len(), 1);
        match project.tracks[0].blocks()[..] {
            [TimelineBlock::Pattern(b)] => assert_eq!((b.pattern_index, b.start_time), (0, 4.0)),
            _ => panic!("expected one retargeted pattern block"),
        }
        assert!(garbage_rx.try_iter().any(|g| matches!(g, crate::commands::Garbage::Pattern(_))));

        // The first two seconds are silent, the remaining placement still plays at beat 4
        shared.transport.play(PlayMode::Timeline);
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 100, 30);
        assert!(out[..2 * 2000].iter().all(|&s| s == 0.0));
        assert!(out[2 * 2000..].iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_event_overflow_is_counted() {
        let mut project = Project::default();
        let mut pattern = MidiPattern::new("dense");
        for i in 0..300 {
            pattern.notes.push(Note::new(0.0, 1.0, (i % 128) as u8, 100).unwrap());
        }
        let pattern = project.add_pattern(pattern);
        let track = project.add_track("keys", TrackType::Midi);
        project.place_block(track, TimelineBlock::pattern(pattern, 0.0, 0.0, 4.0).unwrap()).unwrap();

        let shared = EngineShared::new(2);
        let mut rack = InstrumentRack::with_capacity(2);
        let mut core = EngineCore::new(1000.0, 2, 64);
        shared.transport.play(PlayMode::Timeline);
        render_blocks(&mut core, &project, &mut rack, &shared, 64, 1);
        assert_eq!(shared.dropped_events(), 44);
    }

    #[test]
    fn test_removed_pattern_blocks_are_not_scheduled() {
        let mut project = Project::default();
        for name in ["a", "b"] {
            let mut pattern = MidiPattern::new(name);
            pattern.notes.push(Note::new(0.0, 1.0, 60, 100).unwrap());
            project.add_pattern(pattern);
        }
        let track = project.add_track("keys", TrackType::Midi);
        project.place_block(track, TimelineBlock::pattern(0, 0.0, 0.0, 1.0).unwrap()).unwrap();
        project.place_block(track, TimelineBlock::pattern(1, 4.0, 0.0, 1.0).unwrap()).unwrap();
        project.remove_pattern(0).unwrap();

        assert_eq!(project.tracks[0].blocks().len(), 1);
        match project.tracks[0].blocks()[0] {
            TimelineBlock::Pattern(b) => assert_eq!((b.pattern_index, b.start_time), (0, 4.0)),
            TimelineBlock::Sample(_) => panic!("expected a pattern block"),
        }

        // Nothing sounds where the removed pattern was placed
        let shared = EngineShared::new(2);
        let mut rack = InstrumentRack::with_capacity(2);
        rack.install(0, Box::new(SineInstrument::new(1000.0)));
        let mut core = EngineCore::new(1000.0, 2, 100);
        shared.transport.play(PlayMode::Timeline);
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 100, 10);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_commands_apply_between_blocks() {
        let mut project = Project::default();
        project.master_volume = 1.0;
        let sample = project.add_sample(dc_sample(0.5, 4000, 1000.0));
        let track = project.add_track("drums", TrackType::Sample);
        crate::commands::prepare_project(&mut project, 2);

        let shared = EngineShared::new(2);
        let mut rack = InstrumentRack::with_capacity(2);
        let mut core = EngineCore::new(1000.0, 2, 50);
        let (tx, rx) = unbounded();
        let (garbage_tx, _garbage_rx) = bounded(8);
        let sink = GarbageSink::new(garbage_tx);

        tx.send(EngineCommand::PlaceBlock {
            track,
            block: TimelineBlock::sample(sample, 0.0, 0.0, 4.0, 1.0).unwrap(),
        })
        .unwrap();
        tx.send(EngineCommand::SetTrackPan { track, pan: 1.0 }).unwrap();
        drain_commands(&rx, &mut project, &mut rack, &shared, &sink);

        shared.transport.play(PlayMode::Timeline);
        let out = render_blocks(&mut core, &project, &mut rack, &shared, 50, 1);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0], 0.0);
            assert!((frame[1] - 0.5).abs() < 1e-6);
        }
    }
}
