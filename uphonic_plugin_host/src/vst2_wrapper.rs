use std::ffi::c_void;
use std::path::Path;
use std::ptr;

use libloading::{Library, Symbol};
use raw_window_handle::RawWindowHandle;
use uphonic_shared::{EventQueue, NoteEvent, PluginError, PluginInstance, MAX_EVENTS_PER_BLOCK};

use crate::vst2_defs::*;

pub struct Vst2Plugin {
    effect: *mut AEffect,
    name: String,
    pending: EventQueue,

    // Submission storage; `events.events[i]` points into `midi`.
    midi: Box<[VstMidiEvent; MAX_EVENTS_PER_BLOCK]>,
    events: Box<VstEvents<MAX_EVENTS_PER_BLOCK>>,

    // Channels the engine does not provide are backed by scratch buffers.
    scratch_in: Vec<Vec<f32>>,
    scratch_out: Vec<Vec<f32>>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
    max_block_size: usize,

    editor_open: bool,
    // Dropped last: the plugin code lives in here.
    _library: Library,
}

// The raw pointers are only touched by whichever thread currently owns the plugin.
unsafe impl Send for Vst2Plugin {}

impl Vst2Plugin {
    /// Open the library, instantiate the effect and switch it on.
    ///
    /// # Safety
    /// Runs foreign initialisation code from `path`.
    pub unsafe fn load(path: &Path, sample_rate: f32, block_size: usize) -> Result<Self, PluginError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string());

        let library = unsafe { Library::new(path.as_os_str()) }.map_err(|e| PluginError::Library(e.to_string()))?;

        let entry: PluginMain = {
            let symbol: Result<Symbol<PluginMain>, _> = unsafe { library.get(b"VSTPluginMain\0") }
                .or_else(|_| unsafe { library.get(b"main\0") });
            match symbol {
                Ok(symbol) => *symbol,
                Err(_) => return Err(PluginError::MissingEntry(path.display().to_string())),
            }
        };

        set_host_format(sample_rate, block_size);

        let effect = unsafe { entry(host_callback) };
        unsafe { check_effect(effect, &name) }?;

        let (num_inputs, num_outputs, flags) = unsafe {
            (
                (*effect).num_inputs.max(0) as usize,
                (*effect).num_outputs.max(0) as usize,
                (*effect).flags,
            )
        };
        log::info!(
            "[VST2] Loading {} ({} in / {} out, synth: {})",
            name,
            num_inputs,
            num_outputs,
            flags & FLAG_IS_SYNTH != 0
        );

        let mut midi = Box::new([VstMidiEvent::EMPTY; MAX_EVENTS_PER_BLOCK]);
        let mut events = Box::new(VstEvents {
            num_events: 0,
            reserved: 0,
            events: [ptr::null_mut(); MAX_EVENTS_PER_BLOCK],
        });
        for (slot, event) in events.events.iter_mut().zip(midi.iter_mut()) {
            *slot = event as *mut VstMidiEvent;
        }

        let block = block_size.max(1);
        let plugin = Self {
            effect,
            name,
            pending: EventQueue::new(),
            midi,
            events,
            scratch_in: vec![vec![0.0; block]; num_inputs],
            scratch_out: vec![vec![0.0; block]; num_outputs],
            input_ptrs: vec![ptr::null_mut(); num_inputs],
            output_ptrs: vec![ptr::null_mut(); num_outputs],
            max_block_size: block,
            editor_open: false,
            _library: library,
        };

        plugin.dispatch(OP_OPEN, 0, 0, ptr::null_mut(), 0.0);
        plugin.dispatch(OP_SET_SAMPLE_RATE, 0, 0, ptr::null_mut(), sample_rate);
        plugin.dispatch(OP_SET_BLOCK_SIZE, 0, block as isize, ptr::null_mut(), 0.0);
        plugin.dispatch(OP_MAINS_CHANGED, 0, 1, ptr::null_mut(), 0.0);
        plugin.dispatch(OP_START_PROCESS, 0, 0, ptr::null_mut(), 0.0);

        log::info!("[VST2] Loaded {} successfully.", plugin.name);
        Ok(plugin)
    }

    fn dispatch(&self, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize {
        unsafe { ((*self.effect).dispatcher)(self.effect, opcode, index, value, ptr, opt) }
    }

    fn flags(&self) -> i32 {
        unsafe { (*self.effect).flags }
    }

    fn submit_events(&mut self) {
        let count = fill_midi_events(&mut self.pending, &mut self.midi[..]);
        if count == 0 {
            return;
        }
        self.events.num_events = count as i32;
        let events = &mut *self.events as *mut VstEvents<MAX_EVENTS_PER_BLOCK> as *mut c_void;
        self.dispatch(OP_PROCESS_EVENTS, 0, 0, events, 0.0);
        self.pending.clear();
    }
}

/// Reject a null or foreign effect. A created effect with the wrong magic is
/// closed before its library is unloaded.
///
/// # Safety
/// `effect` must be null or point to an `AEffect` returned by a plugin entry.
unsafe fn check_effect(effect: *mut AEffect, name: &str) -> Result<(), PluginError> {
    if effect.is_null() {
        return Err(PluginError::Instantiation(format!("{name}: entry returned null")));
    }
    if unsafe { (*effect).magic } != EFFECT_MAGIC {
        unsafe { ((*effect).dispatcher)(effect, OP_CLOSE, 0, 0, ptr::null_mut(), 0.0) };
        return Err(PluginError::Instantiation(format!("{name}: bad magic")));
    }
    Ok(())
}

/// Sort the pending batch by offset and translate it into `midi`. Returns the
/// number of events written.
fn fill_midi_events(pending: &mut EventQueue, midi: &mut [VstMidiEvent]) -> usize {
    pending.sort_by_offset();
    let mut count = 0;
    for (slot, event) in midi.iter_mut().zip(pending.as_slice()) {
        *slot = VstMidiEvent::note(event.status.status_byte(), event.pitch, event.velocity, event.sample_offset);
        count += 1;
    }
    count
}

impl PluginInstance for Vst2Plugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frame_count: usize) {
        self.submit_events();

        let frames = outputs
            .iter()
            .map(|ch| ch.len())
            .fold(frame_count.min(self.max_block_size), usize::min);

        for (ch, slot) in self.input_ptrs.iter_mut().enumerate() {
            let scratch = &mut self.scratch_in[ch];
            match inputs.get(ch) {
                Some(input) => {
                    let n = frames.min(input.len());
                    scratch[..n].copy_from_slice(&input[..n]);
                    scratch[n..frames].fill(0.0);
                }
                None => scratch[..frames].fill(0.0),
            }
            *slot = scratch.as_mut_ptr();
        }
        for (ch, slot) in self.output_ptrs.iter_mut().enumerate() {
            *slot = match outputs.get_mut(ch) {
                Some(out) => out.as_mut_ptr(),
                None => self.scratch_out[ch].as_mut_ptr(),
            };
        }

        let replacing = unsafe { (*self.effect).process_replacing };
        match replacing {
            Some(process) if self.flags() & FLAG_CAN_REPLACING != 0 => unsafe {
                process(
                    self.effect,
                    self.input_ptrs.as_mut_ptr(),
                    self.output_ptrs.as_mut_ptr(),
                    frames as i32,
                );
            },
            _ => {
                for out in outputs.iter_mut() {
                    out[..frames].fill(0.0);
                }
            }
        }
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

    fn open_editor(&mut self, parent: RawWindowHandle) -> Result<(), PluginError> {
        if self.flags() & FLAG_HAS_EDITOR == 0 {
            return Err(PluginError::NoEditor);
        }
        let handle: *mut c_void = match parent {
            RawWindowHandle::Xlib(h) => h.window as usize as *mut c_void,
            RawWindowHandle::Xcb(h) => h.window.get() as usize as *mut c_void,
            RawWindowHandle::Win32(h) => h.hwnd.get() as *mut c_void,
            RawWindowHandle::AppKit(h) => h.ns_view.as_ptr(),
            _ => return Err(PluginError::UnsupportedWindow),
        };
        self.dispatch(OP_EDIT_OPEN, 0, 0, handle, 0.0);
        self.editor_open = true;
        Ok(())
    }

    fn close_editor(&mut self) {
        if self.editor_open {
            self.dispatch(OP_EDIT_CLOSE, 0, 0, ptr::null_mut(), 0.0);
            self.editor_open = false;
        }
    }

    fn editor_size(&self) -> Option<(u32, u32)> {
        if self.flags() & FLAG_HAS_EDITOR == 0 {
            return None;
        }
        let mut rect: *mut ERect = ptr::null_mut();
        self.dispatch(OP_EDIT_GET_RECT, 0, 0, &mut rect as *mut *mut ERect as *mut c_void, 0.0);
        if rect.is_null() {
            return None;
        }
        let rect = unsafe { *rect };
        let width = (rect.right as i32 - rect.left as i32).max(0) as u32;
        let height = (rect.bottom as i32 - rect.top as i32).max(0) as u32;
        Some((width, height))
    }
}

impl Drop for Vst2Plugin {
    fn drop(&mut self) {
        self.dispatch(OP_STOP_PROCESS, 0, 0, ptr::null_mut(), 0.0);
        self.close_editor();
        self.dispatch(OP_MAINS_CHANGED, 0, 0, ptr::null_mut(), 0.0);
        self.dispatch(OP_CLOSE, 0, 0, ptr::null_mut(), 0.0);
        log::info!("[VST2] Unloaded {}", self.name);
    }
}
