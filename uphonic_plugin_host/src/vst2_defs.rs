//! C layout of the 2.x-style instrument ABI, plus the host callback handed to
//! the plugin at instantiation.

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

pub const EFFECT_MAGIC: i32 = i32::from_be_bytes(*b"VstP");

pub const FLAG_HAS_EDITOR: i32 = 1 << 0;
pub const FLAG_CAN_REPLACING: i32 = 1 << 4;
pub const FLAG_IS_SYNTH: i32 = 1 << 8;

pub const OP_OPEN: i32 = 0;
pub const OP_CLOSE: i32 = 1;
pub const OP_SET_SAMPLE_RATE: i32 = 10;
pub const OP_SET_BLOCK_SIZE: i32 = 11;
pub const OP_MAINS_CHANGED: i32 = 12;
pub const OP_EDIT_GET_RECT: i32 = 13;
pub const OP_EDIT_OPEN: i32 = 14;
pub const OP_EDIT_CLOSE: i32 = 15;
pub const OP_PROCESS_EVENTS: i32 = 25;
pub const OP_START_PROCESS: i32 = 71;
pub const OP_STOP_PROCESS: i32 = 72;

const MASTER_VERSION: i32 = 1;
const MASTER_IDLE: i32 = 3;
const MASTER_GET_SAMPLE_RATE: i32 = 16;
const MASTER_GET_BLOCK_SIZE: i32 = 17;
const MASTER_CAN_DO: i32 = 37;

pub const HOST_VERSION: isize = 2400;

pub const MIDI_EVENT_TYPE: i32 = 1;

pub type HostCallback =
    unsafe extern "C" fn(effect: *mut AEffect, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize;
pub type DispatcherProc =
    unsafe extern "C" fn(effect: *mut AEffect, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize;
pub type ProcessProc = unsafe extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32);
pub type ProcessDoubleProc =
    unsafe extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32);
pub type SetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32, value: f32);
pub type GetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32) -> f32;

/// Entry point exported as `VSTPluginMain` (or `main` on older builds).
pub type PluginMain = unsafe extern "C" fn(host: HostCallback) -> *mut AEffect;

#[repr(C)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: DispatcherProc,
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    pub reserved1: isize,
    pub reserved2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_double_replacing: Option<ProcessDoubleProc>,
    pub future: [c_char; 56],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstMidiEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub note_length: i32,
    pub note_offset: i32,
    pub midi_data: [u8; 4],
    pub detune: i8,
    pub note_off_velocity: u8,
    pub reserved1: u8,
    pub reserved2: u8,
}

impl VstMidiEvent {
    pub const EMPTY: VstMidiEvent = VstMidiEvent {
        event_type: MIDI_EVENT_TYPE,
        byte_size: std::mem::size_of::<VstMidiEvent>() as i32,
        delta_frames: 0,
        flags: 0,
        note_length: 0,
        note_offset: 0,
        midi_data: [0; 4],
        detune: 0,
        note_off_velocity: 0,
        reserved1: 0,
        reserved2: 0,
    };

    pub fn note(status: u8, pitch: u8, velocity: u8, delta_frames: u32) -> Self {
        Self {
            delta_frames: delta_frames.min(i32::MAX as u32) as i32,
            midi_data: [status, pitch & 0x7F, velocity & 0x7F, 0],
            ..Self::EMPTY
        }
    }
}

/// Event batch handed to `OP_PROCESS_EVENTS`. `N` is the capacity, the plugin only reads `num_events`.
#[repr(C)]
pub struct VstEvents<const N: usize> {
    pub num_events: i32,
    pub reserved: isize,
    pub events: [*mut VstMidiEvent; N],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ERect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

// The plugin may ask for these at any time from its own threads.
static HOST_SAMPLE_RATE: AtomicU32 = AtomicU32::new(44_100);
static HOST_BLOCK_SIZE: AtomicI32 = AtomicI32::new(512);

pub fn set_host_format(sample_rate: f32, block_size: usize) {
    HOST_SAMPLE_RATE.store(sample_rate.max(1.0) as u32, Ordering::Relaxed);
    HOST_BLOCK_SIZE.store(block_size.min(i32::MAX as usize) as i32, Ordering::Relaxed);
}

const CAN_DO: [&[u8]; 4] = [b"sendVstEvents", b"sendVstMidiEvent", b"receiveVstEvents", b"receiveVstMidiEvent"];

pub unsafe extern "C" fn host_callback(
    _effect: *mut AEffect,
    opcode: i32,
    _index: i32,
    _value: isize,
    ptr: *mut c_void,
    _opt: f32,
) -> isize {
    match opcode {
        MASTER_VERSION => HOST_VERSION,
        MASTER_IDLE => 0,
        MASTER_GET_SAMPLE_RATE => HOST_SAMPLE_RATE.load(Ordering::Relaxed) as isize,
        MASTER_GET_BLOCK_SIZE => HOST_BLOCK_SIZE.load(Ordering::Relaxed) as isize,
        MASTER_CAN_DO => {
            if ptr.is_null() {
                return 0;
            }
            let query = unsafe { CStr::from_ptr(ptr as *const c_char) }.to_bytes();
            CAN_DO.contains(&query) as isize
        }
        _ => 0,
    }
}
