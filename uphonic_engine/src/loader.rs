//! Asynchronous instrument loading.
//!
//! The UI queues requests; a non-audio thread drains them once per frame,
//! instantiates plugins there, and hands finished instruments to the audio
//! thread as commands. Instruments the audio thread lets go of come back
//! over the garbage channel and are dropped here.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::commands::{EngineCommand, Garbage};
use crate::instruments::InstrumentRack;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadRequest {
    Load { track: usize, path: String },
    Unload { track: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { track: usize, name: String },
    Unloaded { track: usize },
    Failed { track: usize, path: String, error: String },
}

/// UI-side handle for queueing load and unload requests.
#[derive(Clone)]
pub struct InstrumentQueue {
    tx: Sender<LoadRequest>,
}

impl InstrumentQueue {
    pub fn request_load(&self, track: usize, path: impl Into<String>) {
        let _ = self.tx.send(LoadRequest::Load { track, path: path.into() });
    }

    pub fn request_unload(&self, track: usize) {
        let _ = self.tx.send(LoadRequest::Unload { track });
    }
}

pub struct InstrumentLoader {
    requests: Receiver<LoadRequest>,
    commands: Sender<EngineCommand>,
    garbage: Receiver<Garbage>,
    sample_rate: f32,
    block_size: usize,
}

impl InstrumentLoader {
    pub fn new(
        commands: Sender<EngineCommand>,
        garbage: Receiver<Garbage>,
        sample_rate: f32,
        block_size: usize,
    ) -> (InstrumentQueue, InstrumentLoader) {
        let (tx, requests) = unbounded();
        let loader = InstrumentLoader {
            requests,
            commands,
            garbage,
            sample_rate,
            block_size,
        };
        (InstrumentQueue { tx }, loader)
    }

    /// Handle every queued request in the order it was made. Blocking while
    /// plugins instantiate; never call on the audio thread.
    pub fn process_pending(&mut self) -> Vec<LoadOutcome> {
        let mut outcomes = Vec::new();

        loop {
            match self.requests.try_recv() {
                Ok(LoadRequest::Unload { track }) => {
                    if self.commands.send(EngineCommand::RemoveInstrument { track }).is_ok() {
                        outcomes.push(LoadOutcome::Unloaded { track });
                    }
                }
                Ok(LoadRequest::Load { track, path }) => outcomes.push(self.load(track, path)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        self.collect_garbage();
        outcomes
    }

    fn load(&self, track: usize, path: String) -> LoadOutcome {
        let instrument = match InstrumentRack::instantiate(&path, self.sample_rate, self.block_size) {
            Ok(instrument) => instrument,
            Err(e) => {
                log::warn!("[Loader] Track {}: failed to load {}: {}", track, path, e);
                return LoadOutcome::Failed { track, path, error: e.to_string() };
            }
        };
        let name = instrument.name().to_string();
        let command = EngineCommand::InstallInstrument {
            track,
            instrument,
            path: Some(path.clone()),
        };
        if self.commands.send(command).is_err() {
            return LoadOutcome::Failed {
                track,
                path,
                error: "engine is not running".to_string(),
            };
        }
        log::info!("[Loader] Track {}: loaded '{}' from {}", track, name, path);
        LoadOutcome::Loaded { track, name }
    }

    /// Drop everything the audio thread has retired. Returns how many items were freed.
    pub fn collect_garbage(&self) -> usize {
        let mut freed = 0;
        for item in self.garbage.try_iter() {
            match &item {
                Garbage::Instrument(instrument) => {
                    log::debug!("[Loader] Unloading instrument '{}'", instrument.name());
                }
                Garbage::Rejected(_) => log::warn!("[Loader] Engine rejected an edit"),
                _ => {}
            }
            drop(item);
            freed += 1;
        }
        freed
    }
}
