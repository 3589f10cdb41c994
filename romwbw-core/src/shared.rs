//! Thread-shareable engine handle.
//!
//! One thread runs batches; any other thread may use the control calls.
//! Every call takes the lock, so a control call never overlaps a batch.
//! Clone is cheap (just clones the Arcs).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{BatchReport, Engine};
use crate::error::{EmuError, EmuResult};

#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
    running: Arc<AtomicBool>,
}

impl SharedEngine {
    /// Wrap an engine. It starts stopped.
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> EmuResult<R> {
        let mut engine = self.inner.lock().map_err(|_| EmuError::LockPoisoned)?;
        Ok(f(&mut engine))
    }

    /// Allow batches to run.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stop scheduling batches. A batch already in flight finishes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one batch if started. Returns whether the caller should keep
    /// going; a halted guest also clears the running flag.
    pub fn run_batch(&self) -> EmuResult<bool> {
        Ok(self.run_batch_report()?.is_some_and(|r| r.should_continue()))
    }

    /// Like `run_batch`, but returns the report. `None` when stopped.
    pub fn run_batch_report(&self) -> EmuResult<Option<BatchReport>> {
        if !self.is_running() {
            return Ok(None);
        }
        let report = self.with(|engine| {
            let budget = engine.config().batch_instructions;
            engine.run_for(budget)
        })?;
        if !report.should_continue() {
            self.stop();
        }
        Ok(Some(report))
    }

    pub fn queue_input(&self, byte: u8) -> EmuResult<()> {
        self.with(|engine| engine.queue_input(byte))
    }

    pub fn queue_input_str(&self, s: &str) -> EmuResult<()> {
        self.with(|engine| engine.queue_input_str(s))
    }

    /// Take the engine back if this is the last handle.
    pub fn into_inner(self) -> EmuResult<Engine> {
        let mutex = Arc::try_unwrap(self.inner).map_err(|_| EmuError::NotReady("engine still shared"))?;
        mutex.into_inner().map_err(|_| EmuError::LockPoisoned)
    }
}
