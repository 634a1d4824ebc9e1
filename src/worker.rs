//! Dedicated Worker Threads
//!
//! The watcher and the emitter each run on one named thread, stopped
//! cooperatively through a shared running flag and joined explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

/// Cooperative stop flag shared between a worker and its owner
#[derive(Debug, Clone)]
pub struct StopSignal {
    running: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a signal in the running state
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ask the worker to exit at its next check
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    signal: StopSignal,
    thread: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Spawn `body` on a thread named `name`
    pub fn spawn<F>(name: &str, signal: StopSignal, body: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| Error::Worker(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            signal,
            thread,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a graceful stop; the worker exits at its next check
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// True until a stop is requested or the thread has exited
    pub fn is_running(&self) -> bool {
        self.signal.is_running() && !self.thread.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Clone of the stop flag, for stopping the worker from elsewhere
    pub fn stop_signal(&self) -> StopSignal {
        self.signal.clone()
    }

    /// Wait for the thread and return the worker's own result
    pub fn join(self) -> Result<()> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Worker(format!("{} thread panicked", self.name))),
        }
    }
}
