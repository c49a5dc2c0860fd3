pub mod udp;

use core::time::Duration;
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use tracing::{debug, warn};

/// How long a receive loop waits before checking whether it should stop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whether a loop iteration wants the loop to keep going.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
}

/// A named thread running one receive loop.
///
/// The body is called repeatedly until it returns `Step::Finished` or the
/// worker is stopped. Each call is expected to block for at most the poll
/// interval, so a stop is observed within one interval.
pub struct Worker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: impl Into<String>, mut body: F) -> io::Result<Self>
    where
        F: FnMut() -> Step + Send + 'static,
    {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(worker = %thread_name, "Worker started");
                while !stop_flag.load(Ordering::Acquire) {
                    if body() == Step::Finished {
                        break;
                    }
                }
                stop_flag.store(true, Ordering::Release);
                debug!(worker = %thread_name, "Worker finished");
            })?;
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    /// Asks the loop to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Waits for the thread to exit. Does not stop it.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = %self.name, "Worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
