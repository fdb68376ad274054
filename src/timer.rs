//! Cancellable fixed-interval background task

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use crossbeam::select;

/// Runs a callback on its own thread every `interval` until cancelled,
/// dropped, or the callback asks to stop.
pub(crate) struct PeriodicTask {
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    cancel_tx: Option<Sender<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut callback: F) -> io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(0);
        let cancelled = Arc::new(AtomicBool::new(false));
        let ticker = channel::tick(interval);
        let stop = Arc::clone(&cancelled);

        thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                select! {
                    recv(cancel_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        if callback().is_break() {
                            break;
                        }
                    }
                }
            }
        })?;

        Ok(Self {
            interval,
            cancelled,
            cancel_tx: Some(cancel_tx),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop scheduling further runs. A run already in progress finishes.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        // disconnecting wakes the thread out of select!
        self.cancel_tx.take();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
