//! Background maintenance worker: a dedicated thread paired with a
//! `crossbeam` channel so the owner can ask it to stop and wait for it to
//! exit, with `JoinHandle::join` standing in for the stop acknowledgement.
//!
//! `spawn`'s tick closure hands the worker exclusive mutation rights for the
//! span of each tick (typically by locking a shared mutex inside it);
//! `join` blocks until any in-flight tick finishes and returns that tick's
//! actual result, rather than assuming success.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};

use crate::dtable::DTableError;

enum Msg {
    Stop,
}

/// A periodic background task. `ManagedDtable::background_loan` spawns one
/// of these to drive `run_maintenance` without blocking callers.
pub struct Worker {
    tx: channel::Sender<Msg>,
    handle: Option<JoinHandle<()>>,
    last_result: Arc<Mutex<Option<Result<(), DTableError>>>>,
}

impl Worker {
    pub fn spawn(interval: Duration, mut tick: impl FnMut() -> Result<(), DTableError> + Send + 'static) -> Self {
        let (tx, rx) = channel::unbounded();
        let last_result = Arc::new(Mutex::new(None));
        let result_slot = Arc::clone(&last_result);
        let handle = thread::spawn(move || loop {
            match rx.recv_timeout(interval) {
                Ok(Msg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let result = tick();
                    *result_slot.lock().expect("worker result mutex poisoned") = Some(result);
                }
            }
        });
        Self { tx, handle: Some(handle), last_result }
    }

    /// Signals the thread to stop. Since the loop only checks for `Stop`
    /// between ticks, `handle.join()` naturally blocks until any tick
    /// already running finishes, at which point `last_result` holds that
    /// tick's actual outcome.
    pub fn join(mut self) -> Result<(), DTableError> {
        let _ = self.tx.send(Msg::Stop);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| DTableError::Corrupt("background worker thread panicked".into()))?;
        }
        self.last_result.lock().expect("worker result mutex poisoned").take().unwrap_or(Ok(()))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ticks_until_joined() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let worker = Worker::spawn(Duration::from_millis(10), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        thread::sleep(Duration::from_millis(35));
        worker.join().unwrap();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn join_reports_the_last_tick_failure() {
        let worker = Worker::spawn(Duration::from_millis(10), || {
            Err(DTableError::Corrupt("tick failed".into()))
        });
        thread::sleep(Duration::from_millis(25));
        let err = worker.join().unwrap_err();
        assert!(matches!(err, DTableError::Corrupt(_)));
    }
}
