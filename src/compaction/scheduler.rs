use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A request for the background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Flush the immutable memtable and run any compaction that is due.
    Work,
    /// Exit the worker loop.
    Shutdown,
}

/// The single background thread that runs flushes and compactions.
///
/// Tasks are consumed in order; the handler runs once per `Work` task.
pub struct BackgroundWorker {
    sender: Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn spawn<F>(name: &str, mut handler: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = unbounded();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    match task {
                        Task::Work => handler(),
                        Task::Shutdown => break,
                    }
                }
                debug!("background worker exiting");
            })?;
        Ok(BackgroundWorker {
            sender,
            handle: Some(handle),
        })
    }

    pub fn schedule(&self) -> Result<()> {
        self.sender
            .send(Task::Work)
            .map_err(|_| Error::Io(std::io::Error::other("background worker has exited")))
    }

    /// Stop the worker after the tasks already queued and wait for it.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.sender.send(Task::Shutdown);
        if handle.join().is_err() {
            warn!("background worker panicked");
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_queued_work_before_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut worker = BackgroundWorker::spawn("test-bg", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        for _ in 0..5 {
            worker.schedule().unwrap();
        }
        worker.shutdown();
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert!(worker.schedule().is_err());
    }
}
