use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::StoreError;

/// Something the worker can ask to flush. Implemented by the engine so the worker thread does not
/// need to know the entity type.
pub(crate) trait FlushTarget: Send + Sync + 'static {
    /// One single-flight attempt; errors are logged by the implementation.
    fn flush_attempt(&self);
}

enum Command {
    Flush,
    Shutdown,
}

/// Dedicated thread that performs flushes on behalf of producers.
///
/// Producers only post a request; requests that pile up while a flush runs are coalesced into
/// the next attempt.
pub(crate) struct FlushWorker {
    sender: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub(crate) fn spawn(name: &str, target: Arc<dyn FlushTarget>) -> Result<Self, StoreError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let handle = thread::Builder::new()
            .name(format!("flush-worker-{name}"))
            .spawn(move || run_flush_worker(target.as_ref(), &receiver))
            .map_err(|err| {
                StoreError::ExecutionError(format!("failed to spawn flush worker thread: {err}"))
            })?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Post a flush request without waiting for it.
    pub(crate) fn request_flush(&self) -> Result<(), StoreError> {
        self.sender
            .send(Command::Flush)
            .map_err(|_| StoreError::Closed)
    }

    /// Stop the worker and wait for an in-flight flush to finish.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("flush worker panicked");
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_flush_worker(target: &dyn FlushTarget, receiver: &Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Shutdown => break,
            Command::Flush => {
                let mut coalesced = 0usize;
                let mut stop = false;
                loop {
                    match receiver.try_recv() {
                        Ok(Command::Flush) => coalesced += 1,
                        Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                            stop = true;
                            break;
                        }
                        Err(TryRecvError::Empty) => break,
                    }
                }
                if coalesced > 0 {
                    debug!(coalesced, "coalesced flush requests");
                }
                target.flush_attempt();
                if stop {
                    break;
                }
            }
        }
    }
    debug!("flush worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct Counting(AtomicUsize);

    impl FlushTarget for Counting {
        fn flush_attempt(&self) {
            std::thread::sleep(Duration::from_millis(5));
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn requests_are_served_and_shutdown_joins() {
        let target = Arc::new(Counting(AtomicUsize::new(0)));
        let mut worker = FlushWorker::spawn("test", Arc::clone(&target) as Arc<dyn FlushTarget>)
            .unwrap();
        for _ in 0..20 {
            worker.request_flush().unwrap();
        }
        worker.shutdown();
        let attempts = target.0.load(Ordering::SeqCst);
        // At least the first request runs; the rest may be coalesced.
        assert!((1..=20).contains(&attempts), "attempts = {attempts}");
        assert!(worker.request_flush().is_err());
    }
}
