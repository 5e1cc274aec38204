use log::{debug, error, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// An opaque unit of work against the shared connection. The queue
/// never inspects the payload.
pub type Command = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

const SLOW_ACTION_WARN: Duration = Duration::from_secs(30);

/// Single-consumer serialized executor: one dedicated worker runs
/// submitted actions strictly in submission order, never two at once.
/// Routing every mutation of the connection handle through here is
/// what makes the handle safe to touch without per-action locking.
pub struct CommandQueue {
    tx: Mutex<Option<SyncSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = sync_channel(depth);
        let worker = thread::Builder::new()
            .name("command-queue".into())
            .spawn(move || Self::run(rx))
            .expect("spawn command queue worker");
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue an action. Returns whether it was accepted; `false`
    /// after [`stop`](Self::stop). May block briefly while the buffer
    /// is full, but an accepted action is never dropped.
    pub fn submit(&self, command: Command) -> bool {
        let tx = self.tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    pub fn submit_fn<F>(&self, f: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.submit(Box::new(f))
    }

    /// Stop accepting work and drain the backlog. Blocks until the
    /// worker has exited (unless called from the worker itself).
    /// Idempotent.
    pub fn stop(&self) {
        drop(self.tx.lock().unwrap().take());
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Called from a queued action; the worker exits on its
                // own once the backlog is drained.
                return;
            }
            if handle.join().is_err() {
                error!(target: "CommandQueue", "worker thread panicked");
            }
        }
    }

    fn run(rx: Receiver<Command>) {
        debug!(target: "CommandQueue", "worker started");
        while let Ok(command) = rx.recv() {
            let started = Instant::now();
            match catch_unwind(AssertUnwindSafe(command)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(target: "CommandQueue", "queued action failed: {e:#}");
                }
                Err(_) => {
                    error!(target: "CommandQueue", "queued action panicked");
                }
            }
            let elapsed = started.elapsed();
            if elapsed > SLOW_ACTION_WARN {
                warn!(
                    target: "CommandQueue",
                    "queued action held the queue for {}s",
                    elapsed.as_secs()
                );
            }
        }
        debug!(target: "CommandQueue", "worker stopped");
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
