use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum QueueMessage {
    Run(Job),
    Shutdown,
}

/// Cloneable submission side of a [`SerialQueue`].
///
/// Host services receive one of these with every asynchronous request and
/// must run their completion or event callback through it.
#[derive(Clone)]
pub struct QueueHandle {
    label: Arc<str>,
    tx: UnboundedSender<QueueMessage>,
}

impl QueueHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queues `job` behind everything already submitted. Returns `false` once
    /// the queue has shut down; the job is dropped without running.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(QueueMessage::Run(Box::new(job))).is_ok()
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle").field("label", &self.label).finish()
    }
}

/// Serial execution context: one named worker thread running jobs one at a
/// time in submission order.
pub struct SerialQueue {
    handle: QueueHandle,
    worker: Option<JoinHandle<()>>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> io::Result<Self> {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, rx) = unbounded_channel();

        let worker_label = label.clone();
        let worker = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || run_queue(worker_label, rx))?;

        Ok(Self { handle: QueueHandle { label, tx }, worker: Some(worker) })
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn label(&self) -> &str {
        self.handle.label()
    }

    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.dispatch(job)
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue").field("label", &self.handle.label).finish()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Jobs queued before this point still run; later dispatches are refused.
        let _ = self.handle.tx.send(QueueMessage::Shutdown);

        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            log::warn!("vmnet: queue worker panicked label={}", self.handle.label);
        }
    }
}

fn run_queue(label: Arc<str>, mut rx: UnboundedReceiver<QueueMessage>) {
    log::trace!("vmnet: queue started label={}", label);
    while let Some(message) = rx.blocking_recv() {
        match message {
            QueueMessage::Run(job) => job(),
            QueueMessage::Shutdown => break,
        }
    }
    log::trace!("vmnet: queue stopped label={}", label);
}
