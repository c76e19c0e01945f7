use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::counter::CompletionCounter;
use super::fetch::{FetchOutcome, FetchWriter};
use super::task::QueuedTask;

/// Receiving end of the work queue, shared by every worker of a campaign.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<QueuedTask>>>;

/// Handle kept by the session for each running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: usize,
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to exit after its current task. Idempotent.
    pub fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // A worker that already exited has dropped its receiver.
            let _ = stop.send(());
        }
    }

    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(worker = self.id, "Worker task failed: {}", e);
        }
    }
}

/// Spawn worker `id` onto the runtime.
///
/// Each dequeued task is followed by exactly one `counter.done()`, as is the
/// stop signal.
pub fn spawn(
    id: usize,
    queue: SharedQueue,
    counter: Arc<CompletionCounter>,
    writer: FetchWriter,
    verbose: bool,
) -> WorkerHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let span = tracing::info_span!("worker", id);
    let join = tokio::spawn(run(queue, stop_rx, counter, writer, verbose).instrument(span));
    WorkerHandle {
        id,
        stop: Some(stop_tx),
        join,
    }
}

async fn run(
    queue: SharedQueue,
    mut stop: oneshot::Receiver<()>,
    counter: Arc<CompletionCounter>,
    writer: FetchWriter,
    verbose: bool,
) {
    tracing::debug!("Worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = &mut stop => break,
            task = recv(&queue) => task,
        };
        match next {
            Some(task) => {
                process(&task, &writer, verbose).await;
                counter.done();
            }
            None => {
                // Queue closed early; the stop signal still owes a `done`.
                let _ = (&mut stop).await;
                break;
            }
        }
    }
    tracing::debug!("Worker received stop signal");
    counter.done();
}

/// Take the next task; `None` once the sending side is gone and drained.
async fn recv(queue: &SharedQueue) -> Option<QueuedTask> {
    let mut rx = queue.lock().await;
    rx.recv().await
}

async fn process(task: &QueuedTask, writer: &FetchWriter, verbose: bool) {
    let dest = task.destination();
    if verbose {
        tracing::debug!(
            queued_ms = task.enqueued_at.elapsed().as_millis() as u64,
            "Received {}",
            dest.short_path.display()
        );
    }
    let started = Instant::now();
    match writer.fetch_and_write(task).await {
        Ok(FetchOutcome::Written { bytes }) => {
            tracing::debug!(
                bytes,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Wrote {}",
                dest.short_path.display()
            );
        }
        Ok(FetchOutcome::AlreadyExists) => {
            if verbose {
                tracing::debug!("{} already exists", dest.short_path.display());
            }
        }
        Err(e) if e.file_written() => {
            tracing::warn!("Wrote {} but {}", dest.short_path.display(), e);
        }
        Err(e) => {
            tracing::error!("Error downloading {}: {}", dest.short_path.display(), e);
        }
    }
}
