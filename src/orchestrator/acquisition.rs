//! Serialized artifact acquisition queue.
//!
//! Acquisition work (downloads, patch steps, build-tool runs) shares one
//! on-disk artifact cache, so tasks never overlap. [`AcquisitionQueue::enqueue`]
//! returns immediately; a single worker task pulls tasks in submission
//! order, awaits the procedure, hands the outcome to the task's completion
//! callback, awaits that too, and only then pulls the next task.
//!
//! A failing or panicking procedure does not stop the queue. Its callback
//! receives the error and the worker moves on.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{AppError, Result};

/// Owned, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Completion callback invoked with the procedure's outcome.
type Completion = Box<dyn FnOnce(Result<()>) -> BoxFuture<()> + Send>;

/// One unit of acquisition work plus its completion callback.
pub struct AcquisitionTask {
    label: String,
    procedure: BoxFuture<Result<()>>,
    on_complete: Completion,
}

impl AcquisitionTask {
    /// Build a task from a procedure and a completion callback.
    ///
    /// The callback runs on the queue worker; the next task does not start
    /// until the future it returns has resolved.
    pub fn new<P, C, F>(label: impl Into<String>, procedure: P, on_complete: C) -> Self
    where
        P: Future<Output = Result<()>> + Send + 'static,
        C: FnOnce(Result<()>) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            procedure: Box::pin(procedure),
            on_complete: Box::new(move |outcome| Box::pin(on_complete(outcome))),
        }
    }

    /// Label used in log lines.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for AcquisitionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionTask")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Handle for submitting tasks to the acquisition worker.
///
/// Cheap to clone; all clones feed the same worker.
#[derive(Debug, Clone)]
pub struct AcquisitionQueue {
    tx: mpsc::UnboundedSender<AcquisitionTask>,
    depth: Arc<AtomicUsize>,
}

impl AcquisitionQueue {
    /// Spawn the worker task and return the submission handle.
    ///
    /// The worker exits when `cancel` fires or every handle is dropped.
    /// Tasks still queued at cancellation are dropped without running
    /// their callbacks.
    #[must_use]
    pub fn start(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(rx, Arc::clone(&depth), cancel));
        (Self { tx, depth }, worker)
    }

    /// Append a task to the tail of the queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Acquisition` if the worker has shut down.
    pub fn enqueue(&self, task: AcquisitionTask) -> Result<()> {
        let label = task.label.clone();
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(task).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            AppError::Acquisition("acquisition worker is not running".into())
        })?;
        debug!(task = %label, "acquisition task queued");
        Ok(())
    }

    /// Number of tasks queued or executing.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<AcquisitionTask>,
    depth: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("acquisition worker shutting down");
                break;
            }
            next = rx.recv() => match next {
                Some(task) => task,
                None => break,
            },
        };

        let AcquisitionTask {
            label,
            procedure,
            on_complete,
        } = task;
        let span = info_span!("acquisition", task = %label);

        async {
            // A panic inside the procedure surfaces as a JoinError.
            let outcome = match tokio::spawn(procedure).await {
                Ok(outcome) => outcome,
                Err(err) => Err(AppError::Acquisition(format!("task aborted: {err}"))),
            };
            match &outcome {
                Ok(()) => info!("acquisition finished"),
                Err(err) => warn!(%err, "acquisition failed"),
            }
            on_complete(outcome).await;
        }
        .instrument(span)
        .await;

        depth.fetch_sub(1, Ordering::SeqCst);
    }
}
