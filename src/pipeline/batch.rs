//! Worker-pool execution of one node over many input batches.
//!
//! Workers pull `(index, inputs)` jobs from a crossbeam channel and invoke the
//! shared node. The cancel flag is checked before each invocation starts; a
//! running invocation always finishes. Kernel dispatches from all workers
//! serialize on the node's backend session.

use crate::backend::DeviceBuffer;
use crate::error::KernelNodeError;
use crate::node::{Invocation, KernelNode};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Input buffers for one invocation, by input slot name
pub type BatchInputs = Vec<(String, DeviceBuffer)>;

/// What happened to one batch
#[derive(Debug)]
pub enum BatchOutcome {
    Completed(Invocation),
    Failed(KernelNodeError),
    /// Skipped because cancellation was requested before it started
    Cancelled,
}

#[derive(Debug)]
pub struct BatchResult {
    /// Position of the batch in the submitted list
    pub index: usize,
    pub outcome: BatchOutcome,
}

impl BatchResult {
    pub fn invocation(&self) -> Option<&Invocation> {
        match &self.outcome {
            BatchOutcome::Completed(inv) => Some(inv),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Cancelled)
    }

    /// Convert into a `Result`, treating cancellation as "no invocation"
    pub fn into_result(self) -> PipelineResult<Option<Invocation>> {
        match self.outcome {
            BatchOutcome::Completed(inv) => Ok(Some(inv)),
            BatchOutcome::Cancelled => Ok(None),
            BatchOutcome::Failed(source) => Err(PipelineError::Invocation {
                index: self.index,
                source,
            }),
        }
    }
}

/// Cloneable handle for requesting cancellation from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs a shared node over independent batches on a fixed pool of threads
pub struct BatchRunner {
    node: Arc<KernelNode>,
    workers: usize,
    cancel: CancelHandle,
}

impl BatchRunner {
    pub fn new(node: Arc<KernelNode>) -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            node,
            workers,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Share an existing cancel handle instead of the runner's own
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn node(&self) -> &Arc<KernelNode> {
        &self.node
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run every batch and return the results in submission order
    pub fn run(&self, batches: Vec<BatchInputs>) -> PipelineResult<Vec<BatchResult>> {
        let expected = batches.len();
        let started = Instant::now();
        tracing::info!(
            node = %self.node.name(),
            batches = expected,
            workers = self.workers,
            "batch run started"
        );

        let (job_tx, job_rx) = unbounded::<(usize, BatchInputs)>();
        let (result_tx, result_rx) = unbounded::<BatchResult>();
        for job in batches.into_iter().enumerate() {
            job_tx.send(job).map_err(|_| PipelineError::ChannelSend)?;
        }
        drop(job_tx);

        thread::scope(|scope| -> PipelineResult<()> {
            let mut handles = Vec::with_capacity(self.workers);
            for worker in 0..self.workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let node = Arc::clone(&self.node);
                let cancel = self.cancel.clone();
                let handle = thread::Builder::new()
                    .name(format!("kernel-node-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        for (index, inputs) in jobs.iter() {
                            let outcome = if cancel.is_cancelled() {
                                BatchOutcome::Cancelled
                            } else {
                                match node.invoke_with(inputs) {
                                    Ok(inv) => BatchOutcome::Completed(inv),
                                    Err(e) => BatchOutcome::Failed(e),
                                }
                            };
                            tracing::trace!(worker, index, "batch finished");
                            if results.send(BatchResult { index, outcome }).is_err() {
                                break;
                            }
                        }
                    })?;
                handles.push(handle);
            }

            for (worker, handle) in handles.into_iter().enumerate() {
                handle
                    .join()
                    .map_err(|_| PipelineError::WorkerPanicked(worker))?;
            }
            Ok(())
        })?;
        drop(result_tx);

        let mut results: Vec<BatchResult> = result_rx.iter().collect();
        if results.len() != expected {
            return Err(PipelineError::ChannelRecv {
                expected,
                received: results.len(),
            });
        }
        results.sort_by_key(|r| r.index);

        let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
        let failed = results
            .iter()
            .filter(|r| matches!(r.outcome, BatchOutcome::Failed(_)))
            .count();
        tracing::info!(
            node = %self.node.name(),
            completed = expected - cancelled - failed,
            failed,
            cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch run finished"
        );
        Ok(results)
    }
}
