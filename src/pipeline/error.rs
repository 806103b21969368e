//! Batch-runner error types.

use crate::error::KernelNodeError;
use thiserror::Error;

/// Errors that stop a whole batch run, as opposed to a single invocation.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Batch {index} failed: {source}")]
    Invocation {
        index: usize,
        #[source]
        source: KernelNodeError,
    },

    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Channel receive error: expected {expected} results, got {received}")]
    ChannelRecv { expected: usize, received: usize },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
