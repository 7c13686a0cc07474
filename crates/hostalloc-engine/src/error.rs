//! Allocation error types.

use thiserror::Error;

/// Terminal outcomes of a failed allocation request.
///
/// Page exhaustion is not listed here: it is a control signal
/// ([`crate::StageOutcome::PageExhausted`]) that the engine consumes by
/// restarting the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no available host: {0}")]
    NoAvailableHost(String),

    #[error("stage {stage} rejected the request: {reason}")]
    StageRejected { stage: String, reason: String },

    #[error("host search gave up after {rounds} rounds; errors: [{}]", .errors.join(", "))]
    SearchExhausted { rounds: u32, errors: Vec<String> },

    #[error("allocation pipeline has no stages")]
    EmptyPipeline,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AllocationError {
    pub fn is_no_available_host(&self) -> bool {
        matches!(self, AllocationError::NoAvailableHost(_))
    }
}

pub type AllocationResult<T> = Result<T, AllocationError>;
