//! Stage contract for the allocation pipeline.
//!
//! A stage receives the previous stage's candidates (or `None` when it is
//! first), the shared request, and the shared pagination cursor. It answers
//! with exactly one [`StageOutcome`]. Returning `Err` (or panicking) is an
//! unexpected fault and ends the request with an internal error.
//!
//! Stages only read and filter. They never touch host capacity.

use std::sync::Arc;

use async_trait::async_trait;

use hostalloc_state::HostRecord;

use crate::error::AllocationError;
use crate::pagination::PaginationState;
use crate::spec::AllocationSpec;

/// Everything a stage sees for one invocation.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// `None` for the first stage of a round.
    pub candidates: Option<Vec<HostRecord>>,
    pub spec: Arc<AllocationSpec>,
    /// Present only when pagination is enabled.
    pub pagination: Option<Arc<PaginationState>>,
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Pass a non-empty candidate list to the next stage.
    Advance(Vec<HostRecord>),
    /// Stop the request.
    Fail(StageFailure),
    /// The current page held no match but later pages may. Only legal with
    /// pagination enabled; the engine restarts the pipeline from the first
    /// stage and records the detail.
    PageExhausted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    NoAvailableHost(String),
    /// Business-rule rejection, surfaced verbatim.
    Rejected(String),
}

impl StageFailure {
    pub fn into_error(self, stage: &str) -> AllocationError {
        match self {
            StageFailure::NoAvailableHost(reason) => AllocationError::NoAvailableHost(reason),
            StageFailure::Rejected(reason) => AllocationError::StageRejected {
                stage: stage.to_string(),
                reason,
            },
        }
    }
}

impl StageOutcome {
    /// Outcome for a filtered list: advance when something survived,
    /// otherwise signal page exhaustion (pagination on) or fail with no
    /// available host (pagination off).
    pub fn narrowed<F>(hosts: Vec<HostRecord>, pagination: Option<&PaginationState>, reason: F) -> Self
    where
        F: FnOnce() -> String,
    {
        if !hosts.is_empty() {
            return StageOutcome::Advance(hosts);
        }
        match pagination {
            Some(page) => StageOutcome::PageExhausted(format!(
                "{} (page offset {}, limit {})",
                reason(),
                page.offset(),
                page.limit()
            )),
            None => StageOutcome::Fail(StageFailure::NoAvailableHost(reason())),
        }
    }
}

impl StageInput {
    /// Candidates handed over by the previous stage.
    ///
    /// Fails when the stage was wired in as the first stage.
    pub fn take_candidates(&mut self, stage: &str) -> anyhow::Result<Vec<HostRecord>> {
        self.candidates
            .take()
            .ok_or_else(|| anyhow::anyhow!("stage {stage} needs candidates and cannot run first"))
    }
}

/// One filtering or scoring step of the pipeline.
#[async_trait]
pub trait AllocationStage: Send + Sync + 'static {
    /// Stable name used in logs and error messages.
    fn name(&self) -> &str;

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutcome>;
}
