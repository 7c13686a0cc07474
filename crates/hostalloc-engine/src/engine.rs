//! Allocation engine: runs the stage pipeline and commits the placement.
//!
//! One request moves through `Running(stage) → Reserving → Done`:
//!
//! 1. Stages run strictly in order, each on its own task; an advance hands
//!    the candidates to the next stage.
//! 2. The final candidate list is shuffled and reservation is attempted
//!    host by host; the first committed reservation wins.
//! 3. Page exhaustion, or a reservation miss on every candidate while
//!    pagination is on, restarts the pipeline from the first stage with the
//!    same pagination cursor. Restarts are bounded by `max_rounds`.
//!
//! All per-request state lives in [`AllocationRun`]; a [`HostAllocator`] is
//! immutable after construction and can serve concurrent requests.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, enabled, error, info, trace, warn, Level};

use hostalloc_core::AllocatorConfig;
use hostalloc_state::{HostCapacity, HostRecord};

use crate::error::{AllocationError, AllocationResult};
use crate::pagination::PaginationState;
use crate::reservation::CapacityReservation;
use crate::spec::AllocationSpec;
use crate::stage::{AllocationStage, StageInput, StageOutcome};

/// Result of [`HostAllocator::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The reserved host, with its capacity after the debit.
    Host(HostRecord),
    /// Every qualifying host (dry run).
    Candidates(Vec<HostRecord>),
}

/// How one pass through the pipeline ended.
enum RoundOutcome {
    Candidates(Vec<HostRecord>),
    Restart(String),
    Failed(AllocationError),
}

/// Mutable state of a single request.
struct AllocationRun {
    spec: Arc<AllocationSpec>,
    pagination: Option<Arc<PaginationState>>,
    /// Distinct failure details from earlier rounds, in first-seen order.
    errors: Vec<String>,
    rounds: u32,
}

impl AllocationRun {
    fn new(spec: AllocationSpec, config: &AllocatorConfig) -> Self {
        let pagination = config
            .use_pagination
            .then(|| Arc::new(PaginationState::new(config.pagination_limit)));
        Self {
            spec: Arc::new(spec),
            pagination,
            errors: Vec::new(),
            rounds: 0,
        }
    }

    fn record(&mut self, detail: String) {
        if !self.errors.contains(&detail) {
            self.errors.push(detail);
        }
    }

    /// Fold earlier round failures into a terminal "no available host".
    ///
    /// Rejections and internal faults are reported as they are.
    fn conclude(&self, err: AllocationError) -> AllocationError {
        if self.errors.is_empty() || !err.is_no_available_host() {
            return err;
        }
        let mut history = self.errors.clone();
        let last = format!("{{{err}}}");
        if !history.contains(&last) {
            history.push(last);
        }
        AllocationError::NoAvailableHost(format!(
            "unable to allocate a host; pagination is enabled and {} round(s) failed before; the error list is [{}]",
            self.rounds.saturating_sub(1),
            history.join(", ")
        ))
    }
}

/// Orchestrates stage execution and capacity reservation.
pub struct HostAllocator {
    name: String,
    stages: Vec<Arc<dyn AllocationStage>>,
    reservation: Arc<dyn CapacityReservation>,
    config: AllocatorConfig,
}

/// Builder for [`HostAllocator`].
pub struct HostAllocatorBuilder {
    name: String,
    stages: Vec<Arc<dyn AllocationStage>>,
    reservation: Arc<dyn CapacityReservation>,
    config: AllocatorConfig,
}

impl HostAllocatorBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a stage to the end of the pipeline.
    pub fn stage(mut self, stage: impl AllocationStage) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Arc<dyn AllocationStage>>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn config(mut self, config: AllocatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> AllocationResult<HostAllocator> {
        if self.stages.is_empty() {
            return Err(AllocationError::EmptyPipeline);
        }
        Ok(HostAllocator {
            name: self.name,
            stages: self.stages,
            reservation: self.reservation,
            config: self.config,
        })
    }
}

impl HostAllocator {
    pub fn builder(reservation: Arc<dyn CapacityReservation>) -> HostAllocatorBuilder {
        HostAllocatorBuilder {
            name: "default".to_string(),
            stages: Vec::new(),
            reservation,
            config: AllocatorConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Pick a host and reserve the requested capacity on it.
    ///
    /// The `dry_run` flag of `spec` is ignored. With pagination on, a
    /// reservation miss on every candidate moves the search to the next page.
    pub async fn allocate(&self, spec: AllocationSpec) -> AllocationResult<HostRecord> {
        let mut run = AllocationRun::new(spec, &self.config);
        loop {
            let hosts = self.search(&mut run).await?;
            if let Some(host) = self.reserve_first(&run, hosts).await? {
                return Ok(host);
            }

            let spec = &run.spec;
            if run.pagination.is_none() {
                let err = AllocationError::NoAvailableHost(
                    "reservation of cpu/memory failed on all candidate hosts".to_string(),
                );
                return Err(self.fail(&run, err));
            }
            debug!(
                allocator = %self.name,
                vm = %spec.vm_id,
                round = run.rounds,
                "unable to reserve capacity on any candidate; starting over"
            );
            let detail = format!(
                "{{unable to reserve cpu[{} Hz], memory[{} bytes] on all candidate hosts}}",
                spec.cpu_hz, spec.memory_bytes
            );
            run.record(detail);
        }
    }

    /// List every qualifying host without reserving anything.
    ///
    /// "No available host" is reported as an empty list.
    pub async fn dry_run(&self, spec: AllocationSpec) -> AllocationResult<Vec<HostRecord>> {
        let mut run = AllocationRun::new(spec, &self.config);
        match self.search(&mut run).await {
            Err(AllocationError::NoAvailableHost(reason)) => {
                debug!(allocator = %self.name, vm = %run.spec.vm_id, %reason, "dry run found no host");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Allocate or dry-run depending on `spec.dry_run`.
    pub async fn execute(&self, spec: AllocationSpec) -> AllocationResult<Placement> {
        if spec.dry_run {
            self.dry_run(spec).await.map(Placement::Candidates)
        } else {
            self.allocate(spec).await.map(Placement::Host)
        }
    }

    /// Run [`HostAllocator::allocate`] on its own task.
    pub fn spawn_allocate(
        self: &Arc<Self>,
        spec: AllocationSpec,
    ) -> JoinHandle<AllocationResult<HostRecord>> {
        let allocator = Arc::clone(self);
        tokio::spawn(async move { allocator.allocate(spec).await })
    }

    /// Return capacity previously reserved on a host.
    pub async fn release(
        &self,
        host_id: &str,
        cpu: u64,
        memory: u64,
    ) -> AllocationResult<Option<HostCapacity>> {
        let reservation = Arc::clone(&self.reservation);
        let id = host_id.to_string();
        let released = tokio::task::spawn_blocking(move || reservation.release(&id, cpu, memory))
            .await
            .map_err(|e| AllocationError::Internal(format!("release task failed: {e}")))?
            .map_err(|e| AllocationError::Internal(format!("release on host {host_id} failed: {e}")))?;
        info!(host = %host_id, cpu, memory, released = released.is_some(), "capacity released");
        Ok(released)
    }

    // ── State machine ───────────────────────────────────────────────

    /// Run pipeline rounds until one yields candidates.
    ///
    /// Page exhaustion restarts from the first stage; at most `max_rounds`
    /// rounds are run per request, reservation restarts included.
    async fn search(&self, run: &mut AllocationRun) -> AllocationResult<Vec<HostRecord>> {
        loop {
            if run.rounds >= self.config.max_rounds {
                warn!(
                    allocator = %self.name,
                    vm = %run.spec.vm_id,
                    rounds = run.rounds,
                    errors = run.errors.len(),
                    "giving up host search"
                );
                return Err(AllocationError::SearchExhausted {
                    rounds: run.rounds,
                    errors: run.errors.clone(),
                });
            }
            run.rounds += 1;

            match self.run_round(run).await {
                RoundOutcome::Candidates(hosts) => return Ok(hosts),
                RoundOutcome::Restart(detail) => {
                    debug!(
                        allocator = %self.name,
                        vm = %run.spec.vm_id,
                        round = run.rounds,
                        page = ?run.pagination.as_ref().map(|p| p.window()),
                        %detail,
                        "intermediate page failure; starting over"
                    );
                    run.record(format!("{{{detail}}}"));
                }
                RoundOutcome::Failed(err) => return Err(self.fail(run, err)),
            }
        }
    }

    /// One pass over every stage.
    async fn run_round(&self, run: &AllocationRun) -> RoundOutcome {
        let mut candidates: Option<Vec<HostRecord>> = None;

        for stage in &self.stages {
            let input = StageInput {
                candidates: candidates.take(),
                spec: Arc::clone(&run.spec),
                pagination: run.pagination.clone(),
            };

            let outcome = match self.invoke(stage, input).await {
                Ok(outcome) => outcome,
                Err(err) => return RoundOutcome::Failed(err),
            };

            match outcome {
                StageOutcome::Advance(hosts) if hosts.is_empty() => {
                    return RoundOutcome::Failed(AllocationError::NoAvailableHost(format!(
                        "stage {} advanced with an empty candidate list",
                        stage.name()
                    )));
                }
                StageOutcome::Advance(hosts) => {
                    debug!(
                        allocator = %self.name,
                        stage = stage.name(),
                        candidates = hosts.len(),
                        vm = %run.spec.vm_id,
                        vm_name = %run.spec.vm_name,
                        "stage found candidate hosts"
                    );
                    if enabled!(Level::TRACE) {
                        for h in &hosts {
                            trace!(
                                host = %h.id,
                                name = %h.name,
                                zone = %h.zone_id,
                                cluster = %h.cluster_id,
                                hypervisor = %h.hypervisor,
                                "candidate host"
                            );
                        }
                    }
                    candidates = Some(hosts);
                }
                StageOutcome::Fail(failure) => {
                    debug!(allocator = %self.name, stage = stage.name(), ?failure, "stage failed");
                    return RoundOutcome::Failed(failure.into_error(stage.name()));
                }
                StageOutcome::PageExhausted(detail) => {
                    if run.pagination.is_none() {
                        return RoundOutcome::Failed(AllocationError::Internal(format!(
                            "stage {} reported page exhaustion with pagination disabled",
                            stage.name()
                        )));
                    }
                    return RoundOutcome::Restart(detail);
                }
            }
        }

        match candidates {
            Some(hosts) => RoundOutcome::Candidates(hosts),
            None => RoundOutcome::Failed(AllocationError::EmptyPipeline),
        }
    }

    /// Run a stage on its own task so a panic is contained.
    async fn invoke(
        &self,
        stage: &Arc<dyn AllocationStage>,
        input: StageInput,
    ) -> AllocationResult<StageOutcome> {
        let task_stage = Arc::clone(stage);
        match tokio::spawn(async move { task_stage.run(input).await }).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(AllocationError::Internal(format!(
                "stage {} failed: {e:#}",
                stage.name()
            ))),
            Err(join) => Err(AllocationError::Internal(format!(
                "stage {} aborted: {join}",
                stage.name()
            ))),
        }
    }

    /// Shuffle the candidates and reserve on the first host that accepts.
    async fn reserve_first(
        &self,
        run: &AllocationRun,
        mut hosts: Vec<HostRecord>,
    ) -> AllocationResult<Option<HostRecord>> {
        hosts.shuffle(&mut rand::rng());
        let spec = &run.spec;

        for host in hosts {
            match self.reserve(&host.id, spec.cpu_hz, spec.memory_bytes).await {
                Ok(Some(capacity)) => {
                    debug!(
                        allocator = %self.name,
                        host = %host.id,
                        vm = %spec.vm_id,
                        cpu = spec.cpu_hz,
                        memory = spec.memory_bytes,
                        "reserved capacity"
                    );
                    return Ok(Some(HostRecord { capacity, ..host }));
                }
                Ok(None) => {
                    debug!(
                        allocator = %self.name,
                        host = %host.id,
                        cpu = spec.cpu_hz,
                        memory = spec.memory_bytes,
                        "unable to reserve capacity, trying next host"
                    );
                }
                Err(err) => return Err(self.fail(run, err)),
            }
        }
        Ok(None)
    }

    async fn reserve(
        &self,
        host_id: &str,
        cpu: u64,
        memory: u64,
    ) -> AllocationResult<Option<HostCapacity>> {
        let reservation = Arc::clone(&self.reservation);
        let id = host_id.to_string();
        tokio::task::spawn_blocking(move || reservation.reserve(&id, cpu, memory))
            .await
            .map_err(|e| AllocationError::Internal(format!("reservation task failed: {e}")))?
            .map_err(|e| {
                AllocationError::Internal(format!("reservation on host {host_id} failed: {e}"))
            })
    }

    fn fail(&self, run: &AllocationRun, err: AllocationError) -> AllocationError {
        let err = run.conclude(err);
        match &err {
            AllocationError::Internal(detail) => error!(
                allocator = %self.name,
                vm = %run.spec.vm_id,
                %detail,
                "host allocation failed with an internal error"
            ),
            other => debug!(
                allocator = %self.name,
                vm = %run.spec.vm_id,
                rounds = run.rounds,
                error = %other,
                "host allocation failed"
            ),
        }
        err
    }
}
