//! Pipeline executor
//!
//! Drives an [`ExecutionPlan`] through `iterations + 4` steps on a single
//! control thread. File I/O, transfers and compute of different generations
//! overlap; the only thing keeping them apart is the fence protocol
//! documented in [`schedule`].
//!
//! ```text
//! step   -2   -1    0    1   ..  n-1    n   n+1
//! read    R0   R1   R2   R3       ..
//! xfer         T    T    T   ..   T     T
//! comp              C0   C1  ..  Cn-1
//! write                       W0 ..   Wn-2  Wn-1
//! ```

mod schedule;
mod stats;

pub use schedule::{slot, Action, FenceSlot, PlanShape, Schedule, StepOp, StepPlan};
pub use stats::LatencyStats;

use std::time::{Duration, Instant};

use crate::backend::{CommandList, ComputeBackend, DebugUtils, FenceId, FenceStatus, ObjectRef, QueueRole};
use crate::compiler::{ExecutionPlan, IoWorkload, WorkloadKind};
use crate::constants::{DEFAULT_FENCE_TIMEOUT, LATENCY_PREALLOC_LIMIT};
use crate::error::{PipelineError, Result};
use crate::io::{AsyncIoEngine, IoBatch, IoCompletion, IoOp};
use crate::memory::MemoryPoolAllocator;

impl PlanShape {
    /// Workload groups present in `plan`
    pub fn of(plan: &ExecutionPlan) -> Self {
        let has = |kind: WorkloadKind, op: IoOp| plan.workloads().any(|w| w.kind == kind && w.op == op);
        Self {
            unique_reads: has(WorkloadKind::Unique, IoOp::Read),
            streaming_reads: has(WorkloadKind::Streaming, IoOp::Read),
            streaming_writes: has(WorkloadKind::Streaming, IoOp::Write),
            unique_writes: has(WorkloadKind::Unique, IoOp::Write),
        }
    }
}

/// File traffic of a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoTotals {
    /// Batches submitted to the engine
    pub batches: usize,
    /// Commands executed
    pub commands: usize,
    /// Commands never queued (open failure or full batch)
    pub rejected: usize,
    /// Commands that failed while reading or writing
    pub failures: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl IoTotals {
    fn absorb(&mut self, completion: IoCompletion) {
        self.commands += completion.commands;
        self.failures += completion.failures;
        self.bytes_read += completion.bytes_read;
        self.bytes_written += completion.bytes_written;
    }
}

/// Outcome of [`PipelineExecutor::run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    pub backend: String,
    pub steps: usize,
    pub iterations: usize,
    pub requested_iterations: usize,
    /// Wall clock from the first step to the terminal drain
    pub elapsed: Duration,
    /// One sample per step
    pub latency: LatencyStats,
    pub io: IoTotals,
    pub transfer_submissions: usize,
    pub compute_submissions: usize,
}

struct Fences {
    transfer: [FenceId; 2],
    compute: [FenceId; 2],
}

impl Fences {
    fn get(&self, fence: FenceSlot) -> FenceId {
        match fence.role {
            QueueRole::Transfer => self.transfer[fence.generation],
            QueueRole::Compute => self.compute[fence.generation],
        }
    }

    fn all(&self) -> [FenceSlot; 4] {
        [
            FenceSlot::transfer(0),
            FenceSlot::transfer(1),
            FenceSlot::compute(0),
            FenceSlot::compute(1),
        ]
    }
}

/// Runs compiled plans on a backend
pub struct PipelineExecutor<'a> {
    backend: &'a mut dyn ComputeBackend,
    io: AsyncIoEngine,
    fence_timeout: Duration,
    debug: Option<DebugUtils>,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(backend: &'a mut dyn ComputeBackend, io: AsyncIoEngine) -> Self {
        Self {
            backend,
            io,
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
            debug: None,
        }
    }

    /// Bound on every fence wait
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Label steps and fences through `debug`
    pub fn with_debug(mut self, debug: Option<DebugUtils>) -> Self {
        self.debug = debug;
        self
    }

    /// Run every step of `plan`, then wait until all queues and the I/O engine are idle
    pub fn run(&mut self, plan: &ExecutionPlan) -> Result<RunReport> {
        let schedule = Schedule::new(plan.iterations, PlanShape::of(plan));
        let steps = schedule.step_count();
        let fences = self.create_fences()?;
        let mut batches = [self.io.allocate_batch(), self.io.allocate_batch()];

        let mut report = RunReport {
            backend: self.backend.name().to_string(),
            steps,
            iterations: plan.iterations,
            requested_iterations: plan.requested_iterations,
            elapsed: Duration::ZERO,
            latency: LatencyStats::with_capacity(steps.min(LATENCY_PREALLOC_LIMIT)),
            io: IoTotals::default(),
            transfer_submissions: 0,
            compute_submissions: 0,
        };

        tracing::info!(
            "Running {} iteration(s) in {} steps on the {} backend",
            plan.iterations,
            steps,
            report.backend
        );

        let started = Instant::now();
        for step in schedule {
            let step_started = Instant::now();
            if let Some(debug) = &self.debug {
                debug.begin_region(&format!("step {}", step.step));
            }
            tracing::debug!("step {} slot {}: {:?}", step.step, step.slot, step.ops);

            for action in step.actions() {
                match action {
                    Action::DrainIo => report.io.absorb(self.io.wait_idle()?),
                    Action::Wait(fence) => self.wait(&fences, fence)?,
                    Action::Reset(fence) => self.backend.reset_fence(fences.get(fence))?,
                    Action::SubmitIo => {
                        let batch = &mut batches[step.slot];
                        fill_batch(plan, &step, batch)?;
                        report.io.rejected += batch.rejected();
                        if !batch.is_empty() {
                            if !self.io.submit(batch) {
                                return Err(PipelineError::IoEngine(format!(
                                    "step {}: I/O batch rejected, previous batch still outstanding",
                                    step.step
                                )));
                            }
                            report.io.batches += 1;
                        }
                    }
                    Action::SubmitTransfer => {
                        let lists = transfer_lists(plan, &step);
                        self.backend
                            .submit(QueueRole::Transfer, &lists, fences.transfer[step.slot])?;
                        report.transfer_submissions += 1;
                    }
                    Action::SubmitCompute => {
                        self.backend
                            .submit(QueueRole::Compute, &[&plan.compute[step.slot]], fences.compute[step.slot])?;
                        report.compute_submissions += 1;
                    }
                }
            }

            report.latency.record(step_started.elapsed());
            if let Some(debug) = &self.debug {
                debug.end_region();
            }
        }

        for fence in fences.all() {
            self.wait(&fences, fence)?;
        }
        self.backend.wait_idle(self.fence_timeout)?;
        report.io.absorb(self.io.wait_idle()?);
        drop(batches);

        report.elapsed = started.elapsed();
        tracing::info!(
            "Finished {} step(s) in {:?}; {} I/O command(s), {} rejected, {} failed",
            report.steps,
            report.elapsed,
            report.io.commands,
            report.io.rejected,
            report.io.failures
        );
        Ok(report)
    }

    fn create_fences(&mut self) -> Result<Fences> {
        let fences = Fences {
            transfer: [self.backend.create_fence(true)?, self.backend.create_fence(true)?],
            compute: [self.backend.create_fence(true)?, self.backend.create_fence(true)?],
        };
        if let Some(debug) = &self.debug {
            for fence in fences.all() {
                debug.name_object(
                    ObjectRef::Fence(fences.get(fence)),
                    &format!("{}[{}]", fence.role, fence.generation),
                );
            }
        }
        Ok(fences)
    }

    fn wait(&mut self, fences: &Fences, fence: FenceSlot) -> Result<()> {
        match self.backend.wait_fence(fences.get(fence), self.fence_timeout)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::TimedOut => Err(PipelineError::Timeout {
                what: format!("{} fence of generation {}", fence.role, fence.generation),
                waited: self.fence_timeout,
            }),
        }
    }
}

/// Steady list of the step's slot plus whichever one-shot list is due
fn transfer_lists<'p>(plan: &'p ExecutionPlan, step: &StepPlan) -> Vec<&'p CommandList> {
    let mut lists = vec![&plan.transfer_steady[step.slot]];
    if let Some(StepOp::Transfer {
        upload_unique,
        download_unique,
    }) = step.transfer()
    {
        if upload_unique && !plan.transfer_unique[0].is_empty() {
            lists.push(&plan.transfer_unique[0]);
        }
        if download_unique && !plan.transfer_unique[1].is_empty() {
            lists.push(&plan.transfer_unique[1]);
        }
    }
    lists
}

/// Record the step's I/O ops into `batch`
fn fill_batch(plan: &ExecutionPlan, step: &StepPlan, batch: &mut IoBatch) -> Result<()> {
    batch.begin();
    for op in &step.ops {
        let (workloads, op_kind, file) = match *op {
            StepOp::UniqueRead => (&plan.unique_workloads, IoOp::Read, 0),
            StepOp::StreamingRead { file } => (&plan.streaming_workloads, IoOp::Read, file),
            StepOp::StreamingWrite { file } => (&plan.streaming_workloads, IoOp::Write, file),
            StepOp::UniqueWrite => (&plan.unique_workloads, IoOp::Write, 0),
            StepOp::Transfer { .. } | StepOp::Compute { .. } => continue,
        };
        for workload in workloads.iter().filter(|w| w.op == op_kind) {
            add_command(&plan.memory, batch, workload, step.slot, file)?;
        }
    }
    Ok(())
}

fn add_command(
    memory: &MemoryPoolAllocator,
    batch: &mut IoBatch,
    workload: &IoWorkload,
    generation: usize,
    file: usize,
) -> Result<()> {
    let Some(path) = workload.file(file) else {
        tracing::warn!("{}: no file at position {}", workload.name, file);
        return Ok(());
    };
    let span = memory.host_span(&workload.staging[generation])?;
    let added = match workload.op {
        IoOp::Read => batch.add_read(span, &path, workload.size, 0),
        IoOp::Write => batch.add_write(span, &path, workload.size, 0),
    };
    if added.is_ok() {
        tracing::trace!("{:?} {} ({} bytes) gen {}", workload.op, path.display(), workload.size, generation);
    }
    Ok(())
}
