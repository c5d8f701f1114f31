//! Step schedule
//!
//! The executor walks `i` from `-PIPELINE_DEPTH` to `count + 1`. For each
//! step the schedule lists the pipeline operations that fire ([`StepOp`])
//! and the exact sequence of waits, resets and submissions that carries
//! them out ([`Action`]). The executor interprets the actions verbatim, so
//! the fence protocol below is the one that runs.
//!
//! ## Fence protocol
//!
//! With `s` the step's slot and `o = s ^ 1`:
//!
//! ```text
//! DrainIo                                   previous batch (generation o)
//! Wait(T[o])           SubmitIo             if the step has I/O
//! Wait(C[o])  Wait(T[s])  Reset(T[s])  SubmitTransfer
//! Wait(T[o])  Wait(C[o])  Wait(C[s])  Reset(C[s])  SubmitCompute
//! ```
//!
//! `T[g]`/`C[g]` are the transfer/compute fences of generation `g`. The
//! transfer list of slot `s` moves generation `o` buffers, so `T[o]` guards
//! generation `s` staging and device buffers. Every fence is reset
//! immediately before the submission that signals it; a wait can therefore
//! never target a fence nothing will signal.

use crate::backend::QueueRole;
use crate::constants::PIPELINE_DEPTH;

/// Generation selected by a (shifted) step index
pub fn slot(index: i64) -> usize {
    index.rem_euclid(2) as usize
}

/// Which workload groups a plan contains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanShape {
    pub unique_reads: bool,
    pub streaming_reads: bool,
    pub streaming_writes: bool,
    pub unique_writes: bool,
}

impl PlanShape {
    /// Every workload group present
    pub fn full() -> Self {
        Self {
            unique_reads: true,
            streaming_reads: true,
            streaming_writes: true,
            unique_writes: true,
        }
    }
}

/// Pipeline operation issued by one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
    /// Load whole-file inputs
    UniqueRead,
    /// Load input file `file` into the step's generation
    StreamingRead { file: usize },
    /// Steady transfer list of the step's slot, plus the one-shot lists
    Transfer { upload_unique: bool, download_unique: bool },
    /// Kernel chain for `iteration`
    Compute { iteration: usize },
    /// Store output file `file` from the step's generation
    StreamingWrite { file: usize },
    /// Store whole-file outputs
    UniqueWrite,
}

impl StepOp {
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            StepOp::UniqueRead | StepOp::StreamingRead { .. } | StepOp::StreamingWrite { .. } | StepOp::UniqueWrite
        )
    }
}

/// Fence of one role and generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceSlot {
    pub role: QueueRole,
    pub generation: usize,
}

impl FenceSlot {
    pub fn transfer(generation: usize) -> Self {
        Self {
            role: QueueRole::Transfer,
            generation,
        }
    }

    pub fn compute(generation: usize) -> Self {
        Self {
            role: QueueRole::Compute,
            generation,
        }
    }
}

/// One primitive executor action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Block until the outstanding I/O batch completes
    DrainIo,
    Wait(FenceSlot),
    Reset(FenceSlot),
    /// Fill the slot's batch with this step's I/O ops and submit it
    SubmitIo,
    /// Submit the transfer lists under `T[slot]`
    SubmitTransfer,
    /// Submit the compute list under `C[slot]`
    SubmitCompute,
}

/// Everything one step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    /// Loop index, `-2..=count + 1`
    pub step: i64,
    pub slot: usize,
    pub ops: Vec<StepOp>,
}

impl StepPlan {
    /// Operations for loop index `step` of a `count`-iteration run
    pub fn new(step: i64, count: usize, shape: PlanShape) -> Self {
        let n = count as i64;
        let index = step + PIPELINE_DEPTH;
        let mut ops = Vec::new();

        if step == -PIPELINE_DEPTH && shape.unique_reads {
            ops.push(StepOp::UniqueRead);
        }
        // Positions past `count` would never be computed
        if shape.streaming_reads && step < n && index < n {
            ops.push(StepOp::StreamingRead { file: index as usize });
        }
        if (-1..n + 1).contains(&step) {
            ops.push(StepOp::Transfer {
                upload_unique: step == -1,
                download_unique: step == n,
            });
        }
        if (0..n).contains(&step) {
            ops.push(StepOp::Compute {
                iteration: step as usize,
            });
        }
        if shape.streaming_writes && (2..n + 2).contains(&step) {
            ops.push(StepOp::StreamingWrite {
                file: (index - 2 * PIPELINE_DEPTH) as usize,
            });
        }
        if step == n + 1 && shape.unique_writes {
            ops.push(StepOp::UniqueWrite);
        }

        Self {
            step,
            slot: slot(index),
            ops,
        }
    }

    pub fn other(&self) -> usize {
        self.slot ^ 1
    }

    pub fn has_io(&self) -> bool {
        self.ops.iter().any(StepOp::is_io)
    }

    pub fn transfer(&self) -> Option<StepOp> {
        self.ops.iter().copied().find(|op| matches!(op, StepOp::Transfer { .. }))
    }

    pub fn compute(&self) -> Option<usize> {
        self.ops.iter().find_map(|op| match op {
            StepOp::Compute { iteration } => Some(*iteration),
            _ => None,
        })
    }

    /// Waits, resets and submissions in execution order
    pub fn actions(&self) -> Vec<Action> {
        let (s, o) = (self.slot, self.other());
        let mut actions = vec![Action::DrainIo];

        if self.has_io() {
            actions.push(Action::Wait(FenceSlot::transfer(o)));
            actions.push(Action::SubmitIo);
        }
        if self.transfer().is_some() {
            actions.extend([
                Action::Wait(FenceSlot::compute(o)),
                Action::Wait(FenceSlot::transfer(s)),
                Action::Reset(FenceSlot::transfer(s)),
                Action::SubmitTransfer,
            ]);
        }
        if self.compute().is_some() {
            actions.extend([
                Action::Wait(FenceSlot::transfer(o)),
                Action::Wait(FenceSlot::compute(o)),
                Action::Wait(FenceSlot::compute(s)),
                Action::Reset(FenceSlot::compute(s)),
                Action::SubmitCompute,
            ]);
        }
        actions
    }
}

/// Iterator over every step of a run
#[derive(Debug, Clone)]
pub struct Schedule {
    next: i64,
    count: usize,
    shape: PlanShape,
}

impl Schedule {
    pub fn new(count: usize, shape: PlanShape) -> Self {
        Self {
            next: -PIPELINE_DEPTH,
            count,
            shape,
        }
    }

    /// Number of steps (`count + 4`)
    pub fn step_count(&self) -> usize {
        self.count + 2 * PIPELINE_DEPTH as usize
    }

    fn last_step(&self) -> i64 {
        self.count as i64 + PIPELINE_DEPTH - 1
    }
}

impl Iterator for Schedule {
    type Item = StepPlan;

    fn next(&mut self) -> Option<StepPlan> {
        if self.next > self.last_step() {
            return None;
        }
        let plan = StepPlan::new(self.next, self.count, self.shape);
        self.next += 1;
        Some(plan)
    }
}
