//! Fence protocol verification
//!
//! Replays the executor's action sequence against a model of every buffer
//! the pipeline touches. Each submission is checked against all work that
//! is still in flight (no shared buffer unless both sides only read), each
//! wait against fences nothing will signal, and each consumer against the
//! content its producer left behind.

use hologram_pipeline::executor::{Action, FenceSlot, PlanShape, Schedule, StepOp, StepPlan};
use hologram_pipeline::backend::{DescriptorSetId, FenceId, FenceStatus, KernelId};
use hologram_pipeline::memory::HostRegion;
use hologram_pipeline::{
    AccessClass, AsyncIoEngine, BufferBinding, CommandList, ComputeBackend, DataAccess, DataItem, DataSource,
    HostBackend, JobSpec, PipelineExecutor, ProgramItem, QueueRole, Result, WorkloadCompiler,
};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Res {
    Staging(usize),
    Device(usize),
    DeviceW(usize),
    StagingW(usize),
    UniqueIn,
    UniqueInDev,
    UniqueOutDev,
    UniqueOut,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Content {
    Input(usize),
    Lut,
    Output(usize),
}

type Access = (Res, bool);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

struct Model {
    count: usize,
    fences: HashMap<FenceSlot, FenceState>,
    in_flight: HashMap<FenceSlot, Vec<Access>>,
    io: Vec<Access>,
    content: HashMap<Res, Content>,
}

impl Model {
    fn new(count: usize) -> Self {
        let mut fences = HashMap::new();
        for g in 0..2 {
            fences.insert(FenceSlot::transfer(g), FenceState::Signaled);
            fences.insert(FenceSlot::compute(g), FenceState::Signaled);
        }
        Self {
            count,
            fences,
            in_flight: HashMap::new(),
            io: Vec::new(),
            content: HashMap::new(),
        }
    }

    fn check_hazards(&self, what: &str, accesses: &[Access]) -> std::result::Result<(), String> {
        let pending = self.in_flight.values().flatten().chain(self.io.iter());
        for (res, write) in pending {
            for (r, w) in accesses {
                if r == res && (*w || *write) {
                    return Err(format!("{} touches {:?} while in-flight work still uses it", what, r));
                }
            }
        }
        Ok(())
    }

    fn expect(&self, res: Res, content: Content, what: &str) -> std::result::Result<(), String> {
        match self.content.get(&res) {
            Some(c) if *c == content => Ok(()),
            other => Err(format!("{} expected {:?} in {:?}, found {:?}", what, content, res, other)),
        }
    }

    fn copy(&mut self, from: Res, to: Res) {
        if let Some(c) = self.content.get(&from).copied() {
            self.content.insert(to, c);
        }
    }

    fn submit(&mut self, fence: FenceSlot, accesses: Vec<Access>, what: &str) -> std::result::Result<(), String> {
        if self.fences[&fence] != FenceState::Unsignaled {
            return Err(format!("{} submitted with fence {:?} that was not reset", what, fence));
        }
        self.check_hazards(what, &accesses)?;
        self.fences.insert(fence, FenceState::Pending);
        self.in_flight.insert(fence, accesses);
        Ok(())
    }

    fn step(&mut self, plan: &StepPlan, actions: &[Action]) -> std::result::Result<(), String> {
        let (s, o) = (plan.slot, plan.other());
        for action in actions {
            match *action {
                Action::DrainIo => self.io.clear(),
                Action::Wait(fence) => match self.fences.get(&fence).copied().unwrap_or(FenceState::Signaled) {
                    FenceState::Signaled => {}
                    FenceState::Pending => {
                        self.fences.insert(fence, FenceState::Signaled);
                        self.in_flight.remove(&fence);
                    }
                    FenceState::Unsignaled => {
                        return Err(format!("step {} waits on {:?}, which nothing will signal", plan.step, fence))
                    }
                },
                Action::Reset(fence) => {
                    if self.fences[&fence] == FenceState::Pending {
                        return Err(format!("step {} resets in-flight {:?}", plan.step, fence));
                    }
                    self.fences.insert(fence, FenceState::Unsignaled);
                }
                Action::SubmitIo => {
                    if !self.io.is_empty() {
                        return Err(format!("step {} submits I/O with a batch outstanding", plan.step));
                    }
                    let mut accesses = Vec::new();
                    for op in &plan.ops {
                        match *op {
                            StepOp::UniqueRead => {
                                accesses.push((Res::UniqueIn, true));
                                self.content.insert(Res::UniqueIn, Content::Lut);
                            }
                            StepOp::StreamingRead { file } => {
                                accesses.push((Res::Staging(s), true));
                                self.content.insert(Res::Staging(s), Content::Input(file));
                            }
                            StepOp::StreamingWrite { file } => {
                                accesses.push((Res::StagingW(s), false));
                                self.expect(Res::StagingW(s), Content::Output(file), "streaming write")?;
                            }
                            StepOp::UniqueWrite => {
                                accesses.push((Res::UniqueOut, false));
                                if self.count > 0 {
                                    self.expect(Res::UniqueOut, Content::Output(self.count - 1), "unique write")?;
                                }
                            }
                            StepOp::Transfer { .. } | StepOp::Compute { .. } => {}
                        }
                    }
                    self.check_hazards(&format!("step {} I/O", plan.step), &accesses)?;
                    self.io = accesses;
                }
                Action::SubmitTransfer => {
                    let Some(StepOp::Transfer {
                        upload_unique,
                        download_unique,
                    }) = plan.transfer()
                    else {
                        return Err("transfer action without transfer op".into());
                    };
                    let mut accesses = vec![
                        (Res::Staging(o), false),
                        (Res::Device(o), true),
                        (Res::DeviceW(o), false),
                        (Res::StagingW(o), true),
                    ];
                    self.copy(Res::Staging(o), Res::Device(o));
                    self.copy(Res::DeviceW(o), Res::StagingW(o));
                    if upload_unique {
                        accesses.extend([(Res::UniqueIn, false), (Res::UniqueInDev, true)]);
                        self.copy(Res::UniqueIn, Res::UniqueInDev);
                    }
                    if download_unique {
                        accesses.extend([(Res::UniqueOutDev, false), (Res::UniqueOut, true)]);
                        self.copy(Res::UniqueOutDev, Res::UniqueOut);
                    }
                    self.submit(FenceSlot::transfer(s), accesses, &format!("step {} transfer", plan.step))?;
                }
                Action::SubmitCompute => {
                    let iteration = plan.compute().ok_or("compute action without compute op")?;
                    self.expect(Res::Device(s), Content::Input(iteration), "compute")?;
                    self.expect(Res::UniqueInDev, Content::Lut, "compute")?;
                    let accesses = vec![
                        (Res::Device(s), false),
                        (Res::DeviceW(s), true),
                        (Res::UniqueInDev, false),
                        (Res::UniqueOutDev, true),
                        (Res::Memory, true),
                    ];
                    self.content.insert(Res::DeviceW(s), Content::Output(iteration));
                    self.content.insert(Res::UniqueOutDev, Content::Output(iteration));
                    self.submit(FenceSlot::compute(s), accesses, &format!("step {} compute", plan.step))?;
                }
            }
        }
        Ok(())
    }
}

fn simulate(count: usize, edit: impl Fn(&StepPlan, Vec<Action>) -> Vec<Action>) -> std::result::Result<(), String> {
    let mut model = Model::new(count);
    for plan in Schedule::new(count, PlanShape::full()) {
        let actions = edit(&plan, plan.actions());
        model.step(&plan, &actions)?;
    }
    Ok(())
}

#[test]
fn test_protocol_has_no_hazards_or_deadlocks() {
    for count in 0..16 {
        if let Err(e) = simulate(count, |_, actions| actions) {
            panic!("count {}: {}", count, e);
        }
    }
}

#[test]
fn test_model_rejects_same_slot_waits_only() {
    // Waiting only on the fence about to be reused leaves generation `o`
    // transfers racing this step's I/O into the same staging buffer
    let result = simulate(4, |plan, _| {
        let s = plan.slot;
        let mut actions = vec![Action::DrainIo];
        if plan.has_io() {
            actions.push(Action::SubmitIo);
        }
        if plan.transfer().is_some() {
            actions.extend([
                Action::Wait(FenceSlot::transfer(s)),
                Action::Reset(FenceSlot::transfer(s)),
                Action::SubmitTransfer,
            ]);
        }
        if plan.compute().is_some() {
            actions.extend([
                Action::Wait(FenceSlot::compute(s)),
                Action::Reset(FenceSlot::compute(s)),
                Action::SubmitCompute,
            ]);
        }
        actions
    });
    assert!(result.is_err());
}

#[test]
fn test_model_rejects_compute_without_transfer_wait() {
    let result = simulate(4, |plan, actions| {
        let other = Action::Wait(FenceSlot::transfer(plan.other()));
        actions.into_iter().filter(|a| *a != other).collect()
    });
    assert!(result.is_err());
}

#[test]
fn test_model_catches_missing_io_drain() {
    let result = simulate(4, |_, actions| actions.into_iter().filter(|a| *a != Action::DrainIo).collect());
    assert!(result.is_err());
}

/// Backend wrapper that records every fence operation
struct Recorder {
    inner: HostBackend,
    log: Vec<(&'static str, FenceId)>,
}

impl ComputeBackend for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn alignment(&self, class: AccessClass) -> u64 {
        self.inner.alignment(class)
    }

    fn create_arena(&mut self, class: AccessClass, capacity: u64) -> Result<()> {
        self.inner.create_arena(class, capacity)
    }

    fn map_arena(&mut self, class: AccessClass) -> Result<Arc<HostRegion>> {
        self.inner.map_arena(class)
    }

    fn create_kernel(&mut self, program: &ProgramItem, binding_count: usize) -> Result<KernelId> {
        self.inner.create_kernel(program, binding_count)
    }

    fn create_descriptor_set(&mut self, bindings: &[BufferBinding]) -> Result<DescriptorSetId> {
        self.inner.create_descriptor_set(bindings)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<FenceId> {
        self.inner.create_fence(signaled)
    }

    fn submit(&mut self, role: QueueRole, lists: &[&CommandList], fence: FenceId) -> Result<()> {
        self.log.push((
            match role {
                QueueRole::Transfer => "submit-transfer",
                QueueRole::Compute => "submit-compute",
            },
            fence,
        ));
        self.inner.submit(role, lists, fence)
    }

    fn wait_fence(&mut self, fence: FenceId, timeout: Duration) -> Result<FenceStatus> {
        self.log.push(("wait", fence));
        self.inner.wait_fence(fence, timeout)
    }

    fn reset_fence(&mut self, fence: FenceId) -> Result<()> {
        self.log.push(("reset", fence));
        self.inner.reset_fence(fence)
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<()> {
        self.inner.wait_idle(timeout)
    }
}

#[test]
fn test_executor_resets_each_fence_right_before_its_submission() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    fs::create_dir(&input).unwrap();
    for k in 0..3 {
        fs::write(input.join(format!("{}.bin", k)), [k as u8; 32]).unwrap();
    }
    let kernel = dir.path().join("copy.wgsl");
    fs::write(&kernel, "").unwrap();
    let job = JobSpec::new(3)
        .with_data(DataItem::backed("in", DataSource::Directory, DataAccess::Read, &input, 32))
        .with_data(DataItem::backed("out", DataSource::Directory, DataAccess::Write, dir.path(), 32))
        .with_program(ProgramItem::new("copy", kernel, [1, 1, 1]));

    let mut backend = Recorder {
        inner: HostBackend::deferred(),
        log: Vec::new(),
    };
    let (plan, _) = WorkloadCompiler::new(&mut backend).compile(&job).unwrap();
    let report = PipelineExecutor::new(&mut backend, AsyncIoEngine::new(1).unwrap())
        .run(&plan)
        .unwrap();

    let submits: Vec<usize> = backend
        .log
        .iter()
        .enumerate()
        .filter(|(_, (op, _))| op.starts_with("submit"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(submits.len(), report.transfer_submissions + report.compute_submissions);
    for i in submits {
        let (_, fence) = backend.log[i];
        assert_eq!(backend.log[i - 1], ("reset", fence));
        assert_eq!(backend.log[i - 2], ("wait", fence));
    }
}
