//! Host reference backend
//!
//! Runs command lists on the CPU against host memory. Every arena, device
//! classes included, is a [`HostRegion`]; only host-visible classes are
//! handed out through [`map_arena`](ComputeBackend::map_arena).
//!
//! In [`ExecutionMode::Deferred`] submissions are queued and only executed
//! when their fence (or the whole device) is waited on. That is the latest
//! point a real device may finish the work, so any wait the executor forgets
//! shows up as stale data instead of passing by luck.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::kernels::{KernelArgs, KernelFn, KernelRegistry};
use super::{
    Command, CommandList, ComputeBackend, DebugUtils, DescriptorSetId, FenceId, FenceStatus, KernelId, QueueRole,
};
use crate::constants::HOST_ALIGNMENT;
use crate::error::{PipelineError, Result};
use crate::job::ProgramItem;
use crate::memory::{AccessClass, BufferBinding, HostRegion};

/// When submitted work runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Execute during `submit`
    #[default]
    Immediate,
    /// Execute when a fence or the device is waited on
    Deferred,
}

#[derive(Debug, Clone, Copy, Default)]
struct FenceState {
    signaled: bool,
    in_flight: bool,
}

struct Submission {
    lists: Vec<CommandList>,
    fence: FenceId,
}

struct HostKernel {
    name: String,
    entry: KernelFn,
}

/// CPU implementation of [`ComputeBackend`]
pub struct HostBackend {
    mode: ExecutionMode,
    registry: KernelRegistry,
    arenas: Vec<Option<Arc<HostRegion>>>,
    kernels: Vec<HostKernel>,
    descriptor_sets: Vec<Vec<BufferBinding>>,
    fences: Vec<FenceState>,
    transfer_queue: VecDeque<Submission>,
    compute_queue: VecDeque<Submission>,
    submissions: [usize; 2],
    debug: Option<DebugUtils>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// Immediate-mode backend with the built-in kernels
    pub fn new() -> Self {
        Self {
            mode: ExecutionMode::Immediate,
            registry: KernelRegistry::new(),
            arenas: vec![None; AccessClass::ALL.len()],
            kernels: Vec::new(),
            descriptor_sets: Vec::new(),
            fences: Vec::new(),
            transfer_queue: VecDeque::new(),
            compute_queue: VecDeque::new(),
            submissions: [0; 2],
            debug: None,
        }
    }

    /// Deferred-mode backend with the built-in kernels
    pub fn deferred() -> Self {
        Self::new().with_mode(ExecutionMode::Deferred)
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_registry(mut self, registry: KernelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Enable debug instrumentation
    pub fn with_debug(mut self, debug: DebugUtils) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn registry_mut(&mut self) -> &mut KernelRegistry {
        &mut self.registry
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Number of submissions made on `role`
    pub fn submission_count(&self, role: QueueRole) -> usize {
        self.submissions[role_index(role)]
    }

    /// Raw arena memory, device classes included (for inspection in tests)
    pub fn arena_region(&self, class: AccessClass) -> Option<Arc<HostRegion>> {
        self.arenas[class.index()].clone()
    }

    fn fence_mut(&mut self, fence: FenceId) -> Result<&mut FenceState> {
        self.fences
            .get_mut(fence.0 as usize)
            .ok_or_else(|| PipelineError::Backend(format!("unknown fence {:?}", fence)))
    }

    fn queue_mut(&mut self, role: QueueRole) -> &mut VecDeque<Submission> {
        match role {
            QueueRole::Transfer => &mut self.transfer_queue,
            QueueRole::Compute => &mut self.compute_queue,
        }
    }

    fn region(&self, binding: &BufferBinding) -> Result<&Arc<HostRegion>> {
        let region = self.arenas[binding.class.index()]
            .as_ref()
            .ok_or_else(|| PipelineError::Backend(format!("{} arena was never created", binding.class)))?;
        if binding.end() > region.len() as u64 {
            return Err(PipelineError::Backend(format!(
                "binding {}+{}..{} outside arena of {} bytes",
                binding.class,
                binding.offset,
                binding.end(),
                region.len()
            )));
        }
        Ok(region)
    }

    /// Run queued submissions of `role` until `fence` has signaled
    fn drain_until(&mut self, role: QueueRole, fence: Option<FenceId>) -> Result<()> {
        while let Some(submission) = self.queue_mut(role).pop_front() {
            self.execute(&submission)?;
            if Some(submission.fence) == fence {
                break;
            }
        }
        Ok(())
    }

    fn execute(&mut self, submission: &Submission) -> Result<()> {
        for list in &submission.lists {
            if let Some(debug) = &self.debug {
                debug.begin_region(list.label());
            }
            self.execute_list(list)?;
            if let Some(debug) = &self.debug {
                debug.end_region();
            }
        }
        let state = self.fence_mut(submission.fence)?;
        state.signaled = true;
        state.in_flight = false;
        Ok(())
    }

    fn execute_list(&self, list: &CommandList) -> Result<()> {
        let mut kernel: Option<&HostKernel> = None;
        let mut set: Option<&[BufferBinding]> = None;

        for command in list.commands() {
            match command {
                Command::Copy { src, dst, size } => self.copy(src, dst, *size)?,
                Command::BindKernel(id) => {
                    kernel = Some(
                        self.kernels
                            .get(id.0 as usize)
                            .ok_or_else(|| PipelineError::Backend(format!("unknown kernel {:?}", id)))?,
                    );
                }
                Command::BindDescriptorSet(id) => {
                    set = Some(
                        self.descriptor_sets
                            .get(id.0 as usize)
                            .ok_or_else(|| PipelineError::Backend(format!("unknown descriptor set {:?}", id)))?,
                    );
                }
                Command::Dispatch(extent) => {
                    let kernel = kernel
                        .ok_or_else(|| PipelineError::Backend(format!("{}: dispatch without kernel", list.label())))?;
                    let set = set.ok_or_else(|| {
                        PipelineError::Backend(format!("{}: dispatch without descriptor set", list.label()))
                    })?;
                    self.dispatch(kernel, set, *extent)?;
                }
                // Commands run in order on one thread
                Command::Barrier => {}
            }
        }
        Ok(())
    }

    fn copy(&self, src: &BufferBinding, dst: &BufferBinding, size: u64) -> Result<()> {
        if size > src.size || size > dst.size {
            return Err(PipelineError::Backend(format!(
                "copy of {} bytes exceeds source ({}) or destination ({})",
                size, src.size, dst.size
            )));
        }
        let src_region = self.region(src)?;
        let dst_region = self.region(dst)?;
        let src_range = BufferBinding::new(src.class, src.offset, size);
        let dst_range = BufferBinding::new(dst.class, dst.offset, size);
        if src_range.overlaps(&dst_range) {
            return Err(PipelineError::Backend("overlapping copy".to_string()));
        }

        // SAFETY: ranges are disjoint and the fence protocol keeps I/O and
        // other queues away from them while this submission runs
        unsafe {
            let from = src_region.slice(src.offset, size);
            let to = dst_region.slice_mut(dst.offset, size);
            to.copy_from_slice(from);
        }
        tracing::trace!("copy {} bytes {}+{} -> {}+{}", size, src.class, src.offset, dst.class, dst.offset);
        Ok(())
    }

    fn dispatch(&self, kernel: &HostKernel, set: &[BufferBinding], extent: [u32; 3]) -> Result<()> {
        for (i, a) in set.iter().enumerate() {
            if set[i + 1..].iter().any(|b| a.overlaps(b)) {
                return Err(PipelineError::Backend(format!(
                    "{}: descriptor bindings alias at index {}",
                    kernel.name, i
                )));
            }
        }

        let mut buffers = Vec::with_capacity(set.len());
        for binding in set {
            let region = self.region(binding)?;
            // SAFETY: bindings are pairwise disjoint (checked above) and owned
            // by this submission under the fence protocol
            buffers.push(unsafe { region.slice_mut(binding.offset, binding.size) });
        }

        let mut args = KernelArgs {
            buffers,
            dispatch: extent,
        };
        (kernel.entry)(&mut args).map_err(|e| PipelineError::Backend(format!("kernel {} failed: {}", kernel.name, e)))
    }
}

fn role_index(role: QueueRole) -> usize {
    match role {
        QueueRole::Transfer => 0,
        QueueRole::Compute => 1,
    }
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn alignment(&self, _class: AccessClass) -> u64 {
        HOST_ALIGNMENT
    }

    fn create_arena(&mut self, class: AccessClass, capacity: u64) -> Result<()> {
        let slot = &mut self.arenas[class.index()];
        if slot.is_some() {
            return Err(PipelineError::Backend(format!("{} arena already exists", class)));
        }
        *slot = Some(HostRegion::new(capacity)?);
        tracing::debug!("host: created {} arena ({} bytes)", class, capacity);
        Ok(())
    }

    fn map_arena(&mut self, class: AccessClass) -> Result<Arc<HostRegion>> {
        if !class.is_host_visible() {
            return Err(PipelineError::Backend(format!("{} arena is device-local", class)));
        }
        self.arenas[class.index()]
            .clone()
            .ok_or_else(|| PipelineError::Backend(format!("{} arena was never created", class)))
    }

    fn create_kernel(&mut self, program: &ProgramItem, binding_count: usize) -> Result<KernelId> {
        let stem = Path::new(&program.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let entry = self.registry.get(stem).ok_or_else(|| {
            PipelineError::Backend(format!(
                "no host kernel named '{}' for program {} (available: {})",
                stem,
                program.name,
                self.registry.names().join(", ")
            ))
        })?;

        let id = KernelId(self.kernels.len() as u32);
        self.kernels.push(HostKernel {
            name: program.name.clone(),
            entry,
        });
        tracing::debug!("host: kernel {} -> {} ({} bindings)", program.name, stem, binding_count);
        Ok(id)
    }

    fn create_descriptor_set(&mut self, bindings: &[BufferBinding]) -> Result<DescriptorSetId> {
        for binding in bindings {
            self.region(binding)?;
        }
        let id = DescriptorSetId(self.descriptor_sets.len() as u32);
        self.descriptor_sets.push(bindings.to_vec());
        Ok(id)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<FenceId> {
        let id = FenceId(self.fences.len() as u32);
        self.fences.push(FenceState {
            signaled,
            in_flight: false,
        });
        Ok(id)
    }

    fn submit(&mut self, role: QueueRole, lists: &[&CommandList], fence: FenceId) -> Result<()> {
        let state = self.fence_mut(fence)?;
        if state.signaled || state.in_flight {
            return Err(PipelineError::Backend(format!(
                "{:?} submission with fence {:?} that was not reset",
                role, fence
            )));
        }
        state.in_flight = true;
        self.submissions[role_index(role)] += 1;

        let submission = Submission {
            lists: lists.iter().map(|&l| l.clone()).collect(),
            fence,
        };
        match self.mode {
            ExecutionMode::Immediate => self.execute(&submission),
            ExecutionMode::Deferred => {
                self.queue_mut(role).push_back(submission);
                Ok(())
            }
        }
    }

    fn wait_fence(&mut self, fence: FenceId, _timeout: Duration) -> Result<FenceStatus> {
        let state = *self.fence_mut(fence)?;
        if state.signaled {
            return Ok(FenceStatus::Signaled);
        }
        if !state.in_flight {
            // Nothing will ever signal it
            return Ok(FenceStatus::TimedOut);
        }

        for role in [QueueRole::Transfer, QueueRole::Compute] {
            if self.queue_mut(role).iter().any(|s| s.fence == fence) {
                self.drain_until(role, Some(fence))?;
            }
        }
        Ok(if self.fence_mut(fence)?.signaled {
            FenceStatus::Signaled
        } else {
            FenceStatus::TimedOut
        })
    }

    fn reset_fence(&mut self, fence: FenceId) -> Result<()> {
        let state = self.fence_mut(fence)?;
        if state.in_flight {
            return Err(PipelineError::Backend(format!("reset of in-flight fence {:?}", fence)));
        }
        state.signaled = false;
        Ok(())
    }

    fn wait_idle(&mut self, _timeout: Duration) -> Result<()> {
        self.drain_until(QueueRole::Transfer, None)?;
        self.drain_until(QueueRole::Compute, None)
    }

    fn debug_utils(&self) -> Option<DebugUtils> {
        self.debug.clone()
    }
}
