//! Compute backend interface
//!
//! The pipeline never talks to a device directly. The compiler records
//! [`CommandList`]s and the executor submits them to a [`ComputeBackend`]
//! on one of two queue roles, then synchronises through fences.
//!
//! ```text
//! ┌────────────────────┐     CommandList      ┌──────────────────────────┐
//! │  WorkloadCompiler  │ ───────────────────► │                          │
//! └────────────────────┘                      │      ComputeBackend      │
//! ┌────────────────────┐  submit / wait_fence │  ┌──────────┐┌─────────┐ │
//! │  PipelineExecutor  │ ───────────────────► │  │ Transfer ││ Compute │ │
//! └────────────────────┘                      │  └──────────┘└─────────┘ │
//!                                             └────────────┬─────────────┘
//!                                   ┌──────────────────────┴───────┐
//!                                   ▼                              ▼
//!                            ┌─────────────┐               ┌─────────────┐
//!                            │ HostBackend │               │ WgpuBackend │
//!                            └─────────────┘               └─────────────┘
//! ```

mod debug;
mod host;
mod kernels;
#[cfg(feature = "wgpu")]
mod gpu;

pub use debug::{DebugSink, DebugUtils, ObjectRef, TracingSink};
pub use host::{ExecutionMode, HostBackend};
pub use kernels::{KernelArgs, KernelFn, KernelRegistry};
#[cfg(feature = "wgpu")]
pub use gpu::WgpuBackend;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::job::ProgramItem;
use crate::memory::{AccessClass, BufferBinding, HostRegion};

/// Kernel handle returned by [`ComputeBackend::create_kernel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

/// Descriptor-set handle returned by [`ComputeBackend::create_descriptor_set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetId(pub u32);

/// Fence handle returned by [`ComputeBackend::create_fence`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(pub u32);

/// Independent execution queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Transfer,
    Compute,
}

/// Outcome of a bounded fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// One recorded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Copy `size` bytes between arenas (upload or download)
    Copy {
        src: BufferBinding,
        dst: BufferBinding,
        size: u64,
    },
    /// Make a kernel current
    BindKernel(KernelId),
    /// Make a descriptor set current
    BindDescriptorSet(DescriptorSetId),
    /// Launch the current kernel
    Dispatch([u32; 3]),
    /// Shader writes become visible to later shader reads
    Barrier,
}

/// Recorded command sequence, submitted as a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    label: String,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Every buffer range the list copies from or to
    pub fn copies(&self) -> impl Iterator<Item = (&BufferBinding, &BufferBinding)> {
        self.commands.iter().filter_map(|c| match c {
            Command::Copy { src, dst, .. } => Some((src, dst)),
            _ => None,
        })
    }
}

/// Device abstraction used by the compiler and executor
///
/// Arenas are identified by their [`AccessClass`]; a backend holds at most
/// one arena per class. Fences start either signaled or unsignaled, become
/// signaled when the submission that carries them completes, and only
/// [`reset_fence`](ComputeBackend::reset_fence) unsignals them.
pub trait ComputeBackend {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Offset alignment required for buffers of `class`
    fn alignment(&self, class: AccessClass) -> u64;

    /// Create the arena for `class`
    fn create_arena(&mut self, class: AccessClass, capacity: u64) -> Result<()>;

    /// Map a host-visible arena; called once right after creation
    fn map_arena(&mut self, class: AccessClass) -> Result<Arc<HostRegion>>;

    /// Load a kernel whose descriptor set has `binding_count` bindings
    fn create_kernel(&mut self, program: &ProgramItem, binding_count: usize) -> Result<KernelId>;

    /// Bind `bindings[i]` at binding index `i`
    fn create_descriptor_set(&mut self, bindings: &[BufferBinding]) -> Result<DescriptorSetId>;

    fn create_fence(&mut self, signaled: bool) -> Result<FenceId>;

    /// Queue `lists` in order on `role`; `fence` signals when all complete
    fn submit(&mut self, role: QueueRole, lists: &[&CommandList], fence: FenceId) -> Result<()>;

    /// Block until `fence` signals or `timeout` expires
    fn wait_fence(&mut self, fence: FenceId, timeout: Duration) -> Result<FenceStatus>;

    fn reset_fence(&mut self, fence: FenceId) -> Result<()>;

    /// Block until both queues are idle
    fn wait_idle(&mut self, timeout: Duration) -> Result<()>;

    /// Debug instrumentation, if the backend was created with it
    fn debug_utils(&self) -> Option<DebugUtils> {
        None
    }
}
