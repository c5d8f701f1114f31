//! Debug instrumentation capability
//!
//! Backends that support object naming and step labels hand out a
//! [`DebugUtils`] once at creation time. Components that want to annotate
//! their work receive it explicitly; nothing reaches for global state.

use std::fmt;
use std::sync::Arc;

use super::{DescriptorSetId, FenceId, KernelId};
use crate::memory::BufferBinding;

/// Object being named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Buffer(BufferBinding),
    Kernel(KernelId),
    DescriptorSet(DescriptorSetId),
    Fence(FenceId),
}

/// Receiver of debug annotations
pub trait DebugSink: Send + Sync {
    /// Attach a human-readable name to an object
    fn name_object(&self, object: ObjectRef, name: &str);

    /// Open a labelled region (one pipeline step, one submission)
    fn begin_region(&self, label: &str);

    /// Close the innermost region
    fn end_region(&self);
}

/// Shared handle to a [`DebugSink`]
#[derive(Clone)]
pub struct DebugUtils {
    sink: Arc<dyn DebugSink>,
}

impl DebugUtils {
    pub fn new(sink: Arc<dyn DebugSink>) -> Self {
        Self { sink }
    }

    /// Annotations emitted as `tracing` debug events
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn name_object(&self, object: ObjectRef, name: &str) {
        self.sink.name_object(object, name);
    }

    pub fn begin_region(&self, label: &str) {
        self.sink.begin_region(label);
    }

    pub fn end_region(&self) {
        self.sink.end_region();
    }
}

impl fmt::Debug for DebugUtils {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugUtils").finish_non_exhaustive()
    }
}

/// Sink that forwards annotations to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn name_object(&self, object: ObjectRef, name: &str) {
        tracing::debug!("name {:?} = {}", object, name);
    }

    fn begin_region(&self, label: &str) {
        tracing::debug!("begin {}", label);
    }

    fn end_region(&self) {
        tracing::debug!("end");
    }
}
