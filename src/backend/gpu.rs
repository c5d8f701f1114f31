//! wgpu backend
//!
//! Maps the pipeline onto a single wgpu queue:
//!
//! - device-local classes become one `wgpu::Buffer` each
//! - `CpuWrite` is plain host memory, uploaded with `Queue::write_buffer`
//! - `CpuRead` is host memory plus a `MAP_READ` readback buffer; downloads
//!   copy into the readback buffer and land in host memory when the fence
//!   of that submission is waited on
//! - kernels are WGSL compute shaders with entry point `main` and one
//!   read-write storage buffer per data item at `@group(0) @binding(i)`
//! - a fence is the submission index of its last submit
//!
//! Both queue roles share the device queue, which executes in submission
//! order; the executor's fence protocol is still followed so the host-side
//! staging memory is never touched while a submission needs it.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use super::{
    Command, CommandList, ComputeBackend, DebugUtils, DescriptorSetId, FenceId, FenceStatus, KernelId, QueueRole,
};
use crate::constants::KERNEL_ENTRY_POINT;
use crate::error::{PipelineError, Result};
use crate::job::ProgramItem;
use crate::memory::{align_up, AccessClass, BufferBinding, BufferUsage, HostRegion};

enum GpuArena {
    Device(wgpu::Buffer),
    Upload(Arc<HostRegion>),
    Download {
        host: Arc<HostRegion>,
        readback: wgpu::Buffer,
    },
}

#[derive(Default)]
struct GpuFence {
    signaled: bool,
    submission: Option<wgpu::SubmissionIndex>,
    /// `(offset, size)` ranges of the readback buffer to copy to host memory
    readbacks: Vec<(u64, u64)>,
}

struct BindingLayout {
    count: usize,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

/// GPU implementation of [`ComputeBackend`]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    arenas: Vec<Option<GpuArena>>,
    layout: Option<BindingLayout>,
    kernels: Vec<wgpu::ComputePipeline>,
    bind_groups: Vec<wgpu::BindGroup>,
    fences: Vec<GpuFence>,
    debug: Option<DebugUtils>,
}

fn backend_err(context: &str, e: impl std::fmt::Debug) -> PipelineError {
    PipelineError::Backend(format!("{}: {:?}", context, e))
}

fn wgpu_usage(class: AccessClass) -> wgpu::BufferUsages {
    let usage = class.usage();
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    out
}

impl WgpuBackend {
    /// Create a backend on the default high-performance adapter
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Backend`] if no adapter is found or the
    /// device cannot be created.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| backend_err("no compatible GPU adapter", e))?;

        let info = adapter.get_info();
        tracing::info!("wgpu adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Hologram Pipeline Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: Default::default(),
            experimental_features: Default::default(),
            trace: Default::default(),
        }))
        .map_err(|e| backend_err("device creation failed", e))?;

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            arenas: (0..AccessClass::ALL.len()).map(|_| None).collect(),
            layout: None,
            kernels: Vec::new(),
            bind_groups: Vec::new(),
            fences: Vec::new(),
            debug: None,
        })
    }

    /// Enable debug instrumentation
    pub fn with_debug(mut self, debug: DebugUtils) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn arena(&self, class: AccessClass) -> Result<&GpuArena> {
        self.arenas[class.index()]
            .as_ref()
            .ok_or_else(|| PipelineError::Backend(format!("{} arena was never created", class)))
    }

    fn device_buffer(&self, class: AccessClass) -> Result<&wgpu::Buffer> {
        match self.arena(class)? {
            GpuArena::Device(buffer) => Ok(buffer),
            _ => Err(PipelineError::Backend(format!("{} arena is not device-local", class))),
        }
    }

    fn fence_mut(&mut self, fence: FenceId) -> Result<&mut GpuFence> {
        self.fences
            .get_mut(fence.0 as usize)
            .ok_or_else(|| PipelineError::Backend(format!("unknown fence {:?}", fence)))
    }

    fn ensure_layout(&mut self, count: usize) -> Result<&BindingLayout> {
        if let Some(layout) = &self.layout {
            if layout.count != count {
                return Err(PipelineError::Backend(format!(
                    "binding layout has {} entries, {} requested",
                    layout.count, count
                )));
            }
        } else {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..count as u32)
                .map(|binding| wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("pipeline bindings"),
                entries: &entries,
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pipeline layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            self.layout = Some(BindingLayout {
                count,
                bind_group_layout,
                pipeline_layout,
            });
        }
        self.layout
            .as_ref()
            .ok_or_else(|| PipelineError::Backend("binding layout missing".to_string()))
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, list: &CommandList, readbacks: &mut Vec<(u64, u64)>) -> Result<()> {
        let mut pipeline: Option<&wgpu::ComputePipeline> = None;
        let mut bind_group: Option<&wgpu::BindGroup> = None;

        for command in list.commands() {
            match command {
                Command::Copy { src, dst, size } => {
                    let padded = align_up(*size, wgpu::COPY_BUFFER_ALIGNMENT);
                    match (self.arena(src.class)?, self.arena(dst.class)?) {
                        (GpuArena::Upload(host), GpuArena::Device(buffer)) => {
                            // SAFETY: the staging range was filled by an I/O batch
                            // that has been drained; nothing writes it until this
                            // transfer's fence is waited on
                            let bytes = unsafe { host.slice(src.offset, padded) };
                            self.queue.write_buffer(buffer, dst.offset, bytes);
                        }
                        (GpuArena::Device(buffer), GpuArena::Download { readback, .. }) => {
                            encoder.copy_buffer_to_buffer(buffer, src.offset, readback, dst.offset, padded);
                            readbacks.push((dst.offset, padded));
                        }
                        (GpuArena::Device(from), GpuArena::Device(to)) => {
                            encoder.copy_buffer_to_buffer(from, src.offset, to, dst.offset, padded);
                        }
                        _ => {
                            return Err(PipelineError::Backend(format!(
                                "unsupported copy {} -> {}",
                                src.class, dst.class
                            )))
                        }
                    }
                }
                Command::BindKernel(id) => {
                    pipeline = Some(
                        self.kernels
                            .get(id.0 as usize)
                            .ok_or_else(|| PipelineError::Backend(format!("unknown kernel {:?}", id)))?,
                    );
                }
                Command::BindDescriptorSet(id) => {
                    bind_group = Some(
                        self.bind_groups
                            .get(id.0 as usize)
                            .ok_or_else(|| PipelineError::Backend(format!("unknown descriptor set {:?}", id)))?,
                    );
                }
                Command::Dispatch([x, y, z]) => {
                    let (Some(pipeline), Some(bind_group)) = (pipeline, bind_group) else {
                        return Err(PipelineError::Backend(format!(
                            "{}: dispatch without kernel or descriptor set",
                            list.label()
                        )));
                    };
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(list.label()),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.dispatch_workgroups(*x, *y, *z);
                }
                // Each dispatch gets its own pass; wgpu orders storage access between passes
                Command::Barrier => {}
            }
        }
        Ok(())
    }

    fn poll(&self, submission: Option<wgpu::SubmissionIndex>, timeout: Duration) -> Result<FenceStatus> {
        match self.device.poll(wgpu::PollType::Wait {
            submission_index: submission,
            timeout: Some(timeout),
        }) {
            Ok(_) => Ok(FenceStatus::Signaled),
            Err(wgpu::PollError::Timeout) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(backend_err("device poll failed", e)),
        }
    }

    fn resolve_readbacks(&self, readbacks: &[(u64, u64)], timeout: Duration) -> Result<()> {
        if readbacks.is_empty() {
            return Ok(());
        }
        let GpuArena::Download { host, readback } = self.arena(AccessClass::CpuRead)? else {
            return Err(PipelineError::Backend("cpu-read arena has no readback buffer".to_string()));
        };

        for &(offset, size) in readbacks {
            let slice = readback.slice(offset..offset + size);
            let (sender, receiver) = std::sync::mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
            if self.poll(None, timeout)? == FenceStatus::TimedOut {
                return Err(PipelineError::Timeout {
                    what: "readback mapping".to_string(),
                    waited: timeout,
                });
            }
            receiver
                .recv()
                .map_err(|e| backend_err("mapping callback dropped", e))?
                .map_err(|e| backend_err("buffer mapping failed", e))?;

            {
                let mapped = slice.get_mapped_range();
                // SAFETY: the executor does not hand this range to I/O until
                // the fence covering the download has been waited on
                unsafe { host.slice_mut(offset, size) }.copy_from_slice(&mapped);
            }
            readback.unmap();
        }
        Ok(())
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn alignment(&self, _class: AccessClass) -> u64 {
        (self.device.limits().min_storage_buffer_offset_alignment as u64).max(wgpu::COPY_BUFFER_ALIGNMENT)
    }

    fn create_arena(&mut self, class: AccessClass, capacity: u64) -> Result<()> {
        if self.arenas[class.index()].is_some() {
            return Err(PipelineError::Backend(format!("{} arena already exists", class)));
        }
        let capacity = align_up(capacity, wgpu::COPY_BUFFER_ALIGNMENT);
        let label = format!("{} arena", class);

        let arena = match class {
            AccessClass::CpuWrite => GpuArena::Upload(HostRegion::new(capacity)?),
            AccessClass::CpuRead => GpuArena::Download {
                host: HostRegion::new(capacity)?,
                readback: self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&label),
                    size: capacity,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
            },
            _ => GpuArena::Device(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: capacity,
                usage: wgpu_usage(class),
                mapped_at_creation: false,
            })),
        };
        self.arenas[class.index()] = Some(arena);
        tracing::debug!("wgpu: created {} ({} bytes)", label, capacity);
        Ok(())
    }

    fn map_arena(&mut self, class: AccessClass) -> Result<Arc<HostRegion>> {
        match self.arena(class)? {
            GpuArena::Upload(host) | GpuArena::Download { host, .. } => Ok(Arc::clone(host)),
            GpuArena::Device(_) => Err(PipelineError::Backend(format!("{} arena is device-local", class))),
        }
    }

    fn create_kernel(&mut self, program: &ProgramItem, binding_count: usize) -> Result<KernelId> {
        let source = std::fs::read_to_string(&program.path).map_err(|source| PipelineError::Io {
            path: program.path.clone(),
            source,
        })?;

        self.ensure_layout(binding_count)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&program.name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| PipelineError::Backend("binding layout missing".to_string()))?;
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&program.name),
            layout: Some(&layout.pipeline_layout),
            module: &module,
            entry_point: Some(KERNEL_ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(PipelineError::Backend(format!(
                "kernel {} ({}) failed to compile: {}",
                program.name,
                program.path.display(),
                error
            )));
        }

        let id = KernelId(self.kernels.len() as u32);
        self.kernels.push(pipeline);
        tracing::debug!("wgpu: compiled kernel {}", program.name);
        Ok(id)
    }

    fn create_descriptor_set(&mut self, bindings: &[BufferBinding]) -> Result<DescriptorSetId> {
        self.ensure_layout(bindings.len())?;

        let mut entries = Vec::with_capacity(bindings.len());
        for (i, binding) in bindings.iter().enumerate() {
            let buffer = self.device_buffer(binding.class)?;
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: binding.offset,
                    size: NonZeroU64::new(align_up(binding.size, 4)),
                }),
            });
        }

        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| PipelineError::Backend("binding layout missing".to_string()))?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pipeline bind group"),
            layout: &layout.bind_group_layout,
            entries: &entries,
        });

        let id = DescriptorSetId(self.bind_groups.len() as u32);
        self.bind_groups.push(bind_group);
        Ok(id)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<FenceId> {
        let id = FenceId(self.fences.len() as u32);
        self.fences.push(GpuFence {
            signaled,
            ..Default::default()
        });
        Ok(id)
    }

    fn submit(&mut self, role: QueueRole, lists: &[&CommandList], fence: FenceId) -> Result<()> {
        {
            let state = self.fence_mut(fence)?;
            if state.signaled || state.submission.is_some() {
                return Err(PipelineError::Backend(format!(
                    "{:?} submission with fence {:?} that was not reset",
                    role, fence
                )));
            }
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(match role {
                QueueRole::Transfer => "transfer",
                QueueRole::Compute => "compute",
            }),
        });
        let mut readbacks = Vec::new();
        for list in lists {
            if let Some(debug) = &self.debug {
                debug.begin_region(list.label());
            }
            self.encode(&mut encoder, list, &mut readbacks)?;
            if let Some(debug) = &self.debug {
                debug.end_region();
            }
        }

        let index = self.queue.submit(Some(encoder.finish()));
        let state = self.fence_mut(fence)?;
        state.submission = Some(index);
        state.readbacks = readbacks;
        Ok(())
    }

    fn wait_fence(&mut self, fence: FenceId, timeout: Duration) -> Result<FenceStatus> {
        let (signaled, submission) = {
            let state = self.fence_mut(fence)?;
            (state.signaled, state.submission.clone())
        };
        if signaled {
            return Ok(FenceStatus::Signaled);
        }
        let Some(submission) = submission else {
            return Ok(FenceStatus::TimedOut);
        };

        if self.poll(Some(submission), timeout)? == FenceStatus::TimedOut {
            return Ok(FenceStatus::TimedOut);
        }

        let readbacks = std::mem::take(&mut self.fence_mut(fence)?.readbacks);
        self.resolve_readbacks(&readbacks, timeout)?;

        let state = self.fence_mut(fence)?;
        state.signaled = true;
        state.submission = None;
        Ok(FenceStatus::Signaled)
    }

    fn reset_fence(&mut self, fence: FenceId) -> Result<()> {
        let state = self.fence_mut(fence)?;
        if state.submission.is_some() {
            return Err(PipelineError::Backend(format!("reset of in-flight fence {:?}", fence)));
        }
        state.signaled = false;
        Ok(())
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<()> {
        for id in 0..self.fences.len() {
            let fence = FenceId(id as u32);
            if self.wait_fence(fence, timeout)? == FenceStatus::TimedOut && self.fences[id].submission.is_some() {
                return Err(PipelineError::Timeout {
                    what: format!("device idle ({:?})", fence),
                    waited: timeout,
                });
            }
        }
        Ok(())
    }

    fn debug_utils(&self) -> Option<DebugUtils> {
        self.debug.clone()
    }
}
