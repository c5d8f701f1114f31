//! Workload compiler
//!
//! Turns a [`JobSpec`] into an [`ExecutionPlan`]: arenas and buffers, I/O
//! workloads, descriptor sets and the recorded command lists for both
//! buffer generations.
//!
//! ## Per-item layout
//!
//! | source    | access | buffers                        | I/O workload          | transfer                    |
//! |-----------|--------|--------------------------------|-----------------------|-----------------------------|
//! | memory    | -      | 1 × GpuReadWrite               | none                  | none                        |
//! | file      | read   | 1 × CpuWrite + 1 × GpuRead     | unique, CpuWrite      | one-shot upload             |
//! | file      | write  | 1 × CpuRead + 1 × GpuWrite     | unique, CpuRead       | one-shot download           |
//! | directory | read   | 2 × CpuWrite + 2 × GpuRead     | streaming, dir scan   | upload per generation       |
//! | directory | write  | 2 × CpuRead + 2 × GpuWrite     | streaming, generated  | download per generation     |
//!
//! ## Generations
//!
//! The steady transfer list of generation `g` moves the buffers of
//! generation `g ^ 1`: it runs one step after the I/O that filled (or one
//! step before the I/O that drains) that generation's staging buffer, while
//! compute of the same step works on generation `g`.

mod workload;

pub use workload::{format_output_name, FileList, IoWorkload, WorkloadKind};

use crate::backend::{
    Command, CommandList, ComputeBackend, DebugUtils, DescriptorSetId, KernelId, ObjectRef,
};
use crate::constants::{DEFAULT_OUTPUT_PATTERN, DISPATCH_WARNING_THRESHOLD, GENERATIONS};
use crate::error::{ConfigIssue, PipelineError, Result};
use crate::io::{sorted_files, IoOp};
use crate::job::{DataAccess, DataItem, DataSource, JobSpec};
use crate::memory::{AccessClass, BufferBinding, MemoryPoolAllocator};

/// Role of one data item in the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Memory,
    UniqueRead,
    UniqueWrite,
    StreamingRead,
    StreamingWrite,
}

impl ItemKind {
    /// Classify by `(source, access)`
    pub fn classify(source: DataSource, access: Option<DataAccess>) -> Option<Self> {
        match (source, access) {
            (DataSource::Memory, _) => Some(ItemKind::Memory),
            (DataSource::File, Some(DataAccess::Read)) => Some(ItemKind::UniqueRead),
            (DataSource::File, Some(DataAccess::Write)) => Some(ItemKind::UniqueWrite),
            (DataSource::Directory, Some(DataAccess::Read)) => Some(ItemKind::StreamingRead),
            (DataSource::Directory, Some(DataAccess::Write)) => Some(ItemKind::StreamingWrite),
            (_, None) => None,
        }
    }

    /// Staging class, if the item touches files
    pub fn staging_class(self) -> Option<AccessClass> {
        match self {
            ItemKind::Memory => None,
            ItemKind::UniqueRead | ItemKind::StreamingRead => Some(AccessClass::CpuWrite),
            ItemKind::UniqueWrite | ItemKind::StreamingWrite => Some(AccessClass::CpuRead),
        }
    }

    /// Class of the buffer kernels see
    pub fn device_class(self) -> AccessClass {
        match self {
            ItemKind::Memory => AccessClass::GpuReadWrite,
            ItemKind::UniqueRead | ItemKind::StreamingRead => AccessClass::GpuRead,
            ItemKind::UniqueWrite | ItemKind::StreamingWrite => AccessClass::GpuWrite,
        }
    }

    /// Buffer instances per class (1 for single-buffered, 2 for double-buffered)
    pub fn instances(self) -> usize {
        match self {
            ItemKind::StreamingRead | ItemKind::StreamingWrite => GENERATIONS,
            _ => 1,
        }
    }

    pub fn is_streaming(self) -> bool {
        self.instances() == GENERATIONS
    }
}

/// Buffers of one data item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemBinding {
    pub name: String,
    pub kind: ItemKind,
    /// Buffer bound at the item's descriptor index, per generation
    pub device: [BufferBinding; 2],
    /// Host staging per generation
    pub staging: Option<[BufferBinding; 2]>,
}

/// Everything the executor needs to run a job
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Iterations the pipeline will compute
    pub iterations: usize,
    /// Iterations the job asked for
    pub requested_iterations: usize,
    /// Arenas backing every binding
    pub memory: MemoryPoolAllocator,
    /// One entry per data item, in declaration order
    pub bindings: Vec<ItemBinding>,
    /// Unique (one-shot) workloads
    pub unique_workloads: Vec<IoWorkload>,
    /// Streaming (per-iteration) workloads
    pub streaming_workloads: Vec<IoWorkload>,
    /// Steady-state transfers per generation
    pub transfer_steady: [CommandList; 2],
    /// `[0]` uploads unique inputs, `[1]` downloads unique outputs
    pub transfer_unique: [CommandList; 2],
    /// Kernel chain per generation
    pub compute: [CommandList; 2],
    pub descriptor_sets: [DescriptorSetId; 2],
    pub kernels: Vec<KernelId>,
}

impl ExecutionPlan {
    /// All workloads, unique first
    pub fn workloads(&self) -> impl Iterator<Item = &IoWorkload> {
        self.unique_workloads.iter().chain(self.streaming_workloads.iter())
    }

    /// Executor steps needed for this plan
    pub fn step_count(&self) -> usize {
        self.iterations + 2 * crate::constants::PIPELINE_DEPTH as usize
    }
}

struct PlannedItem<'j> {
    item: &'j DataItem,
    kind: ItemKind,
    files: FileList,
}

/// Compiles jobs against one backend
pub struct WorkloadCompiler<'a> {
    backend: &'a mut dyn ComputeBackend,
    debug: Option<DebugUtils>,
    output_pattern: String,
}

impl<'a> WorkloadCompiler<'a> {
    pub fn new(backend: &'a mut dyn ComputeBackend) -> Self {
        Self {
            backend,
            debug: None,
            output_pattern: DEFAULT_OUTPUT_PATTERN.to_string(),
        }
    }

    /// Name buffers and kernels through `debug`
    pub fn with_debug(mut self, debug: Option<DebugUtils>) -> Self {
        self.debug = debug;
        self
    }

    /// File name pattern for streaming outputs
    pub fn with_output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_pattern = pattern.into();
        self
    }

    /// Compile `job`, returning the plan and the iteration count to run
    pub fn compile(&mut self, job: &JobSpec) -> Result<(ExecutionPlan, usize)> {
        let planned = self.plan_items(job)?;

        // Sizing pass
        let mut memory = MemoryPoolAllocator::new(&*self.backend);
        for p in &planned {
            for _ in 0..p.kind.instances() {
                if let Some(class) = p.kind.staging_class() {
                    memory.reserve(class, p.item.size)?;
                }
                memory.reserve(p.kind.device_class(), p.item.size)?;
            }
        }
        memory.create_arenas(&mut *self.backend)?;

        let mut bindings = Vec::with_capacity(planned.len());
        let mut unique_workloads = Vec::new();
        let mut streaming_workloads = Vec::new();
        let mut transfer_steady = [CommandList::new("transfer[0]"), CommandList::new("transfer[1]")];
        let mut transfer_unique = [CommandList::new("upload-unique"), CommandList::new("download-unique")];

        for p in planned {
            let binding = self.allocate_item(&mut memory, &p)?;
            let size = p.item.size;

            if let Some(staging) = binding.staging {
                let op = match p.kind {
                    ItemKind::UniqueRead | ItemKind::StreamingRead => IoOp::Read,
                    _ => IoOp::Write,
                };
                let workload = IoWorkload {
                    name: p.item.name.clone(),
                    kind: if p.kind.is_streaming() {
                        WorkloadKind::Streaming
                    } else {
                        WorkloadKind::Unique
                    },
                    op,
                    class: staging[0].class,
                    size,
                    files: p.files,
                    staging,
                };
                if p.kind.is_streaming() {
                    streaming_workloads.push(workload);
                } else {
                    unique_workloads.push(workload);
                }

                match p.kind {
                    ItemKind::UniqueRead => transfer_unique[0].push(Command::Copy {
                        src: staging[0],
                        dst: binding.device[0],
                        size,
                    }),
                    ItemKind::UniqueWrite => transfer_unique[1].push(Command::Copy {
                        src: binding.device[0],
                        dst: staging[0],
                        size,
                    }),
                    ItemKind::StreamingRead => {
                        for (g, list) in transfer_steady.iter_mut().enumerate() {
                            list.push(Command::Copy {
                                src: staging[g ^ 1],
                                dst: binding.device[g ^ 1],
                                size,
                            });
                        }
                    }
                    ItemKind::StreamingWrite => {
                        for (g, list) in transfer_steady.iter_mut().enumerate() {
                            list.push(Command::Copy {
                                src: binding.device[g ^ 1],
                                dst: staging[g ^ 1],
                                size,
                            });
                        }
                    }
                    ItemKind::Memory => {}
                }
            }
            bindings.push(binding);
        }

        let descriptor_sets = [
            self.create_descriptor_set(&bindings, 0)?,
            self.create_descriptor_set(&bindings, 1)?,
        ];

        let mut kernels = Vec::with_capacity(job.programs.len());
        for program in &job.programs {
            let total = program.total_groups();
            if total >= DISPATCH_WARNING_THRESHOLD {
                tracing::warn!(
                    "Kernel {} dispatches {} thread groups, the driver might trigger a timeout",
                    program.name,
                    total
                );
            }
            let kernel = self.backend.create_kernel(program, bindings.len())?;
            if let Some(debug) = &self.debug {
                debug.name_object(ObjectRef::Kernel(kernel), &program.name);
            }
            kernels.push(kernel);
        }

        let compute = [0, 1].map(|g| {
            let mut list = CommandList::new(format!("compute[{}]", g));
            for (program, &kernel) in job.programs.iter().zip(&kernels) {
                list.push(Command::BindKernel(kernel));
                list.push(Command::BindDescriptorSet(descriptor_sets[g]));
                list.push(Command::Dispatch(program.dispatch));
                list.push(Command::Barrier);
            }
            list
        });

        let iterations = streaming_workloads
            .iter()
            .filter(|w| w.is_read())
            .map(|w| w.files.len())
            .fold(job.iterations, usize::min);
        if iterations < job.iterations {
            tracing::warn!(
                "Only {} input file(s) available, running {} of {} requested iteration(s)",
                iterations,
                iterations,
                job.iterations
            );
        }

        tracing::info!(
            "Compiled plan: {} iteration(s), {} unique / {} streaming workload(s), {} kernel(s)",
            iterations,
            unique_workloads.len(),
            streaming_workloads.len(),
            kernels.len()
        );

        let plan = ExecutionPlan {
            iterations,
            requested_iterations: job.iterations,
            memory,
            bindings,
            unique_workloads,
            streaming_workloads,
            transfer_steady,
            transfer_unique,
            compute,
            descriptor_sets,
            kernels,
        };
        Ok((plan, iterations))
    }

    /// Classify every item and build file lists; fails before any allocation
    fn plan_items<'j>(&self, job: &'j JobSpec) -> Result<Vec<PlannedItem<'j>>> {
        let mut issues = Vec::new();
        let mut planned = Vec::with_capacity(job.data.len());

        for (i, item) in job.data.iter().enumerate() {
            let locator = format!("data[{}]", i);
            if item.size == 0 {
                issues.push(ConfigIssue::config(&locator, "size", "must be greater than zero"));
            }
            let Some(kind) = ItemKind::classify(item.source, item.access) else {
                issues.push(ConfigIssue::config(&locator, "access", "mandatory unless source is memory"));
                continue;
            };
            if kind == ItemKind::Memory {
                planned.push(PlannedItem {
                    item,
                    kind,
                    files: FileList::Listed(Vec::new()),
                });
                continue;
            }
            let Some(path) = item.path.as_ref() else {
                issues.push(ConfigIssue::config(&locator, "path", "mandatory unless source is memory"));
                continue;
            };

            let files = match kind {
                ItemKind::StreamingRead => match sorted_files(path) {
                    Ok(files) => {
                        if files.is_empty() {
                            tracing::warn!("{} ({}): {} holds no input files", locator, item.name, path.display());
                        }
                        FileList::Listed(files)
                    }
                    Err(e) => {
                        issues.push(ConfigIssue::resource(&locator, "path", e.to_string()));
                        continue;
                    }
                },
                ItemKind::StreamingWrite => FileList::generated(path.clone(), self.output_pattern.as_str(), job.iterations),
                _ => FileList::Listed(vec![path.clone()]),
            };
            planned.push(PlannedItem { item, kind, files });
        }

        if !issues.is_empty() {
            return Err(PipelineError::Config(issues));
        }
        Ok(planned)
    }

    fn allocate_item(&self, memory: &mut MemoryPoolAllocator, p: &PlannedItem<'_>) -> Result<ItemBinding> {
        let size = p.item.size;
        let mut staging = Vec::with_capacity(2);
        let mut device = Vec::with_capacity(2);

        for _ in 0..p.kind.instances() {
            if let Some(class) = p.kind.staging_class() {
                staging.push(memory.allocate(class, size)?);
            }
            device.push(memory.allocate(p.kind.device_class(), size)?);
        }

        let pair = |v: &[BufferBinding]| [v[0], v[v.len() - 1]];
        let binding = ItemBinding {
            name: p.item.name.clone(),
            kind: p.kind,
            device: pair(&device),
            staging: (!staging.is_empty()).then(|| pair(&staging)),
        };

        if let Some(debug) = &self.debug {
            for (g, buffer) in binding.device.iter().enumerate() {
                debug.name_object(ObjectRef::Buffer(*buffer), &format!("{}.device[{}]", binding.name, g));
            }
            for (g, buffer) in binding.staging.iter().flatten().enumerate() {
                debug.name_object(ObjectRef::Buffer(*buffer), &format!("{}.staging[{}]", binding.name, g));
            }
        }
        Ok(binding)
    }

    fn create_descriptor_set(&mut self, bindings: &[ItemBinding], generation: usize) -> Result<DescriptorSetId> {
        let buffers: Vec<BufferBinding> = bindings.iter().map(|b| b.device[generation]).collect();
        let set = self.backend.create_descriptor_set(&buffers)?;
        if let Some(debug) = &self.debug {
            debug.name_object(ObjectRef::DescriptorSet(set), &format!("descriptors[{}]", generation));
        }
        Ok(set)
    }
}
