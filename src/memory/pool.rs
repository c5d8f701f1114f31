//! Per-class bump arenas
//!
//! The allocator runs in two phases. During sizing, [`reserve`] accumulates
//! the aligned size of every buffer a plan needs. [`create_arenas`] then
//! asks the backend for one arena per non-empty class and maps host-visible
//! arenas once. After that only [`allocate`] is allowed; a request that does
//! not fit the reserved capacity means sizing and allocation disagree and is
//! reported as [`PipelineError::Capacity`].
//!
//! [`reserve`]: MemoryPoolAllocator::reserve
//! [`create_arenas`]: MemoryPoolAllocator::create_arenas
//! [`allocate`]: MemoryPoolAllocator::allocate

use std::sync::Arc;

use super::{AccessClass, BufferBinding, HostRegion, HostSpan};
use crate::backend::ComputeBackend;
use crate::error::{PipelineError, Result};

/// Round `value` up to a multiple of `alignment` (`0` and `1` mean unaligned)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// One class's arena
#[derive(Debug)]
pub struct Arena {
    class: AccessClass,
    alignment: u64,
    capacity: u64,
    cursor: u64,
    host: Option<Arc<HostRegion>>,
}

impl Arena {
    fn new(class: AccessClass, alignment: u64) -> Self {
        Self {
            class,
            alignment: alignment.max(1),
            capacity: 0,
            cursor: 0,
            host: None,
        }
    }

    pub fn class(&self) -> AccessClass {
        self.class
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes reserved during sizing
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes handed out so far
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.cursor
    }

    /// Mapped memory (host-visible classes after creation)
    pub fn host_region(&self) -> Option<&Arc<HostRegion>> {
        self.host.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sizing,
    Allocating,
}

/// Five arenas, one per [`AccessClass`]
#[derive(Debug)]
pub struct MemoryPoolAllocator {
    arenas: Vec<Arena>,
    phase: Phase,
}

impl MemoryPoolAllocator {
    /// Allocator using the backend's per-class alignment
    pub fn new(backend: &dyn ComputeBackend) -> Self {
        let alignments = AccessClass::ALL.map(|class| backend.alignment(class));
        Self::with_alignments(alignments)
    }

    /// Allocator with explicit alignments, indexed like [`AccessClass::ALL`]
    pub fn with_alignments(alignments: [u64; 5]) -> Self {
        Self {
            arenas: AccessClass::ALL
                .iter()
                .zip(alignments)
                .map(|(&class, alignment)| Arena::new(class, alignment))
                .collect(),
            phase: Phase::Sizing,
        }
    }

    pub fn arena(&self, class: AccessClass) -> &Arena {
        &self.arenas[class.index()]
    }

    pub fn arenas(&self) -> impl Iterator<Item = &Arena> {
        self.arenas.iter()
    }

    /// Add `size` (aligned) to the class's capacity; returns the aligned size
    pub fn reserve(&mut self, class: AccessClass, size: u64) -> Result<u64> {
        if self.phase != Phase::Sizing {
            return Err(PipelineError::Allocation(format!(
                "reserve({}, {}) after arenas were created",
                class, size
            )));
        }
        let arena = &mut self.arenas[class.index()];
        let aligned = align_up(size, arena.alignment);
        arena.capacity = arena
            .capacity
            .checked_add(aligned)
            .ok_or_else(|| PipelineError::Allocation(format!("{} arena capacity overflows u64", class)))?;
        Ok(aligned)
    }

    /// End the sizing pass: create every non-empty arena, map host ones
    pub fn create_arenas(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        if self.phase != Phase::Sizing {
            return Err(PipelineError::Allocation("arenas already created".to_string()));
        }

        for arena in &mut self.arenas {
            if arena.capacity == 0 {
                continue;
            }
            backend.create_arena(arena.class, arena.capacity)?;
            if arena.class.is_host_visible() {
                arena.host = Some(backend.map_arena(arena.class)?);
            }
            tracing::info!(
                "Arena {}: {} bytes (alignment {})",
                arena.class,
                arena.capacity,
                arena.alignment
            );
        }

        self.phase = Phase::Allocating;
        Ok(())
    }

    /// Bump-allocate `size` bytes from the class's arena
    pub fn allocate(&mut self, class: AccessClass, size: u64) -> Result<BufferBinding> {
        if self.phase != Phase::Allocating {
            return Err(PipelineError::Allocation(format!(
                "allocate({}, {}) before arenas were created",
                class, size
            )));
        }

        let arena = &mut self.arenas[class.index()];
        let aligned = align_up(size, arena.alignment);
        if aligned > arena.remaining() {
            return Err(PipelineError::Capacity {
                class,
                requested: aligned,
                available: arena.remaining(),
            });
        }

        let binding = BufferBinding::new(class, arena.cursor, size);
        arena.cursor += aligned;
        tracing::trace!("Allocated {} bytes at {}+{}", size, class, binding.offset);
        Ok(binding)
    }

    /// Host span behind a binding of a host-visible class
    pub fn host_span(&self, binding: &BufferBinding) -> Result<HostSpan> {
        let arena = self.arena(binding.class);
        let region = arena.host.as_ref().ok_or_else(|| {
            PipelineError::Allocation(format!("{} arena is not host addressable", binding.class))
        })?;
        if binding.end() > arena.capacity {
            return Err(PipelineError::Capacity {
                class: binding.class,
                requested: binding.end(),
                available: arena.capacity,
            });
        }
        Ok(HostSpan::new(Arc::clone(region), binding.offset, binding.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use proptest::prelude::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(7, 0), 7);
        assert_eq!(align_up(10, 3), 12);
    }

    #[test]
    fn test_reserve_then_allocate() {
        let mut backend = HostBackend::new();
        let mut pool = MemoryPoolAllocator::new(&backend);

        pool.reserve(AccessClass::CpuWrite, 100).unwrap();
        pool.reserve(AccessClass::CpuWrite, 300).unwrap();
        assert_eq!(pool.arena(AccessClass::CpuWrite).capacity(), 256 + 512);

        pool.create_arenas(&mut backend).unwrap();

        let a = pool.allocate(AccessClass::CpuWrite, 100).unwrap();
        let b = pool.allocate(AccessClass::CpuWrite, 300).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(pool.arena(AccessClass::CpuWrite).remaining(), 0);
        assert!(pool.arena(AccessClass::CpuWrite).host_region().is_some());
        assert!(pool.arena(AccessClass::GpuRead).host_region().is_none());
    }

    #[test]
    fn test_allocate_past_capacity() {
        let mut backend = HostBackend::new();
        let mut pool = MemoryPoolAllocator::new(&backend);
        pool.reserve(AccessClass::GpuRead, 256).unwrap();
        pool.create_arenas(&mut backend).unwrap();

        pool.allocate(AccessClass::GpuRead, 256).unwrap();
        let err = pool.allocate(AccessClass::GpuRead, 1).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Capacity {
                class: AccessClass::GpuRead,
                available: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_phase_ordering() {
        let mut backend = HostBackend::new();
        let mut pool = MemoryPoolAllocator::new(&backend);

        assert!(matches!(
            pool.allocate(AccessClass::CpuRead, 4),
            Err(PipelineError::Allocation(_))
        ));
        pool.create_arenas(&mut backend).unwrap();
        assert!(matches!(
            pool.reserve(AccessClass::CpuRead, 4),
            Err(PipelineError::Allocation(_))
        ));
    }

    #[test]
    fn test_device_class_has_no_host_span() {
        let mut backend = HostBackend::new();
        let mut pool = MemoryPoolAllocator::new(&backend);
        pool.reserve(AccessClass::GpuWrite, 64).unwrap();
        pool.create_arenas(&mut backend).unwrap();
        let binding = pool.allocate(AccessClass::GpuWrite, 64).unwrap();
        assert!(pool.host_span(&binding).is_err());
    }

    proptest! {
        #[test]
        fn prop_capacity_is_sum_of_aligned_sizes(
            alignment in prop::sample::select(vec![1u64, 4, 64, 256, 1024]),
            sizes in prop::collection::vec(1u64..10_000, 0..24),
        ) {
            let mut pool = MemoryPoolAllocator::with_alignments([alignment; 5]);
            for &size in &sizes {
                pool.reserve(AccessClass::GpuRead, size).unwrap();
            }
            let expected: u64 = sizes.iter().map(|&s| align_up(s, alignment)).sum();
            prop_assert_eq!(pool.arena(AccessClass::GpuRead).capacity(), expected);
        }

        #[test]
        fn prop_allocations_disjoint_and_aligned(
            alignment in prop::sample::select(vec![4u64, 16, 256]),
            sizes in prop::collection::vec(1u64..4096, 1..16),
        ) {
            let mut backend = HostBackend::new();
            let mut pool = MemoryPoolAllocator::with_alignments([alignment; 5]);
            for &size in &sizes {
                pool.reserve(AccessClass::CpuRead, size).unwrap();
            }
            pool.create_arenas(&mut backend).unwrap();

            let bindings: Vec<BufferBinding> = sizes
                .iter()
                .map(|&size| pool.allocate(AccessClass::CpuRead, size).unwrap())
                .collect();

            for (i, a) in bindings.iter().enumerate() {
                prop_assert_eq!(a.offset % alignment, 0);
                prop_assert!(a.end() <= pool.arena(AccessClass::CpuRead).capacity());
                for b in &bindings[i + 1..] {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }
    }
}
