//! Memory arenas and buffer bindings
//!
//! Every buffer of a plan lives in one of five arenas, one per
//! [`AccessClass`]. Arenas are sized in a reservation pass, created once,
//! then bump-allocated; nothing is freed until the plan is dropped.
//!
//! ```text
//!   reserve(class, size) ...   create_arenas(backend)   allocate(class, size) ...
//!   ───── sizing pass ─────►   ── backend arenas ──►    ──── bump cursor ────►
//! ```

mod host;
mod pool;

pub use host::{HostRegion, HostSpan};
pub use pool::{align_up, Arena, MemoryPoolAllocator};

use std::fmt;

/// Buffer category: residency and allowed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessClass {
    /// Device-local, read by kernels, filled by uploads
    GpuRead,
    /// Device-local, written by kernels, drained by downloads
    GpuWrite,
    /// Device-local scratch, kernels only
    GpuReadWrite,
    /// Host-visible download target, read by file writes
    CpuRead,
    /// Host-visible upload source, written by file reads
    CpuWrite,
}

impl AccessClass {
    /// All classes in arena order
    pub const ALL: [AccessClass; 5] = [
        AccessClass::GpuRead,
        AccessClass::GpuWrite,
        AccessClass::GpuReadWrite,
        AccessClass::CpuRead,
        AccessClass::CpuWrite,
    ];

    /// Arena slot of this class
    pub fn index(self) -> usize {
        self as usize
    }

    /// True for classes mapped into host memory
    pub fn is_host_visible(self) -> bool {
        matches!(self, AccessClass::CpuRead | AccessClass::CpuWrite)
    }

    /// Where the arena lives
    pub fn residency(self) -> Residency {
        if self.is_host_visible() {
            Residency::HostCoherent
        } else {
            Residency::DeviceLocal
        }
    }

    /// Operations a buffer of this class takes part in
    pub fn usage(self) -> BufferUsage {
        match self {
            AccessClass::GpuRead => BufferUsage::TRANSFER_DST.union(BufferUsage::STORAGE),
            AccessClass::GpuWrite => BufferUsage::TRANSFER_SRC.union(BufferUsage::STORAGE),
            AccessClass::GpuReadWrite => BufferUsage::STORAGE,
            AccessClass::CpuRead => BufferUsage::TRANSFER_DST,
            AccessClass::CpuWrite => BufferUsage::TRANSFER_SRC,
        }
    }
}

impl fmt::Display for AccessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessClass::GpuRead => "gpu-read",
            AccessClass::GpuWrite => "gpu-write",
            AccessClass::GpuReadWrite => "gpu-read-write",
            AccessClass::CpuRead => "cpu-read",
            AccessClass::CpuWrite => "cpu-write",
        };
        f.write_str(name)
    }
}

/// Arena residency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    DeviceLocal,
    HostCoherent,
}

/// Usage rights of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferUsage(u8);

impl BufferUsage {
    pub const TRANSFER_SRC: BufferUsage = BufferUsage(1);
    pub const TRANSFER_DST: BufferUsage = BufferUsage(1 << 1);
    pub const STORAGE: BufferUsage = BufferUsage(1 << 2);

    pub const fn union(self, other: BufferUsage) -> BufferUsage {
        BufferUsage(self.0 | other.0)
    }

    pub const fn contains(self, other: BufferUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A logical view into an arena: `(class, offset, size)`
///
/// Never a raw address; offsets are validated against the arena capacity
/// when the binding is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBinding {
    pub class: AccessClass,
    pub offset: u64,
    pub size: u64,
}

impl BufferBinding {
    pub fn new(class: AccessClass, offset: u64, size: u64) -> Self {
        Self { class, offset, size }
    }

    /// One past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// True if both bindings share at least one byte of the same arena
    pub fn overlaps(&self, other: &BufferBinding) -> bool {
        self.class == other.class && self.offset < other.end() && other.offset < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_usage_table() {
        assert!(AccessClass::GpuRead.usage().contains(BufferUsage::TRANSFER_DST));
        assert!(AccessClass::GpuRead.usage().contains(BufferUsage::STORAGE));
        assert!(!AccessClass::GpuRead.usage().contains(BufferUsage::TRANSFER_SRC));
        assert!(AccessClass::GpuWrite.usage().contains(BufferUsage::TRANSFER_SRC));
        assert_eq!(AccessClass::GpuReadWrite.usage(), BufferUsage::STORAGE);
        assert_eq!(AccessClass::CpuRead.usage(), BufferUsage::TRANSFER_DST);
        assert_eq!(AccessClass::CpuWrite.usage(), BufferUsage::TRANSFER_SRC);
    }

    #[test]
    fn test_residency() {
        for class in AccessClass::ALL {
            let host = matches!(class, AccessClass::CpuRead | AccessClass::CpuWrite);
            assert_eq!(class.is_host_visible(), host);
            assert_eq!(class.residency() == Residency::HostCoherent, host);
        }
    }

    #[test]
    fn test_binding_overlap() {
        let a = BufferBinding::new(AccessClass::CpuWrite, 0, 256);
        let b = BufferBinding::new(AccessClass::CpuWrite, 256, 256);
        let c = BufferBinding::new(AccessClass::CpuWrite, 128, 256);
        let d = BufferBinding::new(AccessClass::CpuRead, 0, 256);

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&d));
    }
}
