//! Host kernels
//!
//! The host backend runs kernels as Rust closures. A program item selects
//! its kernel by the file stem of its path (`kernels/copy.spv` → `copy`).

use std::collections::HashMap;
use std::sync::Arc;

/// Arguments handed to a host kernel: one slice per descriptor binding
pub struct KernelArgs<'a> {
    pub buffers: Vec<&'a mut [u8]>,
    pub dispatch: [u32; 3],
}

impl KernelArgs<'_> {
    fn require(&self, count: usize, kernel: &str) -> Result<(), String> {
        if self.buffers.len() < count {
            return Err(format!(
                "{} needs {} binding(s), descriptor set has {}",
                kernel,
                count,
                self.buffers.len()
            ));
        }
        Ok(())
    }

    /// Binding 0 read-only, binding 1 mutable
    fn input_output(&mut self) -> (&[u8], &mut [u8]) {
        let (head, tail) = self.buffers.split_at_mut(1);
        (&*head[0], &mut *tail[0])
    }
}

/// Host kernel entry point
pub type KernelFn = Arc<dyn Fn(&mut KernelArgs<'_>) -> Result<(), String> + Send + Sync>;

fn words_mut(bytes: &mut [u8]) -> Result<&mut [u32], String> {
    let len = bytes.len() / 4 * 4;
    bytemuck::try_cast_slice_mut(&mut bytes[..len]).map_err(|e| format!("misaligned u32 view: {:?}", e))
}

fn words(bytes: &[u8]) -> Result<&[u32], String> {
    let len = bytes.len() / 4 * 4;
    bytemuck::try_cast_slice(&bytes[..len]).map_err(|e| format!("misaligned u32 view: {:?}", e))
}

/// Name → kernel lookup
#[derive(Clone)]
pub struct KernelRegistry {
    kernels: HashMap<String, KernelFn>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelRegistry {
    /// Registry pre-populated with the built-in kernels
    ///
    /// - `copy`: binding 1 ← binding 0
    /// - `invert`: binding 1 ← !binding 0
    /// - `increment`: every little-endian `u32` of binding 0 += 1
    /// - `accumulate`: every `u32` of binding 1 += matching `u32` of binding 0
    /// - `noop`
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register("copy", |args| {
            args.require(2, "copy")?;
            let (src, dst) = args.input_output();
            let n = src.len().min(dst.len());
            dst[..n].copy_from_slice(&src[..n]);
            Ok(())
        });

        registry.register("invert", |args| {
            args.require(2, "invert")?;
            let (src, dst) = args.input_output();
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = !*s;
            }
            Ok(())
        });

        registry.register("increment", |args| {
            args.require(1, "increment")?;
            for w in words_mut(&mut *args.buffers[0])? {
                *w = u32::from_le(*w).wrapping_add(1).to_le();
            }
            Ok(())
        });

        registry.register("accumulate", |args| {
            args.require(2, "accumulate")?;
            let (src, dst) = args.input_output();
            let src = words(src)?;
            for (d, s) in words_mut(dst)?.iter_mut().zip(src) {
                *d = u32::from_le(*d).wrapping_add(u32::from_le(*s)).to_le();
            }
            Ok(())
        });

        registry.register("noop", |_| Ok(()));

        registry
    }

    pub fn empty() -> Self {
        Self { kernels: HashMap::new() }
    }

    /// Add or replace a kernel
    pub fn register<F>(&mut self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&mut KernelArgs<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
    }

    pub fn get(&self, name: &str) -> Option<KernelFn> {
        self.kernels.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
