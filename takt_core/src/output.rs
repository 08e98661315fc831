//! Output frame records and the per-frame scratch block they share.
//!
//! Every node makes at most one scratch allocation per produced frame.
//! Each output is an offset into that block; vector outputs hold f64
//! values, tagged outputs hold a tagged parameter blob.

use crate::alloc::{ScratchBlock, ScratchPool};
use takt_primitives::tagged::{TaggedRef, TaggedWriter};

/// How an output's bytes are interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// A run of f64 samples.
    #[default]
    Vector,
    /// A tagged parameter blob.
    Tagged,
}

/// One output record. Sizes are in bytes; `offset` is into the node's
/// current scratch block.
#[derive(Debug, Default)]
pub struct Output {
    mode: OutputMode,
    current_bytes: usize,
    requested_bytes: usize,
    offset: usize,
}

impl Output {
    #[allow(missing_docs)]
    pub fn mode(&self) -> OutputMode {
        self.mode
    }
}

/// The outputs of one node plus the scratch block currently backing them.
#[derive(Debug, Default)]
pub struct OutputSet {
    outputs: Vec<Output>,
    memory: Option<ScratchBlock>,
    /// Incremented on every allocation; lets consumers release each
    /// produced frame exactly once.
    serial: u64,
}

impl OutputSet {
    #[allow(missing_docs)]
    pub fn new(modes: impl IntoIterator<Item = OutputMode>) -> Self {
        Self {
            outputs: modes
                .into_iter()
                .map(|mode| Output {
                    mode,
                    ..Output::default()
                })
                .collect(),
            memory: None,
            serial: 0,
        }
    }

    /// Number of outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }
    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
    /// Serial number of the most recent allocation.
    pub fn serial(&self) -> u64 {
        self.serial
    }
    /// True while a scratch block is held.
    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }
    #[allow(missing_docs)]
    pub fn mode(&self, idx: usize) -> OutputMode {
        self.outputs[idx].mode
    }

    /// Record the intended size of output `idx` in bytes.
    pub fn request_bytes(&mut self, idx: usize, bytes: usize) {
        self.outputs[idx].requested_bytes = bytes;
    }

    /// Perform the single allocation for all outputs. Any previously held
    /// block is returned to the pool first. On failure every output is
    /// left zero-sized and `false` is returned.
    pub fn allocate(&mut self, pool: &ScratchPool) -> bool {
        self.free(pool);
        self.serial += 1;
        let mut total = 0usize;
        for out in &mut self.outputs {
            out.offset = total;
            out.current_bytes = out.requested_bytes;
            // Pad every output to an 8-byte boundary so that vector
            // outputs stay aligned for f64 access.
            total += out.requested_bytes.next_multiple_of(8);
        }
        if total == 0 {
            return true;
        }
        match pool.allocate(total) {
            Some(block) => {
                self.memory = Some(block);
                true
            }
            None => {
                for out in &mut self.outputs {
                    out.current_bytes = 0;
                }
                false
            }
        }
    }

    /// Return the scratch block to the pool and zero all sizes.
    pub fn free(&mut self, pool: &ScratchPool) {
        if let Some(block) = self.memory.take() {
            pool.release(block);
        }
        for out in &mut self.outputs {
            out.current_bytes = 0;
        }
    }

    /// The vector payload of output `idx`, empty when unallocated or
    /// tagged.
    pub fn vector(&self, idx: usize) -> &[f64] {
        let out = &self.outputs[idx];
        let Some(memory) = &self.memory else {
            return &[];
        };
        if out.mode != OutputMode::Vector || out.current_bytes == 0 {
            return &[];
        }
        // Safety: `offset` is 8-aligned within a live 64-aligned block
        // and `current_bytes` fits the allocation by construction in
        // `allocate`.
        unsafe {
            core::slice::from_raw_parts(
                memory.as_ptr().add(out.offset) as *const f64,
                out.current_bytes / 8,
            )
        }
    }

    /// Mutable access to the vector payload of output `idx`.
    pub fn vector_mut(&mut self, idx: usize) -> &mut [f64] {
        let out = &self.outputs[idx];
        let Some(memory) = &self.memory else {
            return &mut [];
        };
        if out.mode != OutputMode::Vector || out.current_bytes == 0 {
            return &mut [];
        }
        // Safety: as in `vector`, plus `&mut self` guarantees uniqueness.
        unsafe {
            core::slice::from_raw_parts_mut(
                memory.as_ptr().add(out.offset) as *mut f64,
                out.current_bytes / 8,
            )
        }
    }

    /// The tagged payload of output `idx`, if allocated in tagged mode.
    pub fn tagged(&self, idx: usize) -> Option<TaggedRef<'_>> {
        let (ptr, bytes, mode) = self.raw(idx);
        if mode != OutputMode::Tagged || bytes == 0 {
            return None;
        }
        // Safety: as in `vector`.
        Some(TaggedRef::new(unsafe {
            core::slice::from_raw_parts(ptr, bytes)
        }))
    }

    /// Write the tagged payload of output `idx` through a writer. The
    /// output's current size shrinks to the bytes actually written.
    pub fn with_tagged<R>(&mut self, idx: usize, f: impl FnOnce(&mut TaggedWriter) -> R) -> R {
        let out = &self.outputs[idx];
        debug_assert_eq!(out.mode, OutputMode::Tagged);
        let (offset, bytes) = (out.offset, out.current_bytes);
        let region: &mut [u8] = match &self.memory {
            // Safety: as in `vector_mut`.
            Some(memory) if bytes > 0 => unsafe {
                core::slice::from_raw_parts_mut(memory.as_ptr().add(offset), bytes)
            },
            _ => &mut [],
        };
        let mut writer = TaggedWriter::new(region);
        let r = f(&mut writer);
        let used = writer.used();
        self.outputs[idx].current_bytes = used;
        r
    }

    /// Raw descriptor of output `idx` for the runtime to hand to
    /// downstream readers: base pointer, size in bytes, mode. The pointer
    /// is dangling when the output is unallocated.
    pub fn raw(&self, idx: usize) -> (*const u8, usize, OutputMode) {
        let out = &self.outputs[idx];
        match &self.memory {
            Some(memory) if out.current_bytes > 0 => (
                // Safety: offset is within the allocation.
                unsafe { memory.as_ptr().add(out.offset) as *const u8 },
                out.current_bytes,
                out.mode,
            ),
            _ => (core::ptr::NonNull::dangling().as_ptr(), 0, out.mode),
        }
    }
}
