use serde::Serialize;

use crate::model::{DataType, MemoryLocation, OutputRef, Shape};

/// Index of a logical buffer within its scheduling context
pub type BufferId = usize;

/// Index of a physical buffer within its scheduling context
pub type PhysicalId = usize;

/// Residency interval of a buffer, in visit ticks.
///
/// `used_count` counts the consumers that have not released the buffer yet;
/// the buffer stops aging once it reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lifetime {
    pub birth: usize,
    pub age: usize,
    pub used_count: usize,
}

impl Lifetime {
    pub fn new(birth: usize, used_count: usize) -> Self {
        Self {
            birth,
            age: 0,
            used_count,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.used_count > 0
    }

    pub fn end(&self) -> usize {
        self.birth + self.age
    }

    /// Two buffers conflict iff their `[birth, end]` intervals intersect.
    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.birth <= other.end() && other.birth <= self.end()
    }
}

/// View descriptor: the owning buffer is a sub-region of `parent` starting
/// at `begin` (absolute position per dimension of the parent's shape).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentDesc {
    pub parent: BufferId,
    pub begin: Vec<usize>,
}

/// Abstract storage for one graph value (one per output port).
#[derive(Debug, Clone)]
pub struct LogicalBuffer {
    pub id: BufferId,
    /// The output port this buffer backs
    pub owner: OutputRef,
    /// Producing node's name, kept for diagnostics
    pub name: String,
    pub dtype: DataType,
    pub shape: Shape,
    pub location: MemoryLocation,
    pub lifetime: Lifetime,
    pub parent: Option<ParentDesc>,
    /// Assigned by the physical-buffer builder
    pub physical: Option<PhysicalId>,
}

/// Contiguous byte range within a memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySpan {
    pub start: usize,
    pub size: usize,
}

impl MemorySpan {
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    pub fn overlaps(&self, other: &MemorySpan) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// One actual memory region, backing a root logical buffer and every view
/// aliased onto it.
#[derive(Debug, Clone)]
pub struct PhysicalBuffer {
    pub id: PhysicalId,
    /// Root logical buffer this region belongs to
    pub owner: BufferId,
    pub location: MemoryLocation,
    pub lifetime: Lifetime,
    pub size: usize,
    /// Assigned by the region allocator
    pub allocation: Option<MemorySpan>,
}

/// Final placement record for one graph value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferAllocation {
    pub location: MemoryLocation,
    pub dtype: DataType,
    pub size: usize,
    pub shape: Shape,
    /// Shape the strides are computed over; differs from `shape` for concat
    /// children, which occupy a window of their parent
    pub parent_shape: Shape,
    pub strides: Vec<usize>,
    pub start: usize,
}
