use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::MemoryLocation;
use crate::schedule::buffers::{Lifetime, MemorySpan, PhysicalBuffer, PhysicalId};

/// Per-region offset assignment, supplied by the target.
///
/// The scheduler seeds the base offset, marks physical buffers in ascending
/// birth order, then freezes the allocator and reads back the placements
/// and the peak usage.
pub trait BufferAllocator {
    /// Seed the region so placement starts past `bytes`
    fn base_offset(&mut self, bytes: usize);

    /// Place one physical buffer at a deterministic offset
    fn mark(&mut self, buffer: &PhysicalBuffer) -> Result<()>;

    /// Freeze allocations; no further marks are accepted
    fn finish(&mut self);

    /// Placements recorded so far, by physical buffer id
    fn allocations(&self) -> &HashMap<PhysicalId, MemorySpan>;

    /// Peak bytes used, including the seeded base
    fn max_usage(&self) -> usize;
}

pub type AllocatorMap = HashMap<MemoryLocation, Box<dyn BufferAllocator>>;

/// Supplies the per-location allocators for a module. Implementations may
/// dispatch on the module type to pick target-specific region layouts.
pub trait Target {
    fn register_allocators(&self, module_type: &str) -> AllocatorMap;
}

/// Registers an unbounded first-fit allocator for every memory location.
#[derive(Debug, Default)]
pub struct DefaultTarget;

impl Target for DefaultTarget {
    fn register_allocators(&self, _module_type: &str) -> AllocatorMap {
        MemoryLocation::ALL
            .iter()
            .map(|&location| {
                let allocator: Box<dyn BufferAllocator> =
                    Box::new(FirstFitAllocator::new(location, 8, None));
                (location, allocator)
            })
            .collect()
    }
}

/// Deterministic first-fit placement over free intervals.
///
/// A candidate offset starts at the aligned base and is bumped past every
/// already-placed buffer whose lifetime intersects the new buffer's and
/// whose span overlaps the candidate range, until no conflict remains.
pub struct FirstFitAllocator {
    location: MemoryLocation,
    alignment: usize,
    capacity: Option<usize>,
    base: usize,
    finished: bool,
    placed: Vec<(MemorySpan, Lifetime)>,
    allocations: HashMap<PhysicalId, MemorySpan>,
    max_usage: usize,
}

impl FirstFitAllocator {
    pub fn new(location: MemoryLocation, alignment: usize, capacity: Option<usize>) -> Self {
        assert!(alignment.is_power_of_two());
        Self {
            location,
            alignment,
            capacity,
            base: 0,
            finished: false,
            placed: Vec::new(),
            allocations: HashMap::new(),
            max_usage: 0,
        }
    }

    fn align_offset(&self, offset: usize) -> usize {
        (offset + self.alignment - 1) & !(self.alignment - 1)
    }
}

impl BufferAllocator for FirstFitAllocator {
    fn base_offset(&mut self, bytes: usize) {
        self.base = bytes;
        self.max_usage = self.max_usage.max(bytes);
    }

    fn mark(&mut self, buffer: &PhysicalBuffer) -> Result<()> {
        if self.finished {
            return Err(Error::UnsupportedFeature(format!(
                "Allocator for {:?} memory is already frozen",
                self.location
            )));
        }

        let size = buffer.size;
        let mut offset = self.align_offset(self.base);
        loop {
            let candidate = MemorySpan {
                start: offset,
                size,
            };
            let conflict = self
                .placed
                .iter()
                .find(|(span, lifetime)| {
                    lifetime.overlaps(&buffer.lifetime) && span.overlaps(&candidate)
                })
                .map(|(span, _)| *span);
            match conflict {
                Some(span) => offset = self.align_offset(span.end()),
                None => break,
            }
        }

        if let Some(capacity) = self.capacity {
            if offset + size > capacity {
                return Err(Error::AllocatorExhausted {
                    location: self.location,
                    required: offset + size,
                    capacity,
                });
            }
        }

        let span = MemorySpan {
            start: offset,
            size,
        };
        self.placed.push((span, buffer.lifetime));
        self.allocations.insert(buffer.id, span);
        self.max_usage = self.max_usage.max(span.end());
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn allocations(&self) -> &HashMap<PhysicalId, MemorySpan> {
        &self.allocations
    }

    fn max_usage(&self) -> usize {
        self.max_usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryLocation;

    fn physical(id: PhysicalId, birth: usize, age: usize, size: usize) -> PhysicalBuffer {
        PhysicalBuffer {
            id,
            owner: 0,
            location: MemoryLocation::Data,
            lifetime: Lifetime {
                birth,
                age,
                used_count: 0,
            },
            size,
            allocation: None,
        }
    }

    #[test]
    fn test_overlapping_lifetimes_get_disjoint_spans() {
        let mut alloc = FirstFitAllocator::new(MemoryLocation::Data, 8, None);
        alloc.mark(&physical(0, 0, 4, 100)).unwrap();
        alloc.mark(&physical(1, 2, 4, 100)).unwrap();
        let spans = alloc.allocations();
        assert_eq!(spans[&0].start, 0);
        assert_eq!(spans[&1].start, 104); // aligned past the first
        assert_eq!(alloc.max_usage(), 204);
    }

    #[test]
    fn test_dead_buffer_offset_is_reused() {
        let mut alloc = FirstFitAllocator::new(MemoryLocation::Data, 8, None);
        alloc.mark(&physical(0, 0, 2, 64)).unwrap();
        alloc.mark(&physical(1, 4, 2, 64)).unwrap();
        let spans = alloc.allocations();
        assert_eq!(spans[&0].start, 0);
        assert_eq!(spans[&1].start, 0);
        assert_eq!(alloc.max_usage(), 64);
    }

    #[test]
    fn test_base_offset_seeds_placement() {
        let mut alloc = FirstFitAllocator::new(MemoryLocation::Rdata, 8, None);
        alloc.base_offset(256);
        alloc.mark(&physical(0, 0, 1, 32)).unwrap();
        assert_eq!(alloc.allocations()[&0].start, 256);
        assert_eq!(alloc.max_usage(), 288);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut alloc = FirstFitAllocator::new(MemoryLocation::Sram, 8, Some(128));
        alloc.mark(&physical(0, 0, 4, 100)).unwrap();
        let err = alloc.mark(&physical(1, 1, 4, 100)).unwrap_err();
        assert!(matches!(err, Error::AllocatorExhausted { required: 204, .. }));
    }
}
