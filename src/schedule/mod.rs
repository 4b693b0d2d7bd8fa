pub mod alias;
pub mod allocator;
pub mod buffers;
pub mod export;
pub mod liveness;
pub mod scheduler;

pub use allocator::{AllocatorMap, BufferAllocator, DefaultTarget, FirstFitAllocator, Target};
pub use buffers::{
    BufferAllocation, BufferId, Lifetime, LogicalBuffer, MemorySpan, ParentDesc, PhysicalBuffer,
    PhysicalId,
};
pub use export::{build_schedule_report, write_schedule_report, ScheduleReport};
pub use scheduler::{ModuleSchedule, ScheduleResult, Scheduler};
