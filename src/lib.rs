pub mod error;
pub mod model;
pub mod schedule;
pub mod visitor;

// Re-export commonly used types
pub use error::{Error, Result};
pub use model::{
    bytes_of, strides_of, DataType, Graph, InputRef, MemoryLocation, Node, NodeId, OpCode, OpKind,
    OutputRef, Shape, UsageMap,
};
pub use schedule::{
    BufferAllocation, BufferAllocator, DefaultTarget, FirstFitAllocator, Lifetime, LogicalBuffer,
    MemorySpan, ModuleSchedule, PhysicalBuffer, ScheduleResult, Scheduler, Target,
};
pub use visitor::{post_order, post_order_from};
