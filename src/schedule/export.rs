//! JSON export of schedule artifacts, for inspection and for downstream
//! tooling that sizes runtime memory pools.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::model::{DataType, Graph, MemoryLocation, Shape};
use crate::schedule::buffers::{Lifetime, MemorySpan};
use crate::schedule::scheduler::ScheduleResult;

#[derive(Debug, Serialize)]
pub struct ScheduleReport {
    pub modules: Vec<ModuleReport>,
}

#[derive(Debug, Serialize)]
pub struct ModuleReport {
    pub name: String,
    pub module_type: String,
    pub compute_sequence: Vec<String>,
    pub allocations: Vec<AllocationReport>,
    pub physical_buffers: Vec<PhysicalBufferReport>,
    pub max_usages: Vec<UsageReport>,
}

#[derive(Debug, Serialize)]
pub struct AllocationReport {
    pub value: String,
    pub location: MemoryLocation,
    pub dtype: DataType,
    pub size: usize,
    pub shape: Shape,
    pub start: usize,
}

#[derive(Debug, Serialize)]
pub struct PhysicalBufferReport {
    pub id: usize,
    pub owner: String,
    pub location: MemoryLocation,
    pub lifetime: Lifetime,
    pub span: Option<MemorySpan>,
}

#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub location: MemoryLocation,
    pub bytes: usize,
}

/// Build the report for a scheduled model. Module 0 is the main graph;
/// modules 1.. are its subgraphs in declaration order.
pub fn build_schedule_report(result: &ScheduleResult, root: &Graph) -> ScheduleReport {
    let modules = result
        .module_order
        .iter()
        .map(|&id| {
            let module = &result.modules[id];
            let graph = if id == 0 {
                root
            } else {
                &root.subgraphs()[id - 1]
            };

            let compute_sequence = module
                .compute_sequence
                .iter()
                .map(|&node| graph.node(node).name.clone())
                .collect();

            let mut allocations: Vec<_> = module
                .allocations
                .iter()
                .map(|(conn, alloc)| AllocationReport {
                    value: graph.value_name(*conn),
                    location: alloc.location,
                    dtype: alloc.dtype,
                    size: alloc.size,
                    shape: alloc.shape.clone(),
                    start: alloc.start,
                })
                .collect();
            allocations.sort_by(|a, b| a.value.cmp(&b.value));

            let physical_buffers = module
                .physical_buffers
                .iter()
                .map(|buffer| PhysicalBufferReport {
                    id: buffer.id,
                    owner: module.logical_buffers[buffer.owner].name.clone(),
                    location: buffer.location,
                    lifetime: buffer.lifetime,
                    span: buffer.allocation,
                })
                .collect();

            let mut max_usages: Vec<_> = module
                .max_usages
                .iter()
                .map(|(&location, &bytes)| UsageReport { location, bytes })
                .collect();
            max_usages.sort_by_key(|u| u.location);

            ModuleReport {
                name: module.module_name.clone(),
                module_type: graph.module_type.clone(),
                compute_sequence,
                allocations,
                physical_buffers,
                max_usages,
            }
        })
        .collect();

    ScheduleReport { modules }
}

/// Write the schedule report as pretty-printed JSON.
pub fn write_schedule_report(
    result: &ScheduleResult,
    root: &Graph,
    path: impl AsRef<Path>,
) -> Result<()> {
    let report = build_schedule_report(result, root);
    let json = serde_json::to_string_pretty(&report)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}
