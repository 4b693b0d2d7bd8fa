//! Schedule driver.
//!
//! Builds one scheduling context per module (the main graph first, then
//! each subgraph in declaration order) and runs the pipeline: lifetime
//! recording, alias analysis, concat index fixing, lifetime fixing, compute
//! sequence capture, physical buffer construction, region allocation, and
//! allocation assignment. Any stage error aborts the whole call.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{
    bytes_of, element_offset, strides_of, Graph, MemoryLocation, NodeId, OpCode, OutputRef,
    UsageMap,
};
use crate::schedule::alias;
use crate::schedule::allocator::Target;
use crate::schedule::buffers::{
    BufferAllocation, BufferId, LogicalBuffer, PhysicalBuffer, PhysicalId,
};
use crate::schedule::liveness;
use crate::visitor::post_order;

/// Schedule artifact for one module.
#[derive(Debug, Clone)]
pub struct ModuleSchedule {
    pub module_id: usize,
    pub module_name: String,
    /// Action nodes in execution order
    pub compute_sequence: Vec<NodeId>,
    /// Final placement per output port
    pub allocations: HashMap<OutputRef, BufferAllocation>,
    pub logical_buffers: Vec<LogicalBuffer>,
    pub physical_buffers: Vec<PhysicalBuffer>,
    /// Peak bytes used per memory location
    pub max_usages: UsageMap,
}

/// Schedule artifact for a whole model: the main module followed by its
/// subgraphs, in traversal order.
#[derive(Debug, Clone)]
pub struct ScheduleResult {
    pub modules: Vec<ModuleSchedule>,
    pub module_order: Vec<usize>,
}

impl ScheduleResult {
    pub fn main_module(&self) -> &ModuleSchedule {
        &self.modules[0]
    }
}

#[derive(Default)]
struct ScheduleContext {
    buffers: Vec<LogicalBuffer>,
    buffer_map: HashMap<OutputRef, BufferId>,
    physical: Vec<PhysicalBuffer>,
    compute_sequence: Vec<NodeId>,
    allocations: HashMap<OutputRef, BufferAllocation>,
    max_usages: UsageMap,
}

impl ScheduleContext {
    fn new(seed_usages: UsageMap) -> Self {
        Self {
            max_usages: seed_usages,
            ..Default::default()
        }
    }

    /// Capture the nodes whose ACTION bit survived alias analysis, in
    /// post-order, as the module's compute sequence.
    fn generate_compute_sequence(&mut self, graph: &Graph) -> Result<()> {
        for id in post_order(graph)? {
            if graph.node(id).is_action() {
                self.compute_sequence.push(id);
            }
        }
        Ok(())
    }

    /// Every logical buffer without a parent becomes a physical buffer;
    /// every logical buffer points back at its root's physical buffer.
    fn make_physical_buffers(&mut self) {
        let mut physical_ids: HashMap<BufferId, PhysicalId> = HashMap::new();
        for buffer in &self.buffers {
            if buffer.parent.is_none() {
                let id = self.physical.len();
                physical_ids.insert(buffer.id, id);
                self.physical.push(PhysicalBuffer {
                    id,
                    owner: buffer.id,
                    location: buffer.location,
                    lifetime: buffer.lifetime,
                    size: bytes_of(buffer.dtype, &buffer.shape),
                    allocation: None,
                });
            }
        }

        for buffer in self.buffers.iter_mut() {
            let root = buffer.parent.as_ref().map_or(buffer.id, |d| d.parent);
            buffer.physical = Some(physical_ids[&root]);
        }
    }

    fn allocate_physical_buffers<T: Target>(&mut self, target: &T, module_type: &str) -> Result<()> {
        let mut allocators = target.register_allocators(module_type);

        // All of rdata lives through the module lifetime; a pre-seeded peak
        // lets concatenated modules share the region.
        if let Some(&usage) = self.max_usages.get(&MemoryLocation::Rdata) {
            if let Some(allocator) = allocators.get_mut(&MemoryLocation::Rdata) {
                allocator.base_offset(usage);
            }
        }

        let mut order: Vec<PhysicalId> = (0..self.physical.len()).collect();
        order.sort_by_key(|&id| (self.physical[id].lifetime.birth, id));

        for id in order {
            let buffer = &self.physical[id];
            let allocator = allocators.get_mut(&buffer.location).ok_or_else(|| {
                Error::UnsupportedFeature(format!(
                    "No allocator registered for {:?} memory",
                    buffer.location
                ))
            })?;
            allocator.mark(buffer)?;
        }

        for (&location, allocator) in allocators.iter_mut() {
            allocator.finish();
            self.max_usages.insert(location, allocator.max_usage());
        }

        for buffer in self.physical.iter_mut() {
            let span = allocators[&buffer.location].allocations()[&buffer.id];
            buffer.allocation = Some(span);
        }
        Ok(())
    }

    fn assign_allocations(&mut self, graph: &Graph) -> Result<()> {
        for id in post_order(graph)? {
            let node = graph.node(id);
            for port in 0..node.outputs.len() {
                let conn = OutputRef { node: id, port };
                let lbuf = &self.buffers[self.buffer_map[&conn]];
                let physical = lbuf
                    .physical
                    .and_then(|p| self.physical.get(p))
                    .ok_or_else(|| {
                        Error::InvalidGraph(format!(
                            "Buffer '{}' has no physical buffer",
                            lbuf.name
                        ))
                    })?;
                let memory = physical.allocation.ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "Physical buffer of '{}' was never placed",
                        lbuf.name
                    ))
                })?;
                let owner = &self.buffers[physical.owner];

                // A bitcast reinterprets its own shape; a concat child
                // occupies a window of its parent, with parent strides.
                let parent_shape = if lbuf.parent.is_some() && node.opcode() != OpCode::Bitcast {
                    owner.shape.clone()
                } else {
                    lbuf.shape.clone()
                };
                let strides = strides_of(&parent_shape);
                let mut start = memory.start;
                if let Some(desc) = &lbuf.parent {
                    start += lbuf.dtype.size_in_bytes() * element_offset(&strides, &desc.begin);
                }

                self.allocations.insert(
                    conn,
                    BufferAllocation {
                        location: owner.location,
                        dtype: lbuf.dtype,
                        size: bytes_of(lbuf.dtype, &lbuf.shape),
                        shape: lbuf.shape.clone(),
                        parent_shape,
                        strides,
                        start,
                    },
                );
            }
        }
        Ok(())
    }

    fn into_module_schedule(self, module_id: usize, module_name: String) -> ModuleSchedule {
        ModuleSchedule {
            module_id,
            module_name,
            compute_sequence: self.compute_sequence,
            allocations: self.allocations,
            logical_buffers: self.buffers,
            physical_buffers: self.physical,
            max_usages: self.max_usages,
        }
    }
}

/// Orchestrates scheduling of a model's main graph and subgraphs.
pub struct Scheduler<T: Target> {
    target: T,
    seed_usages: UsageMap,
}

impl<T: Target> Scheduler<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            seed_usages: UsageMap::new(),
        }
    }

    /// Pre-seed a region's peak usage so this schedule's allocations start
    /// past bytes already claimed by previously scheduled modules.
    pub fn seed_max_usage(&mut self, location: MemoryLocation, bytes: usize) {
        self.seed_usages.insert(location, bytes);
    }

    /// Schedule the main graph and each of its subgraphs, in that order.
    /// `skip_buffer_alias` keeps every bitcast and concat executing.
    pub fn schedule(&self, graph: &mut Graph, skip_buffer_alias: bool) -> Result<ScheduleResult> {
        let mut modules = Vec::with_capacity(1 + graph.subgraphs().len());
        modules.push(self.schedule_module(graph, 0, skip_buffer_alias)?);

        for index in 0..graph.subgraphs().len() {
            let module_id = index + 1;
            let subgraph = graph.subgraph_mut(index);
            modules.push(self.schedule_module(subgraph, module_id, skip_buffer_alias)?);
        }

        let module_order = (0..modules.len()).collect();
        Ok(ScheduleResult {
            modules,
            module_order,
        })
    }

    fn schedule_module(
        &self,
        graph: &mut Graph,
        module_id: usize,
        skip_buffer_alias: bool,
    ) -> Result<ModuleSchedule> {
        log::debug!("scheduling module '{}'", graph.name);
        let mut context = ScheduleContext::new(self.seed_usages.clone());

        liveness::make_logical_buffers(graph, &mut context.buffers, &mut context.buffer_map)?;
        if !skip_buffer_alias {
            alias::analyze_buffer_alias(graph, &mut context.buffers, &context.buffer_map)?;
        }
        alias::fix_concat_indices(graph, &mut context.buffers, &context.buffer_map)?;
        alias::fix_lifetime(graph, &mut context.buffers)?;
        context.generate_compute_sequence(graph)?;
        context.make_physical_buffers();
        context.allocate_physical_buffers(&self.target, &graph.module_type)?;
        context.assign_allocations(graph)?;

        log::debug!(
            "module '{}': {} action nodes, {} physical buffers",
            graph.name,
            context.compute_sequence.len(),
            context.physical.len()
        );
        Ok(context.into_module_schedule(module_id, graph.name.clone()))
    }
}

impl Scheduler<crate::schedule::allocator::DefaultTarget> {
    /// A scheduler with an unbounded first-fit allocator per location.
    pub fn with_default_target() -> Self {
        Self::new(crate::schedule::allocator::DefaultTarget)
    }
}
