//! Lifetime recording.
//!
//! Simulates one execution of the module in post-order and derives the
//! `[birth, end]` residency interval of every logical buffer from the tick
//! at which it is produced and the tick at which its last consumer runs.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{Graph, InputRef, MemoryLocation, OpCode, OutputRef};
use crate::schedule::buffers::{BufferId, Lifetime, LogicalBuffer};
use crate::visitor::post_order;

/// The memory location a value is born into. Inputs and constants are
/// pinned to their regions; a value consumed by an output sink lands in
/// output memory; everything else keeps the port's declared location.
pub(crate) fn decide_memory_location(graph: &Graph, conn: OutputRef) -> MemoryLocation {
    let node = graph.node(conn.node);
    match node.opcode() {
        OpCode::Input => MemoryLocation::Input,
        OpCode::Constant => MemoryLocation::Rdata,
        _ => {
            let port = graph.output_port(conn);
            let feeds_output = port
                .consumers
                .iter()
                .any(|c| graph.node(c.node).opcode() == OpCode::Output);
            if feeds_output {
                MemoryLocation::Output
            } else {
                port.location
            }
        }
    }
}

pub(crate) struct LifetimeRecorder<'a> {
    buffers: &'a mut Vec<LogicalBuffer>,
    buffer_map: &'a mut HashMap<OutputRef, BufferId>,
    age: usize,
}

impl<'a> LifetimeRecorder<'a> {
    pub fn new(
        buffers: &'a mut Vec<LogicalBuffer>,
        buffer_map: &'a mut HashMap<OutputRef, BufferId>,
    ) -> Self {
        Self {
            buffers,
            buffer_map,
            age: 0,
        }
    }

    fn allocate(&mut self, graph: &Graph, conn: OutputRef) {
        if self.buffer_map.contains_key(&conn) {
            return;
        }
        let id = self.buffers.len();
        let port = graph.output_port(conn);
        let lifetime = Lifetime::new(self.age, port.consumers.len());
        self.buffers.push(LogicalBuffer {
            id,
            owner: conn,
            name: graph.value_name(conn),
            dtype: port.dtype,
            shape: port.shape.clone(),
            location: decide_memory_location(graph, conn),
            lifetime,
            parent: None,
            physical: None,
        });
        self.buffer_map.insert(conn, id);
    }

    fn release(&mut self, conn: OutputRef) -> Result<()> {
        if let Some(&id) = self.buffer_map.get(&conn) {
            let buffer = &mut self.buffers[id];
            if !buffer.lifetime.is_alive() {
                return Err(Error::ReleasedBufferFreed(buffer.name.clone()));
            }
            buffer.lifetime.used_count -= 1;
        }
        Ok(())
    }

    fn grow_age(&mut self) {
        self.age += 1;
        for buffer in self.buffers.iter_mut() {
            if buffer.lifetime.is_alive() {
                buffer.lifetime.age += 1;
            }
        }
    }
}

/// Create one logical buffer per reachable output port, with birth/death
/// ticks bounding the interval during which it must be resident.
pub(crate) fn make_logical_buffers(
    graph: &Graph,
    buffers: &mut Vec<LogicalBuffer>,
    buffer_map: &mut HashMap<OutputRef, BufferId>,
) -> Result<()> {
    let mut recorder = LifetimeRecorder::new(buffers, buffer_map);
    for id in post_order(graph)? {
        let node = graph.node(id);
        for port in 0..node.outputs.len() {
            recorder.allocate(graph, OutputRef { node: id, port });
        }

        recorder.grow_age();

        for port in 0..node.inputs.len() {
            let producer = graph.producer(InputRef { node: id, port })?;
            recorder.release(producer)?;
        }
    }
    log::trace!(
        "module '{}': {} logical buffers recorded",
        graph.name,
        buffers.len()
    );
    Ok(())
}
