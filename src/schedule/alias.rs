//! Buffer alias analysis.
//!
//! Rewrites `Bitcast` and `Concat` nodes into views: the node stops
//! executing and its output (or inputs, for concat) shares storage with
//! another value. Aliasing into output memory from input or rdata memory is
//! never allowed; such a bitcast keeps its ACTION bit and stays a copy.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{
    bytes_of, Graph, InputRef, MemoryLocation, NodeAttributes, NodeId, OpCode, OpKind, OutputRef,
};
use crate::schedule::buffers::{BufferId, LogicalBuffer, ParentDesc};
use crate::visitor::post_order;

type BufferMap = HashMap<OutputRef, BufferId>;

/// Mark view-like nodes as non-executing and record bitcast parent links.
/// Concat parent links are deferred to [`fix_concat_indices`], which needs
/// the whole cluster marked first.
pub(crate) fn analyze_buffer_alias(
    graph: &mut Graph,
    buffers: &mut [LogicalBuffer],
    buffer_map: &BufferMap,
) -> Result<()> {
    for id in post_order(graph)? {
        match graph.node(id).opcode() {
            OpCode::Bitcast => analyze_bitcast(graph, buffers, buffer_map, id)?,
            OpCode::Concat => analyze_concat(graph, buffers, buffer_map, id)?,
            _ => {}
        }
    }
    Ok(())
}

fn analyze_bitcast(
    graph: &mut Graph,
    buffers: &mut [LogicalBuffer],
    buffer_map: &BufferMap,
    id: NodeId,
) -> Result<()> {
    let input = graph.producer(InputRef { node: id, port: 0 })?;
    let in_buf = buffer_map[&input];
    let out_buf = buffer_map[&OutputRef { node: id, port: 0 }];

    if buffers[out_buf].location == MemoryLocation::Output
        && buffers[in_buf].location == MemoryLocation::Data
    {
        buffers[in_buf].location = MemoryLocation::Output;
    }

    // input & rdata must be copied to output, never viewed
    let copy_to_output = buffers[out_buf].location == MemoryLocation::Output
        && matches!(
            buffers[in_buf].location,
            MemoryLocation::Input | MemoryLocation::Rdata
        );
    if !copy_to_output {
        let begin = vec![0; graph.output_port(input).shape.len()];
        buffers[out_buf].parent = Some(ParentDesc {
            parent: in_buf,
            begin,
        });
        graph.node_mut(id).attributes.remove(NodeAttributes::ACTION);
    }
    Ok(())
}

fn analyze_concat(
    graph: &mut Graph,
    buffers: &mut [LogicalBuffer],
    buffer_map: &BufferMap,
    id: NodeId,
) -> Result<()> {
    let axis = match graph.node(id).op {
        OpKind::Concat { axis } => axis,
        _ => unreachable!(),
    };

    // Concatenation must be contiguous in row-major layout: axis 0, or
    // every dimension before the axis is 1.
    let first_shape = graph.input_shape(id, 0)?;
    let contiguous = axis == 0 || first_shape[..axis].iter().all(|&dim| dim == 1);
    if !contiguous {
        return Ok(());
    }

    // No input may come from a slice, or live in input/rdata memory.
    for port in 0..graph.node(id).inputs.len() {
        let producer = graph.producer(InputRef { node: id, port })?;
        let in_buf = &buffers[buffer_map[&producer]];
        if matches!(
            in_buf.location,
            MemoryLocation::Input | MemoryLocation::Rdata
        ) || graph.node(producer.node).opcode() == OpCode::Slice
        {
            return Ok(());
        }
    }

    // A value claimed by two concat parents would alias into both; keep
    // the node executing instead.
    let concat_consumers = graph
        .output_port(OutputRef { node: id, port: 0 })
        .consumers
        .iter()
        .filter(|c| graph.node(c.node).opcode() == OpCode::Concat)
        .count();
    if concat_consumers >= 2 {
        return Ok(());
    }

    // Parent links are fixed later, once the whole cluster is known.
    graph.node_mut(id).attributes.remove(NodeAttributes::ACTION);
    Ok(())
}

/// First concat node consuming `node`'s output, if any
fn direct_concat_consumer(graph: &Graph, node: NodeId) -> Option<NodeId> {
    graph
        .output_port(OutputRef { node, port: 0 })
        .consumers
        .iter()
        .find(|c| graph.node(c.node).opcode() == OpCode::Concat)
        .map(|c| c.node)
}

/// Extent along `axis` of each input of a concat node
fn concat_dims(graph: &Graph, node: NodeId, axis: usize) -> Result<Vec<usize>> {
    (0..graph.node(node).inputs.len())
        .map(|port| Ok(graph.input_shape(node, port)?[axis]))
        .collect()
}

/// Resolve every non-executing concat's inputs to absolute offsets into the
/// outermost output buffer of its concat chain.
pub(crate) fn fix_concat_indices(
    graph: &Graph,
    buffers: &mut [LogicalBuffer],
    buffer_map: &BufferMap,
) -> Result<()> {
    for id in post_order(graph)? {
        let node = graph.node(id);
        if node.opcode() != OpCode::Concat || node.is_action() {
            continue;
        }
        let axis = match node.op {
            OpKind::Concat { axis } => axis,
            _ => unreachable!(),
        };

        // 1. Running offsets along the axis for this concat's own inputs.
        let out_buf = buffer_map[&OutputRef { node: id, port: 0 }];
        let mut cnt_begin = vec![0; graph.input_shape(id, 0)?.len()];
        for port in 0..node.inputs.len() {
            let producer = graph.producer(InputRef { node: id, port })?;
            let in_buf = buffer_map[&producer];
            buffers[in_buf].parent = Some(ParentDesc {
                parent: out_buf,
                begin: cnt_begin.clone(),
            });
            cnt_begin[axis] += graph.input_shape(id, port)?[axis];
        }

        // 2. Climb the chain of enclosing concats, translating the offsets
        //    recorded in step 1 into each outer output.
        let mut child = id;
        loop {
            let parent = match direct_concat_consumer(graph, child) {
                Some(p) if !graph.node(p).is_action() => p,
                _ => break,
            };
            let child_out = OutputRef {
                node: child,
                port: 0,
            };
            let index = graph.input_index_of(parent, child_out).ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "Concat '{}' does not consume '{}'",
                    graph.node(parent).name,
                    graph.node(child).name
                ))
            })?;
            let parent_axis = match graph.node(parent).op {
                OpKind::Concat { axis } => axis,
                _ => unreachable!(),
            };
            let dims = concat_dims(graph, parent, parent_axis)?;
            let mut child_begin = vec![0; graph.output_port(child_out).shape.len()];
            child_begin[parent_axis] = dims[..index].iter().sum();

            let child_buf = buffer_map[&child_out];
            let parent_buf = buffer_map[&OutputRef {
                node: parent,
                port: 0,
            }];
            buffers[child_buf].parent = Some(ParentDesc {
                parent: parent_buf,
                begin: child_begin.clone(),
            });
            for port in 0..graph.node(id).inputs.len() {
                let producer = graph.producer(InputRef { node: id, port })?;
                let in_buf = buffer_map[&producer];
                let desc = match buffers[in_buf].parent.as_mut() {
                    Some(desc) => desc,
                    None => {
                        return Err(Error::InvalidGraph(format!(
                            "Input {} of concat '{}' has no recorded offset",
                            port,
                            graph.node(id).name
                        )))
                    }
                };
                desc.parent = parent_buf;
                for (b, d) in desc.begin.iter_mut().zip(&child_begin) {
                    *b += d;
                }
            }

            child = parent;
        }
    }
    Ok(())
}

/// Flatten parent chains to one link and union each alias family's
/// lifetimes into its root.
pub(crate) fn fix_lifetime(graph: &Graph, buffers: &mut [LogicalBuffer]) -> Result<()> {
    // Flatten: a view of a view becomes a view of the root.
    for i in 0..buffers.len() {
        let Some(mut desc) = buffers[i].parent.clone() else {
            continue;
        };
        let mut steps = 0;
        while let Some(grand) = buffers[desc.parent].parent.clone() {
            desc = grand;
            steps += 1;
            if steps > buffers.len() {
                return Err(Error::CyclicAlias(buffers[i].name.clone()));
            }
        }
        if desc.parent == i {
            return Err(Error::CyclicAlias(buffers[i].name.clone()));
        }
        buffers[i].parent = Some(desc);
    }

    validate_parents(graph, buffers)?;

    // Extend each root's lifetime to cover its whole alias family.
    for i in 0..buffers.len() {
        if let Some(desc) = buffers[i].parent.clone() {
            let lifetime = buffers[i].lifetime;
            let parent = &mut buffers[desc.parent].lifetime;
            let birth = lifetime.birth.min(parent.birth);
            let end = lifetime.end().max(parent.end());
            parent.birth = birth;
            parent.age = end - birth;
        }
    }
    Ok(())
}

/// The alias relation must be a forest of depth one, and every view must
/// fit inside its parent. A bitcast reinterprets the parent's shape, so it
/// is held to byte containment from the origin; every other view occupies a
/// dimension-wise window.
fn validate_parents(graph: &Graph, buffers: &[LogicalBuffer]) -> Result<()> {
    for buffer in buffers {
        let Some(desc) = &buffer.parent else {
            continue;
        };
        let parent = &buffers[desc.parent];
        if parent.parent.is_some() {
            return Err(Error::CyclicAlias(format!(
                "'{}' still has a chained parent after flattening",
                buffer.name
            )));
        }
        let reinterprets = graph.node(buffer.owner.node).opcode() == OpCode::Bitcast;
        if !reinterprets
            && desc.begin.len() == parent.shape.len()
            && desc.begin.len() == buffer.shape.len()
        {
            for d in 0..desc.begin.len() {
                if desc.begin[d] + buffer.shape[d] > parent.shape[d] {
                    return Err(Error::ParentOutOfRange(format!(
                        "'{}' at {:?} with shape {:?} exceeds parent '{}' shape {:?}",
                        buffer.name, desc.begin, buffer.shape, parent.name, parent.shape
                    )));
                }
            }
        } else {
            let origin = desc.begin.iter().all(|&b| b == 0);
            let fits =
                bytes_of(buffer.dtype, &buffer.shape) <= bytes_of(parent.dtype, &parent.shape);
            if !origin || !fits {
                return Err(Error::ParentOutOfRange(format!(
                    "'{}' with shape {:?} does not fit parent '{}' shape {:?}",
                    buffer.name, buffer.shape, parent.name, parent.shape
                )));
            }
        }
    }
    Ok(())
}
