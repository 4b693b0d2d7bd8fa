//! Relay-style graph traversal.
//!
//! All scheduling passes walk the graph the same way: a depth-first
//! post-order starting from the output-sink nodes, so every producer is
//! visited before any of its consumers. The walk is deterministic because
//! children are pushed in fixed input-port order.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::{Graph, NodeId};

enum Frame {
    Enter(NodeId),
    Exit(NodeId),
}

/// Post-order over the nodes reachable from the graph's output sinks.
pub fn post_order(graph: &Graph) -> Result<Vec<NodeId>> {
    post_order_from(graph, graph.outputs())
}

/// Post-order over the nodes reachable from `sinks`. Each reachable node
/// appears exactly once; a cycle is reported as an invalid graph.
pub fn post_order_from(graph: &Graph, sinks: &[NodeId]) -> Result<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut stack: Vec<Frame> = sinks.iter().rev().map(|&id| Frame::Enter(id)).collect();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(id) => {
                if visited.contains(&id) {
                    continue;
                }
                if !on_stack.insert(id) {
                    return Err(Error::InvalidGraph(format!(
                        "Cycle detected in graph at node '{}'",
                        graph.node(id).name
                    )));
                }
                stack.push(Frame::Exit(id));
                // Producers are visited first, in input-port order.
                let node = graph.node(id);
                for port in (0..node.inputs.len()).rev() {
                    let producer = graph.producer(crate::model::InputRef { node: id, port })?;
                    if !visited.contains(&producer.node) {
                        stack.push(Frame::Enter(producer.node));
                    }
                }
            }
            Frame::Exit(id) => {
                on_stack.remove(&id);
                visited.insert(id);
                order.push(id);
            }
        }
    }

    Ok(order)
}
