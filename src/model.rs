use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// Unique identifier for a node within its graph
pub type NodeId = usize;

/// Tensor shape as a list of dimension extents
pub type Shape = Vec<usize>;

/// Datatypes the scheduler sizes buffers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    Float32,
    Float16,
    BFloat16,
    Int64,
    Int32,
    Int8,
    UInt8,
    Bool,
}

impl DataType {
    /// Get the size in bytes of one element
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float16 => 2,
            DataType::BFloat16 => 2,
            DataType::Int64 => 8,
            DataType::Int32 => 4,
            DataType::Int8 => 1,
            DataType::UInt8 => 1,
            DataType::Bool => 1,
        }
    }

    /// Check if the data type is a floating point type
    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            DataType::Float32 | DataType::Float16 | DataType::BFloat16
        )
    }
}

/// Memory region classes a buffer can live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MemoryLocation {
    /// Caller-provided input region
    Input,
    /// Caller-visible output region
    Output,
    /// Read-only constant region baked into the module image
    Rdata,
    /// General scratch region
    Data,
    /// Target-specific on-chip region
    Sram,
}

impl MemoryLocation {
    pub const ALL: [MemoryLocation; 5] = [
        MemoryLocation::Input,
        MemoryLocation::Output,
        MemoryLocation::Rdata,
        MemoryLocation::Data,
        MemoryLocation::Sram,
    ];
}

/// Runtime opcode tag shared by all node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpCode {
    Input,
    Output,
    Constant,
    Bitcast,
    Concat,
    Slice,
    MatMul,
    Conv2d,
    Reduce,
    Binary,
    Unary,
}

/// Node kind: the opcode tag plus any per-operation payload
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Input,
    Output,
    Constant { data: Vec<u8> },
    /// Shape reinterpretation; never moves bytes
    Bitcast,
    Concat { axis: usize },
    Slice { begin: Vec<usize>, end: Vec<usize> },
    MatMul,
    Conv2d,
    Reduce,
    Binary,
    Unary,
}

impl OpKind {
    pub fn opcode(&self) -> OpCode {
        match self {
            OpKind::Input => OpCode::Input,
            OpKind::Output => OpCode::Output,
            OpKind::Constant { .. } => OpCode::Constant,
            OpKind::Bitcast => OpCode::Bitcast,
            OpKind::Concat { .. } => OpCode::Concat,
            OpKind::Slice { .. } => OpCode::Slice,
            OpKind::MatMul => OpCode::MatMul,
            OpKind::Conv2d => OpCode::Conv2d,
            OpKind::Reduce => OpCode::Reduce,
            OpKind::Binary => OpCode::Binary,
            OpKind::Unary => OpCode::Unary,
        }
    }
}

/// Node attribute bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeAttributes(u32);

impl NodeAttributes {
    /// The node performs computation at runtime
    pub const ACTION: NodeAttributes = NodeAttributes(1);

    pub const NONE: NodeAttributes = NodeAttributes(0);

    pub fn contains(&self, other: NodeAttributes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: NodeAttributes) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: NodeAttributes) {
        self.0 &= !other.0;
    }
}

/// Reference to an output port: `(producing node, port index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: usize,
}

/// Reference to an input port: `(consuming node, port index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InputRef {
    pub node: NodeId,
    pub port: usize,
}

/// An output port carries the produced value's type, shape and preferred
/// memory location, and tracks every input port consuming it.
#[derive(Debug, Clone)]
pub struct OutputPort {
    pub dtype: DataType,
    pub shape: Shape,
    pub location: MemoryLocation,
    pub consumers: Vec<InputRef>,
}

/// An input port is connected to exactly one producing output port.
#[derive(Debug, Clone)]
pub struct InputPort {
    pub connection: Option<OutputRef>,
}

/// Node in the computation graph: a shared header (opcode tag, attribute
/// bits, ports) plus the per-kind payload in `op`.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: OpKind,
    pub attributes: NodeAttributes,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
}

impl Node {
    pub fn opcode(&self) -> OpCode {
        self.op.opcode()
    }

    pub fn is_action(&self) -> bool {
        self.attributes.contains(NodeAttributes::ACTION)
    }
}

/// Directed acyclic computation graph with arena-stored nodes.
///
/// Nodes are addressed by index; ports by `(node, port)` references. A graph
/// owns its subgraphs (used by control-flow operators); each subgraph is
/// scheduled independently after the main graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub module_type: String,
    nodes: Vec<Node>,
    outputs: Vec<NodeId>,
    subgraphs: Vec<Graph>,
}

impl Graph {
    pub fn new(name: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_type: module_type.into(),
            nodes: Vec::new(),
            outputs: Vec::new(),
            subgraphs: Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// The graph's output-sink nodes, in declaration order
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn subgraphs(&self) -> &[Graph] {
        &self.subgraphs
    }

    pub fn subgraph_mut(&mut self, index: usize) -> &mut Graph {
        &mut self.subgraphs[index]
    }

    pub fn add_subgraph(&mut self, subgraph: Graph) -> usize {
        self.subgraphs.push(subgraph);
        self.subgraphs.len() - 1
    }

    /// Add a node with the given inputs and output port specs. Computing
    /// opcodes get the ACTION attribute; `Input`, `Output` and `Constant`
    /// do not execute at runtime.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: OpKind,
        inputs: &[OutputRef],
        output_specs: Vec<(DataType, Shape)>,
    ) -> NodeId {
        let id = self.nodes.len();
        let mut attributes = NodeAttributes::NONE;
        if !matches!(op, OpKind::Input | OpKind::Output | OpKind::Constant { .. }) {
            attributes.insert(NodeAttributes::ACTION);
        }

        let outputs = output_specs
            .into_iter()
            .map(|(dtype, shape)| OutputPort {
                dtype,
                shape,
                location: MemoryLocation::Data,
                consumers: Vec::new(),
            })
            .collect();

        self.nodes.push(Node {
            id,
            name: name.into(),
            op,
            attributes,
            inputs: vec![InputPort { connection: None }; inputs.len()],
            outputs,
        });

        for (port, &from) in inputs.iter().enumerate() {
            self.connect(from, InputRef { node: id, port });
        }

        id
    }

    /// Add a graph input node; returns its single output port.
    pub fn add_input(
        &mut self,
        name: impl Into<String>,
        dtype: DataType,
        shape: Shape,
    ) -> OutputRef {
        let node = self.add_node(name, OpKind::Input, &[], vec![(dtype, shape)]);
        OutputRef { node, port: 0 }
    }

    /// Add a constant node carrying raw data bytes; returns its output port.
    pub fn add_constant(
        &mut self,
        name: impl Into<String>,
        dtype: DataType,
        shape: Shape,
        data: Vec<u8>,
    ) -> OutputRef {
        let node = self.add_node(name, OpKind::Constant { data }, &[], vec![(dtype, shape)]);
        OutputRef { node, port: 0 }
    }

    /// Add an output-sink node consuming `from` and register it as a graph
    /// output.
    pub fn add_output(&mut self, name: impl Into<String>, from: OutputRef) -> NodeId {
        let node = self.add_node(name, OpKind::Output, &[from], vec![]);
        self.outputs.push(node);
        node
    }

    /// Connect an output port to an input port, maintaining the consumer
    /// list on the producing side. Reconnecting an input detaches it from
    /// its previous producer first.
    pub fn connect(&mut self, from: OutputRef, to: InputRef) {
        if let Some(old) = self.nodes[to.node].inputs[to.port].connection {
            self.nodes[old.node].outputs[old.port]
                .consumers
                .retain(|c| *c != to);
        }
        self.nodes[to.node].inputs[to.port].connection = Some(from);
        self.nodes[from.node].outputs[from.port].consumers.push(to);
    }

    pub fn output_port(&self, r: OutputRef) -> &OutputPort {
        &self.nodes[r.node].outputs[r.port]
    }

    pub fn output_port_mut(&mut self, r: OutputRef) -> &mut OutputPort {
        &mut self.nodes[r.node].outputs[r.port]
    }

    /// The producer connected to an input port
    pub fn producer(&self, r: InputRef) -> Result<OutputRef> {
        self.nodes[r.node].inputs[r.port].connection.ok_or_else(|| {
            Error::InvalidGraph(format!(
                "Input port {} of node '{}' is not connected",
                r.port, self.nodes[r.node].name
            ))
        })
    }

    /// Shape of the value arriving at an input port
    pub fn input_shape(&self, node: NodeId, port: usize) -> Result<&Shape> {
        let producer = self.producer(InputRef { node, port })?;
        Ok(&self.output_port(producer).shape)
    }

    /// Position of the input port of `node` that `from` feeds, if any
    pub fn input_index_of(&self, node: NodeId, from: OutputRef) -> Option<usize> {
        self.nodes[node]
            .inputs
            .iter()
            .position(|p| p.connection == Some(from))
    }

    /// A human-readable label for an output port, used in diagnostics
    pub fn value_name(&self, r: OutputRef) -> String {
        let node = &self.nodes[r.node];
        if node.outputs.len() == 1 {
            node.name.clone()
        } else {
            format!("{}:{}", node.name, r.port)
        }
    }
}

/// Total size in bytes of a tensor of the given datatype and shape
pub fn bytes_of(dtype: DataType, shape: &[usize]) -> usize {
    shape.iter().product::<usize>() * dtype.size_in_bytes()
}

/// Row-major strides (in elements) over a shape
pub fn strides_of(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Element offset of a position given row-major strides
pub fn element_offset(strides: &[usize], begin: &[usize]) -> usize {
    strides.iter().zip(begin.iter()).map(|(s, b)| s * b).sum()
}

/// Map from memory location to byte count, used for peak-usage reports
pub type UsageMap = HashMap<MemoryLocation, usize>;
