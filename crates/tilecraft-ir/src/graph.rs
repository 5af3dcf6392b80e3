use serde::{Deserialize, Serialize};

use crate::{GemmView, GraphError, ShapeFingerprint, Stage, TensorDesc};

/// Identifies a node inside one [operator graph](OperatorGraph).
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("#{_0}")]
pub struct NodeId(pub usize);

/// What a node does.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// A computation stage.
    Compute(Stage),
    /// The fusion boundary: its single input is a result of the graph.
    Output,
}

/// A node of an operator graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub operation: Operation,
    /// Ordered input descriptors.
    pub inputs: Vec<TensorDesc>,
    pub output: TensorDesc,
    /// Producer of each input, `None` for inputs supplied by the caller.
    pub producers: Vec<Option<NodeId>>,
}

impl Node {
    /// The stage of a compute node.
    pub fn stage(&self) -> Option<&Stage> {
        match &self.operation {
            Operation::Compute(stage) => Some(stage),
            Operation::Output => None,
        }
    }
}

/// Incrementally builds an [OperatorGraph], validating every edge as it is added.
///
/// Nodes can only consume nodes added before them, which keeps the graph acyclic.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Node>,
    last: Option<NodeId>,
}

impl GraphBuilder {
    /// Start a new graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            last: None,
        }
    }

    /// Add a stage with all its inputs unconnected.
    pub fn stage(&mut self, stage: Stage) -> Result<NodeId, GraphError> {
        stage.validate()?;

        let id = NodeId(self.nodes.len());
        let inputs = stage.inputs();
        let output = stage.output();

        self.nodes.push(Node {
            id,
            producers: vec![None; inputs.len()],
            inputs,
            output,
            operation: Operation::Compute(stage),
        });
        self.last = Some(id);

        Ok(id)
    }

    /// Feed the output of `producer` into input `input` of `consumer`.
    pub fn connect(
        &mut self,
        producer: NodeId,
        consumer: NodeId,
        input: usize,
    ) -> Result<(), GraphError> {
        let producer_node = self.node(producer)?;
        if matches!(producer_node.operation, Operation::Output) {
            return Err(GraphError::OutputAsProducer(producer));
        }
        let actual = producer_node.output.clone();
        let consumer_node = self.node(consumer)?;
        if producer >= consumer {
            return Err(GraphError::Cycle { producer, consumer });
        }
        let arity = consumer_node.inputs.len();
        if input >= arity {
            return Err(GraphError::InvalidInput {
                node: consumer,
                input,
                arity,
            });
        }
        if consumer_node.producers[input].is_some() {
            return Err(GraphError::AlreadyConnected {
                node: consumer,
                input,
            });
        }
        let expected = &consumer_node.inputs[input];
        if expected != &actual {
            return Err(GraphError::DescriptorMismatch {
                producer,
                consumer,
                input,
                expected: expected.clone(),
                actual,
            });
        }

        self.nodes[consumer.0].producers[input] = Some(producer);
        Ok(())
    }

    /// Add a stage consuming the previously added stage on its first input.
    pub fn chain(&mut self, stage: Stage) -> Result<NodeId, GraphError> {
        let previous = self.last;
        let id = self.stage(stage)?;

        if let Some(previous) = previous {
            if let Err(err) = self.connect(previous, id, 0) {
                self.nodes.pop();
                self.last = Some(previous);
                return Err(err);
            }
        }

        Ok(id)
    }

    /// Mark the output of `producer` as a result of the graph.
    pub fn output(&mut self, producer: NodeId) -> Result<NodeId, GraphError> {
        let producer_node = self.node(producer)?;
        if matches!(producer_node.operation, Operation::Output) {
            return Err(GraphError::OutputAsProducer(producer));
        }
        let desc = producer_node.output.clone();
        let id = NodeId(self.nodes.len());

        self.nodes.push(Node {
            id,
            operation: Operation::Output,
            inputs: vec![desc.clone()],
            output: desc,
            producers: vec![Some(producer)],
        });

        Ok(id)
    }

    /// Finish the graph.
    pub fn build(self) -> Result<OperatorGraph, GraphError> {
        if !self.nodes.iter().any(|node| node.stage().is_some()) {
            return Err(GraphError::Empty);
        }
        let outputs: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|node| matches!(node.operation, Operation::Output))
            .map(|node| node.id)
            .collect();
        if outputs.is_empty() {
            return Err(GraphError::NoOutput);
        }

        Ok(OperatorGraph {
            name: self.name,
            nodes: self.nodes,
            outputs,
        })
    }

    fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownNode(id))
    }
}

/// A validated DAG of stages with designated output nodes.
///
/// Read-only once built; share it behind an `Arc` across build workers. Deserialized graphs are
/// replayed through a [GraphBuilder].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphParts")]
pub struct OperatorGraph {
    name: String,
    nodes: Vec<Node>,
    outputs: Vec<NodeId>,
}

#[derive(Deserialize)]
struct GraphParts {
    name: String,
    nodes: Vec<Node>,
    outputs: Vec<NodeId>,
}

impl TryFrom<GraphParts> for OperatorGraph {
    type Error = GraphError;

    fn try_from(parts: GraphParts) -> Result<Self, Self::Error> {
        let mut builder = GraphBuilder::new(parts.name);

        for (position, node) in parts.nodes.iter().enumerate() {
            if node.id != NodeId(position) {
                return Err(GraphError::Inconsistent(node.id));
            }
            match &node.operation {
                Operation::Compute(stage) => {
                    builder.stage(stage.clone())?;
                    for (input, producer) in node.producers.iter().enumerate() {
                        if let Some(producer) = producer {
                            builder.connect(*producer, node.id, input)?;
                        }
                    }
                }
                Operation::Output => match node.producers.as_slice() {
                    [Some(producer)] => {
                        builder.output(*producer)?;
                    }
                    _ => return Err(GraphError::Inconsistent(node.id)),
                },
            }
        }

        let graph = builder.build()?;
        if let Some(node) = graph
            .nodes
            .iter()
            .zip(parts.nodes.iter())
            .find(|(built, parsed)| built != parsed)
        {
            return Err(GraphError::Inconsistent(node.0.id));
        }
        if graph.outputs != parts.outputs {
            return Err(GraphError::Inconsistent(
                parts.outputs.first().copied().unwrap_or(NodeId(0)),
            ));
        }

        Ok(graph)
    }
}

impl OperatorGraph {
    /// Chain `stages` one after the other and mark the last one as the output.
    pub fn fused(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self, GraphError> {
        let mut builder = GraphBuilder::new(name);
        let mut last = None;
        for stage in stages {
            last = Some(builder.chain(stage)?);
        }
        let last = last.ok_or(GraphError::Empty)?;
        builder.output(last)?;
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Compute stages in insertion order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.nodes.iter().filter_map(Node::stage)
    }

    /// Descriptors of the inputs the caller must supply, in node then input order.
    pub fn inputs(&self) -> Vec<TensorDesc> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.inputs
                    .iter()
                    .zip(node.producers.iter())
                    .filter(|(_, producer)| producer.is_none())
                    .map(|(desc, _)| desc.clone())
            })
            .collect()
    }

    /// The first compute-heavy stage, which drives the schedule.
    pub fn anchor(&self) -> Option<&Stage> {
        self.stages().find(|stage| stage.gemm().is_some())
    }

    /// The anchor stage seen as a matrix multiplication.
    pub fn gemm(&self) -> Option<GemmView> {
        self.anchor().and_then(Stage::gemm)
    }

    /// Number of stages fused after the anchor.
    pub fn epilogue_len(&self) -> usize {
        self.stages()
            .skip_while(|stage| stage.gemm().is_none())
            .skip(1)
            .count()
    }

    /// Arithmetic operations of the whole graph.
    pub fn flops(&self) -> u64 {
        self.stages().map(Stage::flops).sum()
    }

    /// Fingerprint identifying the search problem of this graph.
    pub fn fingerprint(&self) -> ShapeFingerprint {
        ShapeFingerprint::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Conv2d, ElemType, Matmul};
    use pretty_assertions::assert_eq;

    fn conv() -> Conv2d {
        Conv2d::new(128, 512, 7, 7, 2048, 1, 1, 1, 1, 0, ElemType::F16)
    }

    fn conv_epilogue() -> Vec<Stage> {
        let shape = vec![128, 7, 7, 2048];
        vec![
            Stage::Conv2d(conv()),
            Stage::BiasAdd {
                shape: shape.clone(),
                dtype: ElemType::F16,
            },
            Stage::Relu {
                shape,
                dtype: ElemType::F16,
            },
        ]
    }

    #[test]
    fn fused_graph_keeps_epilogue() {
        let graph = OperatorGraph::fused("conv_bias_relu", conv_epilogue()).unwrap();

        assert_eq!(graph.nodes().len(), 4);
        assert_eq!(graph.outputs(), &[NodeId(3)]);
        assert_eq!(graph.epilogue_len(), 2);
        assert_eq!(graph.flops(), 2 * 128 * 2048 * 7 * 7 * 512);
        // input, weight and bias
        assert_eq!(graph.inputs().len(), 3);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let mut builder = GraphBuilder::new("bad");
        let conv = builder.stage(Stage::Conv2d(conv())).unwrap();
        let relu = builder
            .stage(Stage::Relu {
                shape: vec![128, 14, 14, 2048],
                dtype: ElemType::F16,
            })
            .unwrap();

        let err = builder.connect(conv, relu, 0).unwrap_err();

        match err {
            GraphError::DescriptorMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected.shape, vec![128, 14, 14, 2048]);
                assert_eq!(actual.shape, vec![128, 7, 7, 2048]);
            }
            err => panic!("Unexpected error {err}"),
        }
    }

    #[test]
    fn mismatched_dtypes_are_rejected() {
        let mut builder = GraphBuilder::new("bad");
        builder
            .stage(Stage::Matmul(Matmul::new(16, 16, 16, ElemType::F16)))
            .unwrap();

        let err = builder
            .chain(Stage::Relu {
                shape: vec![16, 16],
                dtype: ElemType::F32,
            })
            .unwrap_err();

        assert!(matches!(err, GraphError::DescriptorMismatch { .. }));
    }

    #[test]
    fn edges_must_go_forward() {
        let mut builder = GraphBuilder::new("cycle");
        let a = builder
            .stage(Stage::Relu {
                shape: vec![4],
                dtype: ElemType::F32,
            })
            .unwrap();
        let b = builder
            .chain(Stage::Relu {
                shape: vec![4],
                dtype: ElemType::F32,
            })
            .unwrap();

        assert_eq!(
            builder.connect(b, a, 0),
            Err(GraphError::Cycle {
                producer: b,
                consumer: a
            })
        );
        assert_eq!(
            builder.connect(a, b, 0),
            Err(GraphError::AlreadyConnected { node: b, input: 0 })
        );
        assert_eq!(
            builder.connect(a, NodeId(7), 0),
            Err(GraphError::UnknownNode(NodeId(7)))
        );
    }

    #[test]
    fn graph_needs_an_output() {
        let mut builder = GraphBuilder::new("no_output");
        builder
            .stage(Stage::Matmul(Matmul::new(16, 16, 16, ElemType::F16)))
            .unwrap();

        assert_eq!(builder.build(), Err(GraphError::NoOutput));
    }

    fn tampered(
        graph: &OperatorGraph,
        edit: impl FnOnce(&mut serde_json::Value),
    ) -> serde_json::Value {
        let mut value = serde_json::to_value(graph).unwrap();
        edit(&mut value);
        value
    }

    #[test]
    fn deserialized_graphs_are_replayed() {
        let graph = OperatorGraph::fused("conv_bias_relu", conv_epilogue()).unwrap();
        let json = serde_json::to_string(&graph).unwrap();

        assert_eq!(serde_json::from_str::<OperatorGraph>(&json).unwrap(), graph);

        let wrong_desc = tampered(&graph, |value| {
            value["nodes"][1]["inputs"][0]["shape"] = serde_json::json!([1]);
        });
        let err = serde_json::from_value::<OperatorGraph>(wrong_desc).unwrap_err();
        assert!(err.to_string().contains("#1"));

        let backward_edge = tampered(&graph, |value| {
            value["nodes"][1]["producers"][0] = serde_json::json!(2);
        });
        assert!(serde_json::from_value::<OperatorGraph>(backward_edge).is_err());

        let wrong_outputs = tampered(&graph, |value| {
            value["outputs"] = serde_json::json!([1]);
        });
        assert!(serde_json::from_value::<OperatorGraph>(wrong_outputs).is_err());
    }
}
