use crate::{NodeId, TensorDesc};
use thiserror::Error;

/// Errors raised while constructing an operator graph or its search space.
///
/// These are fatal for a search: a graph that fails to build never reaches the policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A producer's output doesn't match the consumer's input.
    #[error(
        "Output of node {producer} doesn't match input {input} of node {consumer}\n  expected: {expected}\n  actual:   {actual}"
    )]
    DescriptorMismatch {
        /// The producing node.
        producer: NodeId,
        /// The consuming node.
        consumer: NodeId,
        /// Index of the consumer input.
        input: usize,
        /// The descriptor the consumer expects.
        expected: TensorDesc,
        /// The descriptor the producer outputs.
        actual: TensorDesc,
    },

    /// A stage payload is inconsistent.
    #[error("Invalid {stage} stage: {reason}")]
    InvalidStage {
        /// Name of the stage kind.
        stage: &'static str,
        /// Why the payload is invalid.
        reason: String,
    },

    /// The node doesn't exist in the graph.
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// The consumer has no input at this index.
    #[error("Node {node} has {arity} inputs, can't connect input {input}")]
    InvalidInput {
        /// The consuming node.
        node: NodeId,
        /// The requested input.
        input: usize,
        /// Number of inputs of the node.
        arity: usize,
    },

    /// The input was already connected to a producer.
    #[error("Input {input} of node {node} is already connected")]
    AlreadyConnected {
        /// The consuming node.
        node: NodeId,
        /// The input index.
        input: usize,
    },

    /// Edges must go from an earlier node to a later node.
    #[error("Edge {producer} -> {consumer} would not keep the graph acyclic")]
    Cycle {
        /// The producing node.
        producer: NodeId,
        /// The consuming node.
        consumer: NodeId,
    },

    /// Output nodes can't feed other nodes.
    #[error("Output node {0} can't be used as a producer")]
    OutputAsProducer(NodeId),

    /// The graph has no output node.
    #[error("The graph has no output node")]
    NoOutput,

    /// The graph has no stage.
    #[error("The graph has no stage")]
    Empty,

    /// The packed bit width doesn't fit the storage element.
    #[error("Can't pack {bits}-bit values into {storage_bits}-bit storage elements")]
    InvalidPacking {
        /// Bit width of a value.
        bits: u8,
        /// Bit width of the storage element.
        storage_bits: usize,
    },

    /// No configuration satisfies the graph shapes and the hardware limits.
    #[error("No valid schedule exists for graph {graph} on {hardware}")]
    EmptySearchSpace {
        /// Fingerprint key of the graph.
        graph: String,
        /// Name of the hardware profile.
        hardware: String,
    },

    /// A deserialized node doesn't match the node its stage produces.
    #[error("Node {0} doesn't match its stage or its edges")]
    Inconsistent(NodeId),

    /// The hardware profile is inconsistent.
    #[error("Invalid hardware profile {name}: {reason}")]
    InvalidHardware {
        /// Name of the profile.
        name: String,
        /// Why the profile is invalid.
        reason: String,
    },
}
