use core::fmt::Display;
use serde::{Deserialize, Serialize};
use tilecraft_common::hash::{StableHash, StableHasher, hex};

use crate::{Operation, OperatorGraph};

/// Identifies a unique search problem.
///
/// Two graphs with the same stages, shapes, quantization parameters and edges share a fingerprint,
/// whatever their name.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeFingerprint {
    /// Canonical encoding of the graph.
    pub key: String,
    /// 128-bit checksum of the key.
    pub checksum: StableHash,
}

impl ShapeFingerprint {
    /// Fingerprint of an operator graph.
    pub fn new(graph: &OperatorGraph) -> Self {
        let parts: Vec<String> = graph
            .nodes()
            .iter()
            .map(|node| {
                let operation = match &node.operation {
                    Operation::Compute(stage) => stage.key(),
                    Operation::Output => "output".to_string(),
                };
                let producers: Vec<String> = node
                    .producers
                    .iter()
                    .map(|producer| match producer {
                        Some(id) => id.0.to_string(),
                        None => "_".to_string(),
                    })
                    .collect();
                format!("{operation}<{}>", producers.join(","))
            })
            .collect();

        Self::from_key(parts.join("|"))
    }

    /// Fingerprint of an already encoded key.
    pub fn from_key(key: String) -> Self {
        let checksum = StableHasher::const_hash(key.as_bytes());
        Self { key, checksum }
    }

    /// Checksum as a fixed width hex string, usable as a file name.
    pub fn hex(&self) -> String {
        hex(self.checksum)
    }
}

impl Display for ShapeFingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.key)
    }
}
