//! Binary Merkle tree over span hashes, with inclusion proofs.
//!
//! Leaves are domain-separated from internal nodes, levels reduce pairwise,
//! and a level with an odd node count duplicates its last node (hashed with
//! itself). The duplication policy is part of the commitment format: an
//! independent verifier must reduce the exact same way to reproduce a root.

use poi_trace_spec::hash::{hash_domain, LEAF_DOMAIN, NODE_DOMAIN};
use poi_trace_spec::{TraceError, EMPTY_MERKLE_ROOT};
use serde::{Deserialize, Serialize};

/// Which side of the accumulator a proof sibling concatenates on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProofSide {
    /// Sibling hashes on the left of the accumulator.
    Left,
    /// Sibling hashes on the right of the accumulator.
    Right,
}

/// One step along a proof path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofNode {
    /// The sibling hash at this level.
    pub hash: String,
    /// Which side the sibling concatenates on.
    pub side: ProofSide,
}

/// Inclusion proof for a single leaf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    /// The leaf hash being proven (already domain-separated).
    pub leaf_hash: String,
    /// Index of the leaf in `span_seq` order.
    pub leaf_index: u64,
    /// Sibling steps from leaf level up to the root.
    pub siblings: Vec<ProofNode>,
    /// Root the proof resolves to.
    pub root_hash: String,
}

/// Leaf hash for a span hash.
pub fn leaf_hash(span_hash: &str) -> String {
    hash_domain(LEAF_DOMAIN, &[span_hash.as_bytes()])
}

fn node_hash(left: &str, right: &str) -> String {
    hash_domain(NODE_DOMAIN, &[left.as_bytes(), right.as_bytes()])
}

/// Merkle tree over span hashes, leaf order fixed by `span_seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    leaves: Vec<String>,
}

impl MerkleTree {
    /// Build a tree from span hashes in `span_seq` order.
    pub fn from_span_hashes<I, S>(span_hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            leaves: span_hashes
                .into_iter()
                .map(|h| leaf_hash(h.as_ref()))
                .collect(),
        }
    }

    /// Build a tree from precomputed leaf hashes.
    pub fn from_leaves(leaves: Vec<String>) -> Self {
        Self { leaves }
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// The leaf hashes in order.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    /// The Merkle root, or the empty sentinel for a tree with no leaves.
    pub fn root(&self) -> String {
        if self.leaves.is_empty() {
            return EMPTY_MERKLE_ROOT.to_string();
        }
        let mut level = self.leaves.clone();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    [solo] => node_hash(solo, solo),
                    _ => unreachable!("chunks(2) yields one- or two-element slices"),
                })
                .collect();
        }
        level.into_iter().next().unwrap_or_default()
    }

    /// Inclusion proof for the leaf at `index`.
    ///
    /// Every proof this produces verifies against [`verify_proof`] for every
    /// leaf count, including the odd levels where the sibling is the node
    /// itself.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, TraceError> {
        if index >= self.leaves.len() {
            return Err(TraceError::NotFound(format!(
                "merkle leaf index {index} out of range (leaf count {})",
                self.leaves.len()
            )));
        }
        let mut siblings = Vec::new();
        let mut current = index;
        let mut level = self.leaves.clone();
        while level.len() > 1 {
            let sibling_index = if current % 2 == 0 {
                current + 1
            } else {
                current - 1
            };
            let sibling = if sibling_index < level.len() {
                level[sibling_index].clone()
            } else {
                // Odd level: the last node pairs with itself.
                level[current].clone()
            };
            let side = if current % 2 == 0 {
                ProofSide::Right
            } else {
                ProofSide::Left
            };
            siblings.push(ProofNode {
                hash: sibling,
                side,
            });

            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    [solo] => node_hash(solo, solo),
                    _ => unreachable!("chunks(2) yields one- or two-element slices"),
                })
                .collect();
            current /= 2;
        }
        Ok(MerkleProof {
            leaf_hash: self.leaves[index].clone(),
            leaf_index: index as u64,
            siblings,
            root_hash: level
                .into_iter()
                .next()
                .unwrap_or_else(|| EMPTY_MERKLE_ROOT.to_string()),
        })
    }
}

/// Stateless proof verification: fold the siblings into the leaf hash and
/// compare against the proof's root.
pub fn verify_proof(proof: &MerkleProof) -> bool {
    let mut acc = proof.leaf_hash.clone();
    for step in &proof.siblings {
        acc = match step.side {
            ProofSide::Left => node_hash(&step.hash, &acc),
            ProofSide::Right => node_hash(&acc, &step.hash),
        };
    }
    acc == proof.root_hash
}
