//! Node identifiers and the unknown-variable map.

use std::fmt;

/// Unique identifier for a node in the circuit.
///
/// Node 0 is ground and never appears as an unknown in the solved system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The ground node (node 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Create a new NodeId from a raw value.
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    /// Get the raw node ID value.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The unknown index of this node (0 for ground).
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Check if this is the ground node.
    pub fn is_ground(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A branch-current equation allocated by a device (voltage source, inductor, ...).
///
/// The index is relative; the absolute row follows the node voltages and is
/// obtained from [`Variables::branch_index`] once all nodes are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchId(pub(crate) usize);

/// Map of the unknowns of one analysis run.
///
/// Unknown indices are dense and contiguous: index 0 is ground (not solved),
/// `1..=num_nodes` are node voltages, and branch-current equations follow.
/// Indices are stable once assigned for the lifetime of the run.
#[derive(Debug, Default, Clone)]
pub struct Variables {
    max_node: u32,
    num_branches: usize,
}

impl Variables {
    /// Create an empty variable map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, growing the voltage-unknown count if necessary.
    pub fn register_node(&mut self, node: NodeId) {
        if !node.is_ground() && node.as_u32() > self.max_node {
            self.max_node = node.as_u32();
        }
    }

    /// Allocate a branch-current equation.
    pub fn alloc_branch(&mut self) -> BranchId {
        let id = BranchId(self.num_branches);
        self.num_branches += 1;
        id
    }

    /// The absolute unknown index of a branch equation.
    pub fn branch_index(&self, branch: BranchId) -> usize {
        self.max_node as usize + 1 + branch.0
    }

    /// Number of node-voltage unknowns (excluding ground).
    pub fn num_nodes(&self) -> usize {
        self.max_node as usize
    }

    /// Number of branch-current unknowns.
    pub fn num_branches(&self) -> usize {
        self.num_branches
    }

    /// Total number of unknowns (nodes + branches, excluding ground).
    pub fn size(&self) -> usize {
        self.max_node as usize + self.num_branches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_node() {
        assert!(NodeId::GROUND.is_ground());
        assert_eq!(NodeId::GROUND.as_u32(), 0);
        assert_eq!(NodeId::GROUND.to_string(), "GND");
    }

    #[test]
    fn test_register_nodes() {
        let mut vars = Variables::new();
        vars.register_node(NodeId::new(3));
        vars.register_node(NodeId::new(1));
        vars.register_node(NodeId::GROUND);

        assert_eq!(vars.num_nodes(), 3);
        assert_eq!(vars.size(), 3);
    }

    #[test]
    fn test_branch_indices_follow_nodes() {
        let mut vars = Variables::new();
        vars.register_node(NodeId::new(2));
        let b0 = vars.alloc_branch();
        let b1 = vars.alloc_branch();

        assert_eq!(vars.size(), 4);
        assert_eq!(vars.branch_index(b0), 3);
        assert_eq!(vars.branch_index(b1), 4);
    }
}
