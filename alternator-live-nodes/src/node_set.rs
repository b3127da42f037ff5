use std::ops::Deref;
use std::sync::Arc;

use crate::address::NodeAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
/// An ordered, non-empty snapshot of the nodes requests can be sent to.
///
/// A set is never modified once created, a refresh replaces it as a whole
/// so readers always observe a consistent list. Cloning is cheap.
pub struct NodeSet {
    nodes: Arc<[NodeAddress]>,
}

impl NodeSet {
    /// Creates a new node set, returning `None` if `nodes` is empty.
    pub fn new(nodes: Vec<NodeAddress>) -> Option<Self> {
        if nodes.is_empty() {
            return None;
        }

        Some(Self {
            nodes: nodes.into(),
        })
    }

    #[inline]
    /// Gets the node at `cursor`, wrapping around the end of the set.
    pub fn get_wrapping(&self, cursor: usize) -> &NodeAddress {
        &self.nodes[cursor % self.nodes.len()]
    }

    #[inline]
    /// Gets a immutable reference to the inner nodes buffer.
    pub fn as_slice(&self) -> &[NodeAddress] {
        &self.nodes
    }
}

impl Deref for NodeSet {
    type Target = [NodeAddress];

    fn deref(&self) -> &Self::Target {
        &self.nodes
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a NodeAddress;
    type IntoIter = std::slice::Iter<'a, NodeAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
