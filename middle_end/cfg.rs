//! Control-flow graph construction and traversal.
//!
//! All nodes live in one arena, the [`CfgMetadata`] store; edges refer to
//! neighbors by string identifier, never by reference, so loops introduce no
//! ownership cycles. The store is the sole authority for allocating
//! identifiers: `<Kind>_<n>` with a per-kind monotone counter.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::commons::{AnalysisError, Valid};
use crate::front_end::ast::SourceUnit;

pub mod builder;
pub mod dot;
pub mod node;

#[cfg(test)]
mod tests;

pub use node::{BasicBlockType, Edge, EdgeLabel, Node, NodeId, NodeKind};

// SECTION: node arena

#[derive(Clone, Debug, Default)]
pub struct CfgMetadata {
    nodes: Map<NodeId, Node>,
    counters: Map<&'static str, usize>,
}

impl CfgMetadata {
    pub fn new() -> Self {
        CfgMetadata::default()
    }

    /// Allocate `<kind>_<counter[kind]>` and record the node.
    pub fn register(&mut self, kind: NodeKind) -> NodeId {
        let tag = kind.tag();
        let counter = self.counters.entry(tag).or_insert(0);
        let id = format!("{tag}_{counter}");
        *counter += 1;
        self.nodes.insert(id.clone(), Node::new(id.clone(), kind));
        id
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Arena lookup for identifiers the builder itself allocated.
    pub fn node(&self, id: &str) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> &mut Node {
        self.nodes
            .get_mut(id)
            .unwrap_or_else(|| panic!("unregistered node id `{id}`"))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Insert the edge `from -> to` together with its reverse entry, so that
    /// `v ∈ u.next ⇔ u ∈ v.prev` holds by construction.
    pub fn add_edge(&mut self, from: &str, to: &str, label: Option<EdgeLabel>) {
        self.node_mut(from).add_next(to, label);
        self.node_mut(to).add_prev(from, label);
    }

    /// Terminal continuation points of the subgraph rooted at `id`: the nodes
    /// whatever follows this subgraph in the enclosing block should link to.
    pub fn leaves(&self, id: &str) -> Set<NodeId> {
        let mut out = Set::new();
        let mut visited = Set::new();
        self.collect_leaves(id, &mut visited, &mut out);
        out
    }

    fn collect_leaves(&self, id: &str, visited: &mut Set<NodeId>, out: &mut Set<NodeId>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        let node = self.node(id);
        match &node.kind {
            // composite statements terminate only via their join
            kind if kind.is_composite() => {
                if let Some(join) = &node.join_node {
                    self.collect_leaves(join, visited, out);
                }
            }
            NodeKind::FunctionDefinition { exit, .. } => {
                out.insert(exit.clone());
            }
            NodeKind::SourceUnit | NodeKind::ContractDefinition { .. } => {
                for succ in node.next.keys() {
                    self.collect_leaves(succ, visited, out);
                }
            }
            _ => {
                if node.next.is_empty() {
                    out.insert(node.id.clone());
                } else {
                    for succ in node.next.keys() {
                        self.collect_leaves(succ, visited, out);
                    }
                }
            }
        }
    }
}

// SECTION: graph wrapper

/// A built control-flow graph: the node arena plus its unique source entry
/// and exit. Read-only once construction finishes.
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub metadata: CfgMetadata,
    pub entry: NodeId,
    pub exit: NodeId,
}

/// Entry and exit bounds of one function body within the graph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionBounds {
    pub name: String,
    pub definition: NodeId,
    pub entry: NodeId,
    pub exit: NodeId,
}

impl ControlFlowGraph {
    /// Lower a validated source unit into a CFG rooted at `SourceEntry_0`
    /// and terminated by `SourceExit_0`.
    pub fn build(unit: &Valid<SourceUnit>) -> Result<Self, AnalysisError> {
        let mut metadata = CfgMetadata::new();

        let entry = metadata.register(NodeKind::SourceEntry);
        let exit = metadata.register(NodeKind::SourceExit);
        for id in [&entry, &exit] {
            let node = metadata.node_mut(id);
            node.set_entry_node(&entry);
            node.set_exit_node(&exit);
        }

        let root = builder::Builder::new(&mut metadata).lower_source_unit(&unit.0, &entry, &exit)?;
        metadata.add_edge(&entry, &root, None);

        for leaf in metadata.leaves(&root) {
            metadata.add_edge(&leaf, &exit, None);
        }

        Ok(ControlFlowGraph {
            metadata,
            entry,
            exit,
        })
    }

    /// Every function body in the graph, in identifier order.
    pub fn functions(&self) -> Vec<FunctionBounds> {
        self.metadata
            .iter()
            .filter_map(|(id, node)| match &node.kind {
                NodeKind::FunctionDefinition { name, entry, exit } => Some(FunctionBounds {
                    name: name.clone(),
                    definition: id.clone(),
                    entry: entry.clone(),
                    exit: exit.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn function_bounds(&self, name: &str) -> Option<FunctionBounds> {
        self.functions().into_iter().find(|f| f.name == name)
    }

    pub fn to_dot(&self) -> String {
        dot::render(self)
    }
}
