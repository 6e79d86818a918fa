//! Graphviz DOT rendering of a built CFG. Diagnostic only.

use std::collections::BTreeSet as Set;
use std::fmt::Write;

use super::{ControlFlowGraph, NodeId};

pub fn render(cfg: &ControlFlowGraph) -> String {
    let mut out = String::from("digraph cfg {\n");
    let mut visited = Set::new();
    traverse(cfg, &cfg.entry, &mut visited, &mut out);
    out.push_str("}\n");
    out
}

fn traverse(cfg: &ControlFlowGraph, id: &NodeId, visited: &mut Set<NodeId>, out: &mut String) {
    if !visited.insert(id.clone()) {
        return;
    }
    let node = cfg.metadata.node(id);
    let _ = writeln!(out, "    \"{id}\";");
    for (succ, edge) in &node.next {
        traverse(cfg, succ, visited, out);
        let _ = match edge.label {
            Some(label) => writeln!(out, "    \"{id}\" -> \"{succ}\" [label=\"{label}\"];"),
            None => writeln!(out, "    \"{id}\" -> \"{succ}\";"),
        };
    }
}
