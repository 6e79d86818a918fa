//! CFG node records: the closed set of node kinds, edges, and block types.

use std::collections::BTreeMap as Map;
use std::fmt;

use derive_more::Display;

use crate::front_end::ast::SrcMap;

/// Stable node identifier of the form `<Kind>_<n>`.
pub type NodeId = String;

/// Coarse categorization of a node, for reporting only.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum BasicBlockType {
    Entry,
    Exit,
    Statement,
    FunctionBody,
    ClassBody,
    Conditional,
    Loop,
    Branch,
    FunctionCall,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum EdgeLabel {
    True,
    False,
    Break,
    Continue,
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeLabel::True => write!(f, "True"),
            EdgeLabel::False => write!(f, "False"),
            EdgeLabel::Break => write!(f, "break"),
            EdgeLabel::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Edge {
    pub label: Option<EdgeLabel>,
}

impl Edge {
    pub fn labeled(label: EdgeLabel) -> Self {
        Edge { label: Some(label) }
    }
}

/// The closed set of node kinds.
///
/// Statement kinds reference their expression subtrees by node id; expression
/// kinds are registered in the same arena but never carry flow edges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    // source-level
    SourceUnit,
    PragmaDirective,
    ContractDefinition {
        name: String,
        contract_kind: String,
    },
    FunctionDefinition {
        name: String,
        entry: NodeId,
        exit: NodeId,
    },
    VariableDeclaration {
        name: String,
    },
    VariableDeclarationStatement {
        name: String,
        initial_value: Option<NodeId>,
    },
    ExpressionStatement {
        expression: NodeId,
    },
    IfStatement {
        condition: NodeId,
    },
    ForStatement {
        condition: NodeId,
    },
    WhileStatement {
        condition: NodeId,
    },
    DoWhileStatement {
        condition: NodeId,
    },

    // expression subtrees
    Assignment {
        operator: String,
        left: NodeId,
        right: NodeId,
    },
    BinaryOperation {
        operator: String,
        left: NodeId,
        right: NodeId,
    },
    UnaryOperation {
        operator: String,
        prefix: bool,
        operand: NodeId,
    },
    Literal {
        value: i64,
    },
    Identifier {
        name: String,
    },

    // synthetic control nodes
    SourceEntry,
    SourceExit,
    FunctionEntry,
    FunctionExit,
    IfJoin,
    ForJoin,
    WhileJoin,
    DoWhileJoin,
    DoWhileEntry,
    ForContinue,
    WhileContinue,
    DoWhileContinue,

    /// Substituted for statement kinds the builder does not know; the
    /// analysis treats it as identity on the abstract state.
    Passthrough {
        node_type: String,
    },
}

impl NodeKind {
    /// Identifier prefix and per-kind counter key.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::SourceUnit => "SourceUnit",
            NodeKind::PragmaDirective => "PragmaDirective",
            NodeKind::ContractDefinition { .. } => "ContractDefinition",
            NodeKind::FunctionDefinition { .. } => "FunctionDefinition",
            NodeKind::VariableDeclaration { .. } => "VariableDeclaration",
            NodeKind::VariableDeclarationStatement { .. } => "VariableDeclarationStatement",
            NodeKind::ExpressionStatement { .. } => "ExpressionStatement",
            NodeKind::IfStatement { .. } => "IfStatement",
            NodeKind::ForStatement { .. } => "ForStatement",
            NodeKind::WhileStatement { .. } => "WhileStatement",
            NodeKind::DoWhileStatement { .. } => "DoWhileStatement",
            NodeKind::Assignment { .. } => "Assignment",
            NodeKind::BinaryOperation { .. } => "BinaryOperation",
            NodeKind::UnaryOperation { .. } => "UnaryOperation",
            NodeKind::Literal { .. } => "Literal",
            NodeKind::Identifier { .. } => "Identifier",
            NodeKind::SourceEntry => "SourceEntry",
            NodeKind::SourceExit => "SourceExit",
            NodeKind::FunctionEntry => "FunctionEntry",
            NodeKind::FunctionExit => "FunctionExit",
            NodeKind::IfJoin => "IfJoin",
            NodeKind::ForJoin => "ForJoin",
            NodeKind::WhileJoin => "WhileJoin",
            NodeKind::DoWhileJoin => "DoWhileJoin",
            NodeKind::DoWhileEntry => "DoWhileEntry",
            NodeKind::ForContinue => "ForContinue",
            NodeKind::WhileContinue => "WhileContinue",
            NodeKind::DoWhileContinue => "DoWhileContinue",
            NodeKind::Passthrough { .. } => "Node",
        }
    }

    pub fn block_type(&self) -> BasicBlockType {
        match self {
            NodeKind::SourceUnit | NodeKind::SourceEntry | NodeKind::FunctionEntry => {
                BasicBlockType::Entry
            }
            NodeKind::DoWhileEntry => BasicBlockType::Entry,
            NodeKind::SourceExit | NodeKind::FunctionExit => BasicBlockType::Exit,
            NodeKind::ContractDefinition { .. } => BasicBlockType::ClassBody,
            NodeKind::FunctionDefinition { .. } => BasicBlockType::FunctionBody,
            NodeKind::IfStatement { .. } => BasicBlockType::Conditional,
            NodeKind::ForStatement { .. }
            | NodeKind::WhileStatement { .. }
            | NodeKind::DoWhileStatement { .. }
            | NodeKind::ForContinue
            | NodeKind::WhileContinue
            | NodeKind::DoWhileContinue => BasicBlockType::Loop,
            NodeKind::IfJoin
            | NodeKind::ForJoin
            | NodeKind::WhileJoin
            | NodeKind::DoWhileJoin => BasicBlockType::Branch,
            _ => BasicBlockType::Statement,
        }
    }

    /// Composite statements terminate through their join node.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            NodeKind::IfStatement { .. }
                | NodeKind::ForStatement { .. }
                | NodeKind::WhileStatement { .. }
                | NodeKind::DoWhileStatement { .. }
        )
    }

    /// Loop back-edge targets, where widening is applied.
    pub fn is_loop_head(&self) -> bool {
        matches!(
            self,
            NodeKind::ForContinue
                | NodeKind::WhileContinue
                | NodeKind::DoWhileContinue
                | NodeKind::DoWhileEntry
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub block_type: BasicBlockType,
    pub prev: Map<NodeId, Edge>,
    pub next: Map<NodeId, Edge>,
    /// Enclosing function or source entry (ambient, not a traversal neighbor).
    pub entry_node: Option<NodeId>,
    /// Enclosing function or source exit.
    pub exit_node: Option<NodeId>,
    /// Immediate join point: the node's own join for composite statements,
    /// the enclosing one for nodes inside a conditional or loop body.
    pub join_node: Option<NodeId>,
    pub ast_id: Option<i64>,
    pub src_map: Option<SrcMap>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        let block_type = kind.block_type();
        Node {
            id,
            kind,
            block_type,
            prev: Map::new(),
            next: Map::new(),
            entry_node: None,
            exit_node: None,
            join_node: None,
            ast_id: None,
            src_map: None,
        }
    }

    pub fn add_prev(&mut self, id: &str, label: Option<EdgeLabel>) {
        self.prev.insert(id.to_string(), Edge { label });
    }

    pub fn add_next(&mut self, id: &str, label: Option<EdgeLabel>) {
        self.next.insert(id.to_string(), Edge { label });
    }

    pub fn set_entry_node(&mut self, id: &str) {
        self.entry_node = Some(id.to_string());
    }

    pub fn set_exit_node(&mut self, id: &str) {
        self.exit_node = Some(id.to_string());
    }

    /// The unique successor reached over an edge with the given label.
    pub fn successor_with(&self, label: EdgeLabel) -> Option<&NodeId> {
        self.next
            .iter()
            .find(|(_, edge)| edge.label == Some(label))
            .map(|(id, _)| id)
    }
}
