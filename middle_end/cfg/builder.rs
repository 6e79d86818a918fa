//! Recursive lowering of the AST into the CFG.
//!
//! One descent over the source unit. The state threaded through the
//! recursion is the ambient context `(entry, exit, join)`: the enclosing
//! function or source entry/exit and the join point the current block flows
//! into. Each block additionally tracks the predecessor to stitch the next
//! statement to.
//! Synthetic entry, continue, and join nodes are allocated per
//! conditional/loop as the corresponding statement is lowered.

use tracing::{debug, warn};

use serde_json::Value;

use crate::commons::AnalysisError;
use crate::front_end::ast;

use super::node::{EdgeLabel, NodeId, NodeKind};
use super::CfgMetadata;

/// Ambient construction context.
#[derive(Clone)]
struct Ctx {
    entry: NodeId,
    exit: NodeId,
    join: Option<NodeId>,
}

/// Result of lowering one statement: the statement's own node and the node
/// predecessors should be linked to. They differ for loops, which are entered
/// through their initialization, continue, or entry node rather than through
/// the condition.
struct Lowered {
    id: NodeId,
    head: NodeId,
}

impl Lowered {
    fn simple(id: NodeId) -> Self {
        Lowered {
            head: id.clone(),
            id,
        }
    }
}

pub(crate) struct Builder<'m> {
    meta: &'m mut CfgMetadata,
}

impl<'m> Builder<'m> {
    pub(crate) fn new(meta: &'m mut CfgMetadata) -> Self {
        Builder { meta }
    }

    pub(crate) fn lower_source_unit(
        &mut self,
        unit: &ast::SourceUnit,
        entry: &NodeId,
        exit: &NodeId,
    ) -> Result<NodeId, AnalysisError> {
        let ctx = Ctx {
            entry: entry.clone(),
            exit: exit.clone(),
            join: None,
        };
        let id = self.add_node(NodeKind::SourceUnit, &ctx, Some(unit.id), Some(unit.src));

        for item in &unit.nodes {
            let child = match item {
                ast::SourceItem::Known(ast::SourceNode::ContractDefinition(contract)) => {
                    self.lower_contract(contract, &ctx)?
                }
                ast::SourceItem::Known(ast::SourceNode::PragmaDirective(pragma)) => {
                    self.add_node(NodeKind::PragmaDirective, &ctx, Some(pragma.id), Some(pragma.src))
                }
                ast::SourceItem::Other(raw) => self.lower_passthrough(raw, &ctx),
            };
            self.meta.add_edge(&id, &child, None);
        }

        Ok(id)
    }

    fn lower_contract(
        &mut self,
        contract: &ast::ContractDefinition,
        ctx: &Ctx,
    ) -> Result<NodeId, AnalysisError> {
        let id = self.add_node(
            NodeKind::ContractDefinition {
                name: contract.name.clone(),
                contract_kind: contract.contract_kind.clone(),
            },
            ctx,
            Some(contract.id),
            Some(contract.src),
        );

        for member in &contract.nodes {
            let child = match member {
                ast::ContractItem::Known(ast::ContractNode::FunctionDefinition(function)) => {
                    self.lower_function(function, ctx)?
                }
                ast::ContractItem::Known(ast::ContractNode::VariableDeclaration(decl)) => self
                    .add_node(
                        NodeKind::VariableDeclaration {
                            name: decl.name.clone(),
                        },
                        ctx,
                        Some(decl.id),
                        Some(decl.src),
                    ),
                ast::ContractItem::Other(raw) => self.lower_passthrough(raw, ctx),
            };
            self.meta.add_edge(&id, &child, None);
        }

        Ok(id)
    }

    fn lower_function(
        &mut self,
        function: &ast::FunctionDefinition,
        ctx: &Ctx,
    ) -> Result<NodeId, AnalysisError> {
        let fn_entry = self.add_node(NodeKind::FunctionEntry, ctx, None, None);
        let fn_exit = self.add_node(NodeKind::FunctionExit, ctx, None, None);
        let id = self.add_node(
            NodeKind::FunctionDefinition {
                name: function.name.clone(),
                entry: fn_entry.clone(),
                exit: fn_exit.clone(),
            },
            ctx,
            Some(function.id),
            Some(function.src),
        );
        debug!(node = %id, function = %function.name, "lowering function body");

        self.meta.add_edge(&id, &fn_entry, None);
        // route the function exit into the enclosing source exit
        self.meta.add_edge(&fn_exit, &ctx.exit, None);

        let body_ctx = Ctx {
            entry: fn_entry.clone(),
            exit: fn_exit.clone(),
            join: None,
        };
        let body = match &function.body {
            Some(block) => self.lower_block(&block.statements, &body_ctx, &fn_entry, None)?,
            None => None,
        };
        match body {
            Some(last) => self.link_leaves(&last, &fn_exit, None),
            None => self.meta.add_edge(&fn_entry, &fn_exit, None),
        }

        Ok(id)
    }

    /// Lower a straight-line block. The first statement hangs off `from`
    /// (labeled when `from` is a branching condition); each later statement is
    /// stitched to its predecessor's leaves. Returns the continuation point
    /// of the last statement, or `None` for an empty block.
    fn lower_block(
        &mut self,
        statements: &[ast::Statement],
        ctx: &Ctx,
        from: &NodeId,
        first_label: Option<EdgeLabel>,
    ) -> Result<Option<NodeId>, AnalysisError> {
        let mut prev: Option<NodeId> = None;
        for statement in statements {
            let lowered = self.lower_statement(statement, ctx)?;
            match &prev {
                None => self.meta.add_edge(from, &lowered.head, first_label),
                Some(p) => self.link_leaves(p, &lowered.head, None),
            }
            prev = Some(self.continuation(&lowered.id));
        }
        Ok(prev)
    }

    fn lower_statement(
        &mut self,
        statement: &ast::Statement,
        ctx: &Ctx,
    ) -> Result<Lowered, AnalysisError> {
        match statement {
            ast::Statement::Known(node) => match &**node {
                ast::StatementNode::VariableDeclarationStatement(s) => {
                    self.lower_declaration_statement(s, ctx)
                }
                ast::StatementNode::ExpressionStatement(s) => {
                    self.lower_expression_statement(s, ctx)
                }
                ast::StatementNode::IfStatement(s) => self.lower_if(s, ctx),
                ast::StatementNode::ForStatement(s) => self.lower_for(s, ctx),
                ast::StatementNode::WhileStatement(s) => self.lower_while(s, ctx),
                ast::StatementNode::DoWhileStatement(s) => self.lower_do_while(s, ctx),
            },
            ast::Statement::Other(raw) => Ok(Lowered::simple(self.lower_passthrough(raw, ctx))),
        }
    }

    fn lower_declaration_statement(
        &mut self,
        s: &ast::VariableDeclarationStatement,
        ctx: &Ctx,
    ) -> Result<Lowered, AnalysisError> {
        let declared = s.declarations.first().ok_or_else(|| {
            AnalysisError::MalformedAst(format!(
                "declaration statement (ast id {}) has no declarations",
                s.id
            ))
        })?;
        let initial_value = match &s.initial_value {
            Some(expression) => Some(self.lower_expression(expression)?),
            None => None,
        };
        let id = self.add_node(
            NodeKind::VariableDeclarationStatement {
                name: declared.name.clone(),
                initial_value,
            },
            ctx,
            Some(s.id),
            Some(s.src),
        );
        debug!(node = %id, "lowered declaration statement");
        Ok(Lowered::simple(id))
    }

    fn lower_expression_statement(
        &mut self,
        s: &ast::ExpressionStatement,
        ctx: &Ctx,
    ) -> Result<Lowered, AnalysisError> {
        let expression = self.lower_expression(&s.expression)?;
        let id = self.add_node(
            NodeKind::ExpressionStatement { expression },
            ctx,
            Some(s.id),
            Some(s.src),
        );
        debug!(node = %id, "lowered expression statement");
        Ok(Lowered::simple(id))
    }

    fn lower_if(&mut self, s: &ast::IfStatement, ctx: &Ctx) -> Result<Lowered, AnalysisError> {
        let condition = self.lower_expression(&s.condition)?;
        let id = self.add_node(NodeKind::IfStatement { condition }, ctx, Some(s.id), Some(s.src));
        debug!(node = %id, "lowering conditional");

        let join = self.add_node(NodeKind::IfJoin, ctx, None, None);
        self.meta.node_mut(&id).join_node = Some(join.clone());

        let branch_ctx = Ctx {
            join: Some(join.clone()),
            ..ctx.clone()
        };

        match self.lower_block(&s.true_body.statements, &branch_ctx, &id, Some(EdgeLabel::True))? {
            Some(last) => self.link_leaves(&last, &join, None),
            None => self.meta.add_edge(&id, &join, Some(EdgeLabel::True)),
        }

        match &s.false_body {
            Some(body) => {
                match self.lower_block(&body.statements, &branch_ctx, &id, Some(EdgeLabel::False))? {
                    Some(last) => self.link_leaves(&last, &join, None),
                    None => self.meta.add_edge(&id, &join, Some(EdgeLabel::False)),
                }
            }
            None => self.meta.add_edge(&id, &join, Some(EdgeLabel::False)),
        }

        Ok(Lowered::simple(id))
    }

    fn lower_while(&mut self, s: &ast::WhileStatement, ctx: &Ctx) -> Result<Lowered, AnalysisError> {
        let condition = self.lower_expression(&s.condition)?;
        let id = self.add_node(NodeKind::WhileStatement { condition }, ctx, Some(s.id), Some(s.src));
        debug!(node = %id, "lowering while loop");

        // the continue node is the condition's permanent predecessor, for
        // both the initial entry and the back edge
        let cont = self.add_node(NodeKind::WhileContinue, ctx, None, None);
        self.meta.add_edge(&cont, &id, Some(EdgeLabel::Continue));

        let join = self.add_node(NodeKind::WhileJoin, ctx, None, None);
        self.meta.node_mut(&id).join_node = Some(join.clone());
        self.meta.add_edge(&id, &join, Some(EdgeLabel::False));

        let body_ctx = Ctx {
            join: Some(cont.clone()),
            ..ctx.clone()
        };
        match self.lower_block(&s.body.statements, &body_ctx, &id, Some(EdgeLabel::True))? {
            Some(last) => self.link_leaves(&last, &cont, None),
            None => self.meta.add_edge(&id, &cont, Some(EdgeLabel::True)),
        }

        Ok(Lowered {
            id,
            head: cont,
        })
    }

    fn lower_for(&mut self, s: &ast::ForStatement, ctx: &Ctx) -> Result<Lowered, AnalysisError> {
        let condition = self.lower_expression(&s.condition)?;
        let id = self.add_node(NodeKind::ForStatement { condition }, ctx, Some(s.id), Some(s.src));
        debug!(node = %id, "lowering for loop");

        let cont = self.add_node(NodeKind::ForContinue, ctx, None, None);
        self.meta.add_edge(&cont, &id, Some(EdgeLabel::Continue));

        // the initialization runs once, before the continue node
        let init = self.lower_statement(&s.initialization_expression, ctx)?;
        self.link_leaves(&init.id, &cont, None);

        let join = self.add_node(NodeKind::ForJoin, ctx, None, None);
        self.meta.node_mut(&id).join_node = Some(join.clone());
        self.meta.add_edge(&id, &join, Some(EdgeLabel::False));

        let body_ctx = Ctx {
            join: Some(cont.clone()),
            ..ctx.clone()
        };
        let body_last =
            self.lower_block(&s.body.statements, &body_ctx, &id, Some(EdgeLabel::True))?;

        // the loop expression runs after the body, before the back edge
        let loop_stmt = self.lower_statement(&s.loop_expression, &body_ctx)?;
        match body_last {
            Some(last) => self.link_leaves(&last, &loop_stmt.head, None),
            None => self.meta.add_edge(&id, &loop_stmt.head, Some(EdgeLabel::True)),
        }
        self.link_leaves(&loop_stmt.id, &cont, None);

        Ok(Lowered {
            id,
            head: init.head,
        })
    }

    fn lower_do_while(
        &mut self,
        s: &ast::DoWhileStatement,
        ctx: &Ctx,
    ) -> Result<Lowered, AnalysisError> {
        let condition = self.lower_expression(&s.condition)?;
        let id = self.add_node(
            NodeKind::DoWhileStatement { condition },
            ctx,
            Some(s.id),
            Some(s.src),
        );
        debug!(node = %id, "lowering do-while loop");

        // the back edge re-enters at the entry node, so the body always runs
        // once before the first condition test
        let entry = self.add_node(NodeKind::DoWhileEntry, ctx, None, None);
        self.meta.add_edge(&id, &entry, Some(EdgeLabel::True));

        let cont = self.add_node(NodeKind::DoWhileContinue, ctx, None, None);
        self.meta.add_edge(&cont, &id, Some(EdgeLabel::Continue));

        let join = self.add_node(NodeKind::DoWhileJoin, ctx, None, None);
        self.meta.node_mut(&id).join_node = Some(join.clone());
        self.meta.add_edge(&id, &join, Some(EdgeLabel::False));

        let body_ctx = Ctx {
            join: Some(cont.clone()),
            ..ctx.clone()
        };
        match self.lower_block(&s.body.statements, &body_ctx, &entry, None)? {
            Some(last) => self.link_leaves(&last, &cont, None),
            None => self.meta.add_edge(&entry, &cont, None),
        }

        Ok(Lowered {
            id,
            head: entry,
        })
    }

    /// Lower an expression subtree into arena nodes. Expression nodes carry
    /// no flow edges; statements reference them by id.
    fn lower_expression(&mut self, expression: &ast::Expression) -> Result<NodeId, AnalysisError> {
        match expression {
            ast::Expression::Literal(lit) => {
                let value = lit.value.parse::<i64>().map_err(|_| {
                    AnalysisError::MalformedAst(format!(
                        "literal `{}` (ast id {}) is not a decimal integer",
                        lit.value, lit.id
                    ))
                })?;
                Ok(self.add_expression_node(NodeKind::Literal { value }, lit.id, lit.src))
            }
            ast::Expression::Identifier(ident) => Ok(self.add_expression_node(
                NodeKind::Identifier {
                    name: ident.name.clone(),
                },
                ident.id,
                ident.src,
            )),
            ast::Expression::BinaryOperation(op) => {
                let left = self.lower_expression(&op.left_expression)?;
                let right = self.lower_expression(&op.right_expression)?;
                Ok(self.add_expression_node(
                    NodeKind::BinaryOperation {
                        operator: op.operator.clone(),
                        left,
                        right,
                    },
                    op.id,
                    op.src,
                ))
            }
            ast::Expression::UnaryOperation(op) => {
                let operand = self.lower_expression(&op.sub_expression)?;
                Ok(self.add_expression_node(
                    NodeKind::UnaryOperation {
                        operator: op.operator.clone(),
                        prefix: op.prefix,
                        operand,
                    },
                    op.id,
                    op.src,
                ))
            }
            ast::Expression::Assignment(op) => {
                let left = self.lower_expression(&op.left_hand_side)?;
                let right = self.lower_expression(&op.right_hand_side)?;
                Ok(self.add_expression_node(
                    NodeKind::Assignment {
                        operator: op.operator.clone(),
                        left,
                        right,
                    },
                    op.id,
                    op.src,
                ))
            }
            ast::Expression::TupleExpression(tuple) => {
                // parenthesized expression: unwrap the single component
                let mut components = tuple.components.iter().flatten();
                match (components.next(), components.next()) {
                    (Some(inner), None) => self.lower_expression(inner),
                    _ => Err(AnalysisError::UnsupportedAstNode(
                        "TupleExpression".to_string(),
                    )),
                }
            }
        }
    }

    /// Unknown statement kinds get a neutral pass-through node so the rest
    /// of the file still lowers; the analysis treats it as identity.
    fn lower_passthrough(&mut self, raw: &Value, ctx: &Ctx) -> NodeId {
        let node_type = raw
            .get("nodeType")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let ast_id = raw.get("id").and_then(Value::as_i64);
        let src_map = raw
            .get("src")
            .and_then(Value::as_str)
            .and_then(|s| ast::SrcMap::try_from(s.to_string()).ok());

        warn!(kind = %node_type, "unsupported AST node, substituting a pass-through node");
        let id = self.meta.register(NodeKind::Passthrough { node_type });
        let node = self.meta.node_mut(&id);
        node.set_entry_node(&ctx.entry);
        node.set_exit_node(&ctx.exit);
        node.join_node = ctx.join.clone();
        node.ast_id = ast_id;
        node.src_map = src_map;
        id
    }

    // SECTION: helpers

    fn add_node(
        &mut self,
        kind: NodeKind,
        ctx: &Ctx,
        ast_id: Option<i64>,
        src_map: Option<ast::SrcMap>,
    ) -> NodeId {
        let id = self.meta.register(kind);
        let node = self.meta.node_mut(&id);
        node.set_entry_node(&ctx.entry);
        node.set_exit_node(&ctx.exit);
        node.join_node = ctx.join.clone();
        node.ast_id = ast_id;
        node.src_map = src_map;
        id
    }

    fn add_expression_node(&mut self, kind: NodeKind, ast_id: i64, src_map: ast::SrcMap) -> NodeId {
        let id = self.meta.register(kind);
        let node = self.meta.node_mut(&id);
        node.ast_id = Some(ast_id);
        node.src_map = Some(src_map);
        id
    }

    fn link_leaves(&mut self, from: &NodeId, to: &NodeId, label: Option<EdgeLabel>) {
        for leaf in self.meta.leaves(from) {
            self.meta.add_edge(&leaf, to, label);
        }
    }

    /// The node siblings should treat as their predecessor: the join for
    /// composite statements, the statement itself otherwise.
    fn continuation(&self, id: &NodeId) -> NodeId {
        let node = self.meta.node(id);
        if node.kind.is_composite() {
            if let Some(join) = &node.join_node {
                return join.clone();
            }
        }
        id.clone()
    }
}
