//! Typed view of the solc JSON AST.
//!
//! Every node carries an `id` and a `src` mapping; the `nodeType` tag selects
//! the variant. Statement kinds we do not lower keep their raw JSON so the
//! CFG builder can substitute a pass-through node for them instead of
//! failing the whole file.

use serde::Deserialize;
use serde_json::Value;

use crate::commons::{AnalysisError, Valid};

// SECTION: schema

/// Source mapping triple `start:length:fileIndex`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct SrcMap {
    pub start: i64,
    pub length: i64,
    pub file: i64,
}

impl TryFrom<String> for SrcMap {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(format!("src mapping `{s}` is not a `start:length:file` triple"));
        }
        let field = |p: &str| {
            p.parse::<i64>()
                .map_err(|_| format!("src mapping `{s}` has a non-numeric component"))
        };
        Ok(SrcMap {
            start: field(parts[0])?,
            length: field(parts[1])?,
            file: field(parts[2])?,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUnit {
    pub id: i64,
    pub src: SrcMap,
    #[serde(default)]
    pub nodes: Vec<SourceItem>,
}

/// A top-level declaration, or raw JSON if the kind is not one we lower.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceItem {
    Known(SourceNode),
    Other(Value),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum SourceNode {
    ContractDefinition(ContractDefinition),
    PragmaDirective(PragmaDirective),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDefinition {
    pub id: i64,
    pub src: SrcMap,
    pub name: String,
    #[serde(default)]
    pub contract_kind: String,
    #[serde(default)]
    pub nodes: Vec<ContractItem>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ContractItem {
    Known(ContractNode),
    Other(Value),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum ContractNode {
    FunctionDefinition(FunctionDefinition),
    VariableDeclaration(VariableDeclaration),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PragmaDirective {
    pub id: i64,
    pub src: SrcMap,
    #[serde(default)]
    pub literals: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: i64,
    pub src: SrcMap,
    pub name: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub state_mutability: String,
    #[serde(default)]
    pub parameters: ParameterList,
    #[serde(default)]
    pub return_parameters: ParameterList,
    /// Absent for unimplemented functions (interface and library signatures).
    #[serde(default)]
    pub body: Option<Block>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterList {
    #[serde(default)]
    pub parameters: Vec<VariableDeclaration>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDeclaration {
    pub id: i64,
    pub src: SrcMap,
    pub name: String,
    #[serde(default)]
    pub state_variable: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default)]
    pub statements: Vec<Statement>,
}

/// A statement, or raw JSON if the kind is not one we lower.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Statement {
    Known(Box<StatementNode>),
    Other(Value),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum StatementNode {
    VariableDeclarationStatement(VariableDeclarationStatement),
    ExpressionStatement(ExpressionStatement),
    IfStatement(IfStatement),
    ForStatement(ForStatement),
    WhileStatement(WhileStatement),
    DoWhileStatement(DoWhileStatement),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDeclarationStatement {
    pub id: i64,
    pub src: SrcMap,
    pub declarations: Vec<VariableDeclaration>,
    #[serde(default)]
    pub initial_value: Option<Expression>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionStatement {
    pub id: i64,
    pub src: SrcMap,
    pub expression: Expression,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfStatement {
    pub id: i64,
    pub src: SrcMap,
    pub condition: Expression,
    pub true_body: Block,
    #[serde(default)]
    pub false_body: Option<Block>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForStatement {
    pub id: i64,
    pub src: SrcMap,
    pub initialization_expression: Box<Statement>,
    pub condition: Expression,
    pub loop_expression: Box<Statement>,
    pub body: Block,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhileStatement {
    pub id: i64,
    pub src: SrcMap,
    pub condition: Expression,
    pub body: Block,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoWhileStatement {
    pub id: i64,
    pub src: SrcMap,
    pub condition: Expression,
    pub body: Block,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum Expression {
    Literal(Literal),
    Identifier(Identifier),
    BinaryOperation(Box<BinaryOperation>),
    UnaryOperation(Box<UnaryOperation>),
    Assignment(Box<Assignment>),
    TupleExpression(Box<TupleExpression>),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Literal {
    pub id: i64,
    pub src: SrcMap,
    /// Decimal integer text.
    pub value: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub id: i64,
    pub src: SrcMap,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryOperation {
    pub id: i64,
    pub src: SrcMap,
    pub operator: String,
    pub left_expression: Expression,
    pub right_expression: Expression,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnaryOperation {
    pub id: i64,
    pub src: SrcMap,
    pub operator: String,
    #[serde(default)]
    pub prefix: bool,
    pub sub_expression: Expression,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    pub src: SrcMap,
    pub operator: String,
    pub left_hand_side: Expression,
    pub right_hand_side: Expression,
}

/// Parenthesized expressions; solc leaves holes as `null` components.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TupleExpression {
    pub id: i64,
    pub src: SrcMap,
    #[serde(default)]
    pub components: Vec<Option<Expression>>,
}

// SECTION: validation

/// Statement kinds the builder lowers; a raw statement claiming one of these
/// tags only ends up raw because a required field is missing or mistyped.
const LOWERED_STATEMENTS: &[&str] = &[
    "VariableDeclarationStatement",
    "ExpressionStatement",
    "IfStatement",
    "ForStatement",
    "WhileStatement",
    "DoWhileStatement",
];

impl SourceUnit {
    /// Check the invariants the CFG builder and the analysis rely on:
    /// declaration statements declare exactly one named variable, literals
    /// are decimal integers, and statements that carry a lowered `nodeType`
    /// tag actually deserialized into it.
    pub fn validate(self) -> Result<Valid<SourceUnit>, AnalysisError> {
        for item in &self.nodes {
            match item {
                SourceItem::Known(SourceNode::ContractDefinition(contract)) => {
                    for member in &contract.nodes {
                        match member {
                            ContractItem::Known(ContractNode::FunctionDefinition(f)) => {
                                if let Some(body) = &f.body {
                                    validate_block(body)?;
                                }
                            }
                            ContractItem::Known(ContractNode::VariableDeclaration(_)) => {}
                            ContractItem::Other(raw) => {
                                node_type_of(raw)?;
                            }
                        }
                    }
                }
                SourceItem::Known(SourceNode::PragmaDirective(_)) => {}
                SourceItem::Other(raw) => {
                    node_type_of(raw)?;
                }
            }
        }
        Ok(Valid(self))
    }
}

fn validate_block(block: &Block) -> Result<(), AnalysisError> {
    for statement in &block.statements {
        validate_statement(statement)?;
    }
    Ok(())
}

fn validate_statement(statement: &Statement) -> Result<(), AnalysisError> {
    match statement {
        Statement::Known(node) => validate_statement_node(node),
        Statement::Other(raw) => {
            let tag = node_type_of(raw)?;
            if LOWERED_STATEMENTS.contains(&tag) {
                return Err(AnalysisError::MalformedAst(format!(
                    "statement tagged `{tag}` is missing required fields"
                )));
            }
            Ok(())
        }
    }
}

fn validate_statement_node(node: &StatementNode) -> Result<(), AnalysisError> {
    match node {
        StatementNode::VariableDeclarationStatement(s) => {
            match s.declarations.as_slice() {
                [single] if !single.name.is_empty() => {}
                _ => {
                    return Err(AnalysisError::MalformedAst(format!(
                        "declaration statement (ast id {}) must declare exactly one named variable",
                        s.id
                    )))
                }
            }
            if let Some(init) = &s.initial_value {
                validate_expression(init)?;
            }
            Ok(())
        }
        StatementNode::ExpressionStatement(s) => validate_expression(&s.expression),
        StatementNode::IfStatement(s) => {
            validate_expression(&s.condition)?;
            validate_block(&s.true_body)?;
            if let Some(false_body) = &s.false_body {
                validate_block(false_body)?;
            }
            Ok(())
        }
        StatementNode::ForStatement(s) => {
            validate_statement(&s.initialization_expression)?;
            validate_expression(&s.condition)?;
            validate_statement(&s.loop_expression)?;
            validate_block(&s.body)
        }
        StatementNode::WhileStatement(s) => {
            validate_expression(&s.condition)?;
            validate_block(&s.body)
        }
        StatementNode::DoWhileStatement(s) => {
            validate_expression(&s.condition)?;
            validate_block(&s.body)
        }
    }
}

fn validate_expression(expression: &Expression) -> Result<(), AnalysisError> {
    match expression {
        Expression::Literal(lit) => {
            lit.value.parse::<i64>().map_err(|_| {
                AnalysisError::MalformedAst(format!(
                    "literal `{}` (ast id {}) is not a decimal integer",
                    lit.value, lit.id
                ))
            })?;
            Ok(())
        }
        Expression::Identifier(_) => Ok(()),
        Expression::BinaryOperation(op) => {
            validate_expression(&op.left_expression)?;
            validate_expression(&op.right_expression)
        }
        Expression::UnaryOperation(op) => validate_expression(&op.sub_expression),
        Expression::Assignment(op) => {
            validate_expression(&op.left_hand_side)?;
            validate_expression(&op.right_hand_side)
        }
        Expression::TupleExpression(tuple) => {
            for component in tuple.components.iter().flatten() {
                validate_expression(component)?;
            }
            Ok(())
        }
    }
}

fn node_type_of(raw: &Value) -> Result<&str, AnalysisError> {
    raw.get("nodeType")
        .and_then(Value::as_str)
        .ok_or_else(|| AnalysisError::MalformedAst("node without a `nodeType` tag".to_string()))
}
