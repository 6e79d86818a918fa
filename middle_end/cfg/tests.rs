// CFG construction tests: JSON fixtures in the solc AST shape are lowered
// and the resulting graph structure is checked.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::front_end::ast::SourceUnit;

use super::*;

// SECTION: fixtures

fn lit(value: i64) -> Value {
    json!({"nodeType": "Literal", "id": 0, "src": "0:0:0", "value": value.to_string()})
}

fn ident(name: &str) -> Value {
    json!({"nodeType": "Identifier", "id": 0, "src": "0:0:0", "name": name})
}

fn binop(operator: &str, left: Value, right: Value) -> Value {
    json!({
        "nodeType": "BinaryOperation", "id": 0, "src": "0:0:0",
        "operator": operator, "leftExpression": left, "rightExpression": right,
    })
}

fn assign(operator: &str, target: &str, value: Value) -> Value {
    json!({
        "nodeType": "Assignment", "id": 0, "src": "0:0:0",
        "operator": operator, "leftHandSide": ident(target), "rightHandSide": value,
    })
}

fn expr_stmt(expression: Value) -> Value {
    json!({"nodeType": "ExpressionStatement", "id": 0, "src": "0:0:0", "expression": expression})
}

fn decl(name: &str, initial: Option<Value>) -> Value {
    let mut stmt = json!({
        "nodeType": "VariableDeclarationStatement", "id": 0, "src": "0:0:0",
        "declarations": [
            {"nodeType": "VariableDeclaration", "id": 0, "src": "0:0:0", "name": name}
        ],
    });
    if let Some(init) = initial {
        stmt["initialValue"] = init;
    }
    stmt
}

fn if_stmt(condition: Value, true_body: Vec<Value>, false_body: Option<Vec<Value>>) -> Value {
    let mut stmt = json!({
        "nodeType": "IfStatement", "id": 0, "src": "0:0:0",
        "condition": condition, "trueBody": {"statements": true_body},
    });
    if let Some(body) = false_body {
        stmt["falseBody"] = json!({"statements": body});
    }
    stmt
}

fn while_stmt(condition: Value, body: Vec<Value>) -> Value {
    json!({
        "nodeType": "WhileStatement", "id": 0, "src": "0:0:0",
        "condition": condition, "body": {"statements": body},
    })
}

fn do_while_stmt(condition: Value, body: Vec<Value>) -> Value {
    json!({
        "nodeType": "DoWhileStatement", "id": 0, "src": "0:0:0",
        "condition": condition, "body": {"statements": body},
    })
}

fn for_stmt(init: Value, condition: Value, loop_expr: Value, body: Vec<Value>) -> Value {
    json!({
        "nodeType": "ForStatement", "id": 0, "src": "0:0:0",
        "initializationExpression": init, "condition": condition,
        "loopExpression": loop_expr, "body": {"statements": body},
    })
}

fn function(name: &str, statements: Vec<Value>) -> Value {
    json!({
        "nodeType": "FunctionDefinition", "id": 0, "src": "0:0:0",
        "name": name, "visibility": "public", "stateMutability": "nonpayable",
        "body": {"statements": statements},
    })
}

fn source_unit(members: Vec<Value>) -> Value {
    json!({
        "id": 0, "src": "0:0:0",
        "nodes": [{
            "nodeType": "ContractDefinition", "id": 0, "src": "0:0:0",
            "name": "Test", "contractKind": "contract", "nodes": members,
        }],
    })
}

fn build(value: Value) -> ControlFlowGraph {
    let unit: SourceUnit = serde_json::from_value(value).unwrap();
    ControlFlowGraph::build(&unit.validate().unwrap()).unwrap()
}

fn build_single(statements: Vec<Value>) -> ControlFlowGraph {
    build(source_unit(vec![function("f", statements)]))
}

/// The S3-shaped conditional program.
fn conditional_program() -> ControlFlowGraph {
    build_single(vec![
        decl("a", Some(lit(10))),
        decl("b", Some(lit(12))),
        decl("m", Some(lit(20))),
        if_stmt(
            binop("==", ident("a"), lit(10)),
            vec![
                expr_stmt(assign("+=", "b", lit(1))),
                expr_stmt(assign("=", "m", binop("-", ident("b"), lit(2)))),
            ],
            Some(vec![
                expr_stmt(assign("-=", "b", lit(1))),
                expr_stmt(assign("-=", "b", binop("-", ident("a"), ident("m")))),
            ]),
        ),
        decl("n", Some(lit(10))),
        expr_stmt(assign("+=", "m", ident("n"))),
    ])
}

// SECTION: structure

#[test]
fn conditional_builds_one_join_with_labeled_edges() {
    let cfg = conditional_program();

    // exactly one if-join
    assert!(cfg.metadata.get("IfJoin_0").is_some());
    assert!(cfg.metadata.get("IfJoin_1").is_none());

    let cond = cfg.metadata.node("IfStatement_0");
    assert_eq!(
        cond.successor_with(EdgeLabel::True),
        Some(&"ExpressionStatement_0".to_string())
    );
    assert_eq!(
        cond.successor_with(EdgeLabel::False),
        Some(&"ExpressionStatement_2".to_string())
    );

    // both branches' last statements feed the join
    let join = cfg.metadata.node("IfJoin_0");
    assert!(join.prev.contains_key("ExpressionStatement_1"));
    assert!(join.prev.contains_key("ExpressionStatement_3"));

    // the statement after the conditional hangs off the join
    assert!(join.next.contains_key("VariableDeclarationStatement_3"));
}

#[test]
fn if_without_false_body_falls_through_to_join() {
    let cfg = build_single(vec![
        decl("a", Some(lit(1))),
        if_stmt(
            binop("<", ident("a"), lit(2)),
            vec![expr_stmt(assign("=", "a", lit(5)))],
            None,
        ),
    ]);
    let cond = cfg.metadata.node("IfStatement_0");
    assert_eq!(
        cond.successor_with(EdgeLabel::False),
        Some(&"IfJoin_0".to_string())
    );
    assert_eq!(
        cond.successor_with(EdgeLabel::True),
        Some(&"ExpressionStatement_0".to_string())
    );
}

#[test]
fn while_loop_enters_through_its_continue_node() {
    let cfg = build_single(vec![
        decl("a", Some(lit(0))),
        while_stmt(
            binop("<", ident("a"), lit(3)),
            vec![expr_stmt(assign("=", "a", binop("+", ident("a"), lit(1))))],
        ),
    ]);

    let cond = cfg.metadata.node("WhileStatement_0");
    assert_eq!(
        cond.successor_with(EdgeLabel::True),
        Some(&"ExpressionStatement_0".to_string())
    );
    assert_eq!(
        cond.successor_with(EdgeLabel::False),
        Some(&"WhileJoin_0".to_string())
    );

    // the continue node precedes the condition and collects both the initial
    // entry and the back edge
    let cont = cfg.metadata.node("WhileContinue_0");
    assert!(cont.prev.contains_key("VariableDeclarationStatement_0"));
    assert!(cont.prev.contains_key("ExpressionStatement_0"));
    assert_eq!(
        cont.next.get("WhileStatement_0"),
        Some(&Edge::labeled(EdgeLabel::Continue))
    );
}

#[test]
fn for_loop_wires_init_condition_body_and_back_edge() {
    let cfg = build_single(vec![
        decl("a", Some(lit(1))),
        for_stmt(
            decl("i", Some(lit(0))),
            binop("<", ident("i"), lit(3)),
            expr_stmt(assign("=", "i", binop("+", ident("i"), lit(1)))),
            vec![expr_stmt(assign("=", "a", binop("+", ident("a"), lit(1))))],
        ),
        decl("d", Some(lit(7))),
    ]);

    // a -> init -> continue -> condition
    let init = cfg.metadata.node("VariableDeclarationStatement_1");
    assert!(init.prev.contains_key("VariableDeclarationStatement_0"));
    assert!(init.next.contains_key("ForContinue_0"));

    let cond = cfg.metadata.node("ForStatement_0");
    assert!(cond.prev.contains_key("ForContinue_0"));
    assert_eq!(
        cond.successor_with(EdgeLabel::True),
        Some(&"ExpressionStatement_0".to_string())
    );
    assert_eq!(
        cond.successor_with(EdgeLabel::False),
        Some(&"ForJoin_0".to_string())
    );

    // body -> loop expression -> continue
    let body = cfg.metadata.node("ExpressionStatement_0");
    assert!(body.next.contains_key("ExpressionStatement_1"));
    let loop_expr = cfg.metadata.node("ExpressionStatement_1");
    assert!(loop_expr.next.contains_key("ForContinue_0"));

    // the statement after the loop hangs off the join
    let join = cfg.metadata.node("ForJoin_0");
    assert!(join.next.contains_key("VariableDeclarationStatement_2"));
}

#[test]
fn do_while_back_edge_reenters_at_the_entry_node() {
    let cfg = build_single(vec![
        decl("a", Some(lit(0))),
        do_while_stmt(
            binop("<", ident("a"), lit(0)),
            vec![expr_stmt(assign("=", "a", binop("+", ident("a"), lit(1))))],
        ),
    ]);

    let cond = cfg.metadata.node("DoWhileStatement_0");
    assert_eq!(
        cond.successor_with(EdgeLabel::True),
        Some(&"DoWhileEntry_0".to_string())
    );
    assert_eq!(
        cond.successor_with(EdgeLabel::False),
        Some(&"DoWhileJoin_0".to_string())
    );

    // declaration enters through the entry node, so the body runs before the
    // first condition test
    let entry = cfg.metadata.node("DoWhileEntry_0");
    assert!(entry.prev.contains_key("VariableDeclarationStatement_0"));
    assert!(entry.next.contains_key("ExpressionStatement_0"));

    let cont = cfg.metadata.node("DoWhileContinue_0");
    assert!(cont.prev.contains_key("ExpressionStatement_0"));
    assert_eq!(
        cont.next.get("DoWhileStatement_0"),
        Some(&Edge::labeled(EdgeLabel::Continue))
    );
}

#[test]
fn unknown_statement_kinds_become_passthrough_nodes() {
    let cfg = build_single(vec![
        decl("a", Some(lit(1))),
        json!({"nodeType": "Return", "id": 0, "src": "0:0:0", "expression": ident("a")}),
        decl("b", Some(lit(2))),
    ]);

    let passthrough = cfg.metadata.node("Node_0");
    assert_eq!(
        passthrough.kind,
        NodeKind::Passthrough {
            node_type: "Return".to_string()
        }
    );
    assert!(passthrough.prev.contains_key("VariableDeclarationStatement_0"));
    assert!(passthrough.next.contains_key("VariableDeclarationStatement_1"));
}

// SECTION: invariants

#[test]
fn edges_are_symmetric_with_matching_labels() {
    let cfg = conditional_program();
    for (id, node) in cfg.metadata.iter() {
        for (succ, edge) in &node.next {
            assert_eq!(
                cfg.metadata.node(succ).prev.get(id),
                Some(edge),
                "edge {id} -> {succ} has no matching reverse entry"
            );
        }
        for (pred, edge) in &node.prev {
            assert_eq!(
                cfg.metadata.node(pred).next.get(id),
                Some(edge),
                "edge {pred} -> {id} recorded only on the predecessor side"
            );
        }
    }
}

#[test]
fn source_entry_and_exit_are_unique_and_terminal() {
    let cfg = conditional_program();
    assert!(cfg.metadata.get("SourceEntry_0").is_some());
    assert!(cfg.metadata.get("SourceEntry_1").is_none());
    assert!(cfg.metadata.get("SourceExit_0").is_some());
    assert!(cfg.metadata.get("SourceExit_1").is_none());

    assert!(cfg.metadata.node("SourceEntry_0").prev.is_empty());
    assert!(cfg.metadata.node("SourceExit_0").next.is_empty());
}

#[test]
fn every_flow_node_reaches_the_source_exit() {
    let cfg = conditional_program();
    // forward reachability from the entry
    let mut reached = std::collections::BTreeSet::new();
    let mut stack = vec![cfg.entry.clone()];
    while let Some(id) = stack.pop() {
        if !reached.insert(id.clone()) {
            continue;
        }
        for succ in cfg.metadata.node(&id).next.keys() {
            stack.push(succ.clone());
        }
    }
    assert!(reached.contains(&cfg.exit));

    // every reached node also reaches the exit backwards
    let mut coreached = std::collections::BTreeSet::new();
    let mut stack = vec![cfg.exit.clone()];
    while let Some(id) = stack.pop() {
        if !coreached.insert(id.clone()) {
            continue;
        }
        for pred in cfg.metadata.node(&id).prev.keys() {
            stack.push(pred.clone());
        }
    }
    for id in &reached {
        assert!(coreached.contains(id), "{id} cannot reach the source exit");
    }
}

#[test]
fn building_twice_is_deterministic() {
    let collect = |cfg: &ControlFlowGraph| -> Vec<(NodeId, Vec<(NodeId, Option<EdgeLabel>)>)> {
        cfg.metadata
            .iter()
            .map(|(id, node)| {
                let next = node.next.iter().map(|(s, e)| (s.clone(), e.label)).collect();
                (id.clone(), next)
            })
            .collect()
    };
    let first = conditional_program();
    let second = conditional_program();
    assert_eq!(collect(&first), collect(&second));
}

// SECTION: leaves

#[test]
fn function_leaves_are_its_exit() {
    let cfg = conditional_program();
    let leaves = cfg.metadata.leaves("FunctionDefinition_0");
    assert_eq!(leaves.len(), 1);
    assert!(leaves.contains("FunctionExit_0"));
}

#[test]
fn composite_leaves_delegate_to_their_join() {
    let cfg = conditional_program();
    assert_eq!(
        cfg.metadata.leaves("IfStatement_0"),
        cfg.metadata.leaves("IfJoin_0")
    );
}

#[test]
fn function_bounds_are_exposed() {
    let cfg = conditional_program();
    let bounds = cfg.function_bounds("f").unwrap();
    assert_eq!(bounds.entry, "FunctionEntry_0");
    assert_eq!(bounds.exit, "FunctionExit_0");
    assert_eq!(bounds.definition, "FunctionDefinition_0");
    assert!(cfg.function_bounds("missing").is_none());
}

#[test]
fn dot_output_covers_the_graph_with_labels() {
    let cfg = build_single(vec![
        decl("a", Some(lit(1))),
        if_stmt(
            binop("<", ident("a"), lit(2)),
            vec![expr_stmt(assign("=", "a", lit(5)))],
            None,
        ),
    ]);
    let dot = cfg.to_dot();
    assert!(dot.starts_with("digraph cfg {"));
    assert!(dot.contains("\"IfStatement_0\" -> \"ExpressionStatement_0\" [label=\"True\"];"));
    assert!(dot.contains("\"IfStatement_0\" -> \"IfJoin_0\" [label=\"False\"];"));
    assert!(dot.contains("\"SourceEntry_0\""));
}

#[test]
fn malformed_statements_are_rejected_before_building() {
    // an if statement without its condition cannot be lowered
    let value = source_unit(vec![function(
        "f",
        vec![json!({
            "nodeType": "IfStatement", "id": 0, "src": "0:0:0",
            "trueBody": {"statements": []},
        })],
    )]);
    let unit: SourceUnit = serde_json::from_value(value).unwrap();
    assert!(unit.validate().is_err());
}
