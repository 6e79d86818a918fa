//! Collecting semantics in the interval domain.
//!
//! The driver walks the CFG depth-first once per round. A node's entry state
//! is the join of its predecessors' previous-round exit states; the per-kind
//! transfer function then produces one exit state per successor. Rounds
//! repeat until no entry state changed, so the per-round reads always see
//! states one iteration behind the writes.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use tracing::{debug, info, warn};

use crate::commons::AnalysisError;
use crate::middle_end::cfg::{CfgMetadata, ControlFlowGraph, EdgeLabel, Node, NodeId, NodeKind};

use super::interval::{Binop, Interval, IntervalManager, State, Texpr};
use super::{ConstValue, PointState, Ternary, VariableRegistry, WILDCARD};

#[derive(Clone, Copy, Debug, Default)]
pub struct AnalysisConfig {
    /// Apply widening at loop heads once this many rounds have run. Interval
    /// analysis of a loop without a constant bound will not terminate
    /// without it.
    pub widening_after: Option<usize>,
    /// Abort with `IterationBudgetExhausted` after this many rounds.
    pub max_rounds: Option<usize>,
}

/// One analysis run over a slice of the CFG, from `start` to `end`
/// (typically a function's entry and exit nodes).
pub struct CollectingSemantics<'c> {
    cfg: &'c ControlFlowGraph,
    start: NodeId,
    end: NodeId,
    config: AnalysisConfig,
    pub variables: VariableRegistry,
    pub constants: VariableRegistry,
    pub states: PointState,
    manager: Option<IntervalManager>,
}

impl<'c> CollectingSemantics<'c> {
    pub fn new(cfg: &'c ControlFlowGraph, start: &str, end: &str) -> Self {
        CollectingSemantics {
            cfg,
            start: start.to_string(),
            end: end.to_string(),
            config: AnalysisConfig::default(),
            variables: VariableRegistry::new(),
            constants: VariableRegistry::new(),
            states: PointState::new(start),
            manager: None,
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin a name to a known value or range before `compute` is called.
    /// Reads of the name resolve through this registry when it is not a
    /// discovered variable.
    pub fn set_constant(&mut self, name: &str, value: ConstValue) {
        self.constants.register(name, Some(value));
        self.constants.set_value(name, value);
    }

    /// Run the chaotic-iteration fixpoint. Returns the number of rounds.
    pub fn compute(&mut self) -> Result<usize, AnalysisError> {
        self.compute_from(None)
    }

    /// Like `compute`, with a caller-supplied entry state for the starting
    /// node instead of top.
    pub fn compute_from(&mut self, initial: Option<State>) -> Result<usize, AnalysisError> {
        self.discover_variables();
        let manager = IntervalManager::new(self.variables.len());
        self.manager = Some(manager);
        self.states.init_node_states(&manager, initial);

        let mut rounds = 0usize;
        loop {
            self.states.start_round();
            rounds += 1;
            debug!(round = rounds, "fixpoint round");

            let mut visited = Set::new();
            let start = self.start.clone();
            self.visit(&start, &mut visited, manager)?;

            if self.states.fixed_point(&manager) {
                break;
            }
            if let Some(cap) = self.config.max_rounds {
                if rounds >= cap {
                    return Err(AnalysisError::IterationBudgetExhausted(rounds));
                }
            }
        }
        info!(rounds, variables = self.variables.len(), "fixed point reached");
        Ok(rounds)
    }

    // SECTION: traversal

    fn discover_variables(&mut self) {
        let mut visited = Set::new();
        let start = self.start.clone();
        self.discover(&start, &mut visited);
    }

    fn discover(&mut self, id: &NodeId, visited: &mut Set<NodeId>) {
        if !visited.insert(id.clone()) {
            return;
        }
        let cfg = self.cfg;
        let node = cfg.metadata.node(id);
        self.states.register_node(id);
        for name in variables_assigned(&cfg.metadata, node) {
            debug!(node = %id, variable = %name, "registered variable");
            self.variables.register(&name, None);
        }
        if *id != self.end {
            for succ in node.next.keys() {
                self.discover(succ, visited);
            }
        }
    }

    fn visit(
        &mut self,
        id: &NodeId,
        visited: &mut Set<NodeId>,
        manager: IntervalManager,
    ) -> Result<(), AnalysisError> {
        if !visited.insert(id.clone()) {
            return Ok(());
        }
        let cfg = self.cfg;
        let node = cfg.metadata.node(id);

        let prev_ids: Vec<NodeId> = node.prev.keys().cloned().collect();
        let widen = self.should_widen(node);
        let entry = self.states.update_entry(id, &prev_ids, &manager, widen);

        let prior = self
            .states
            .exit_map(id, self.states.iteration() - 1)
            .cloned()
            .unwrap_or_default();
        let exits = self.transfer(node, &entry, &prior, &manager)?;
        for (next, state) in exits {
            self.states.update_exit(id, &next, state);
        }

        if *id != self.end {
            for succ in node.next.keys() {
                self.visit(succ, visited, manager)?;
            }
        }
        Ok(())
    }

    fn should_widen(&self, node: &Node) -> bool {
        match self.config.widening_after {
            Some(threshold) => {
                node.kind.is_loop_head() && self.states.iteration() > threshold
            }
            None => false,
        }
    }

    // SECTION: transfer functions

    /// Successor-indexed exit states for one node, given its entry state and
    /// the previous iteration's exit states.
    fn transfer(
        &self,
        node: &Node,
        entry: &State,
        prior: &Map<String, State>,
        manager: &IntervalManager,
    ) -> Result<Map<String, State>, AnalysisError> {
        match &node.kind {
            NodeKind::VariableDeclarationStatement {
                name,
                initial_value: Some(init),
            } => {
                let rhs = self.arith_expr(init)?;
                let dim = self
                    .variables
                    .get_id(name)
                    .ok_or_else(|| AnalysisError::UnknownIdentifier(name.clone()))?;
                Ok(single_exit(manager.assign(entry, dim, &rhs)?))
            }
            NodeKind::ExpressionStatement { expression } => {
                self.transfer_expression_statement(node, expression, entry, manager)
            }
            NodeKind::IfStatement { condition } => {
                let verdict = self.condition_verdict(condition, entry, manager)?;
                let false_next = self.labeled_successor(node, EdgeLabel::False)?;
                // an empty true body collapses both branch edges onto the join
                let true_next = node
                    .successor_with(EdgeLabel::True)
                    .cloned()
                    .unwrap_or_else(|| false_next.clone());

                let mut exits = Map::new();
                if true_next == false_next {
                    exits.insert(true_next, entry.clone());
                    return Ok(exits);
                }
                let (true_state, false_state) = match verdict {
                    Ternary::True => (entry.clone(), manager.bottom()),
                    Ternary::False => (manager.bottom(), entry.clone()),
                    Ternary::Any => (entry.clone(), entry.clone()),
                };
                exits.insert(true_next, true_state);
                exits.insert(false_next, false_state);
                Ok(exits)
            }
            NodeKind::ForStatement { condition }
            | NodeKind::WhileStatement { condition }
            | NodeKind::DoWhileStatement { condition } => {
                let verdict = self.condition_verdict(condition, entry, manager)?;
                let taken = self.labeled_successor(node, EdgeLabel::True)?;
                let fallen = self.labeled_successor(node, EdgeLabel::False)?;

                // the branch the verdict does not select keeps its previous
                // exit state; overwriting it with bottom would let the body
                // states collapse once the condition settles
                let prior_of = |next: &NodeId| {
                    prior
                        .get(next.as_str())
                        .or_else(|| prior.get(WILDCARD))
                        .cloned()
                        .unwrap_or_else(|| manager.bottom())
                };
                let mut taken_state = prior_of(&taken);
                let mut fallen_state = prior_of(&fallen);
                match verdict {
                    Ternary::True => taken_state = entry.clone(),
                    Ternary::False => fallen_state = entry.clone(),
                    Ternary::Any => {
                        taken_state = entry.clone();
                        fallen_state = entry.clone();
                    }
                }

                let mut exits = Map::new();
                exits.insert(taken, taken_state);
                exits.insert(fallen, fallen_state);
                Ok(exits)
            }
            // entries, exits, continues, joins, declarations, pass-throughs
            _ => Ok(single_exit(entry.clone())),
        }
    }

    fn transfer_expression_statement(
        &self,
        node: &Node,
        expression: &NodeId,
        entry: &State,
        manager: &IntervalManager,
    ) -> Result<Map<String, State>, AnalysisError> {
        let meta = &self.cfg.metadata;
        match &meta.node(expression).kind {
            NodeKind::Assignment {
                operator,
                left,
                right,
            } => {
                let NodeKind::Identifier { name } = &meta.node(left).kind else {
                    warn!(node = %node.id, "assignment target is not a direct identifier, treating as identity");
                    return Ok(single_exit(entry.clone()));
                };
                let dim = self
                    .variables
                    .get_id(name)
                    .ok_or_else(|| AnalysisError::UnknownIdentifier(name.clone()))?;
                let rhs = self.arith_expr(right)?;
                // compound assignments desugar to `x = x op rhs`
                let tree = match operator.as_str() {
                    "=" => rhs,
                    "+=" => Texpr::binop(Binop::Add, Texpr::Dim(dim), rhs),
                    "-=" => Texpr::binop(Binop::Sub, Texpr::Dim(dim), rhs),
                    "*=" => Texpr::binop(Binop::Mul, Texpr::Dim(dim), rhs),
                    "/=" => Texpr::binop(Binop::Div, Texpr::Dim(dim), rhs),
                    _ => {
                        warn!(node = %node.id, operator = %operator, "unsupported assignment operator, treating as identity");
                        return Ok(single_exit(entry.clone()));
                    }
                };
                Ok(single_exit(manager.assign(entry, dim, &tree)?))
            }
            NodeKind::UnaryOperation {
                operator, operand, ..
            } if operator == "++" || operator == "--" => {
                let NodeKind::Identifier { name } = &meta.node(operand).kind else {
                    warn!(node = %node.id, "inc/dec target is not a direct identifier, treating as identity");
                    return Ok(single_exit(entry.clone()));
                };
                let dim = self
                    .variables
                    .get_id(name)
                    .ok_or_else(|| AnalysisError::UnknownIdentifier(name.clone()))?;
                let op = if operator == "++" { Binop::Add } else { Binop::Sub };
                let tree = Texpr::binop(op, Texpr::Dim(dim), Texpr::Cst(Interval::singleton(1)));
                Ok(single_exit(manager.assign(entry, dim, &tree)?))
            }
            // a pure expression in statement position changes nothing
            _ => Ok(single_exit(entry.clone())),
        }
    }

    fn labeled_successor(&self, node: &Node, label: EdgeLabel) -> Result<NodeId, AnalysisError> {
        node.successor_with(label).cloned().ok_or_else(|| {
            AnalysisError::MalformedAst(format!(
                "branching node `{}` has no outgoing `{label}` edge",
                node.id
            ))
        })
    }

    // SECTION: expression evaluation

    /// Lower an arithmetic expression subtree into a domain expression tree.
    fn arith_expr(&self, id: &NodeId) -> Result<Texpr, AnalysisError> {
        let meta = &self.cfg.metadata;
        let node = meta.node(id);
        match &node.kind {
            NodeKind::Literal { value } => Ok(Texpr::Cst(Interval::singleton(*value))),
            NodeKind::Identifier { name } => {
                if let Some(dim) = self.variables.get_id(name) {
                    return Ok(Texpr::Dim(dim));
                }
                match self.constants.get_value(name) {
                    Some(ConstValue::Int(value)) => Ok(Texpr::Cst(Interval::singleton(value))),
                    Some(ConstValue::Range(lo, hi)) => Ok(Texpr::Cst(Interval::of(lo, hi))),
                    Some(ConstValue::Top) => Ok(Texpr::Cst(Interval::top())),
                    None => Err(AnalysisError::UnknownIdentifier(name.clone())),
                }
            }
            NodeKind::BinaryOperation {
                operator,
                left,
                right,
            } => {
                let op = match operator.as_str() {
                    "+" => Binop::Add,
                    "-" => Binop::Sub,
                    "*" => Binop::Mul,
                    "/" => Binop::Div,
                    _ => {
                        return Err(AnalysisError::UnsupportedAstNode(format!(
                            "operator `{operator}` in an arithmetic context"
                        )))
                    }
                };
                Ok(Texpr::binop(op, self.arith_expr(left)?, self.arith_expr(right)?))
            }
            NodeKind::UnaryOperation {
                operator, operand, ..
            } => match operator.as_str() {
                "-" => Ok(Texpr::Neg(Box::new(self.arith_expr(operand)?))),
                "+" => self.arith_expr(operand),
                _ => Err(AnalysisError::UnsupportedAstNode(format!(
                    "unary operator `{operator}` in an arithmetic context"
                ))),
            },
            other => Err(AnalysisError::UnsupportedAstNode(other.tag().to_string())),
        }
    }

    /// Evaluate a branch condition to a three-valued verdict under the
    /// entry state.
    fn condition_verdict(
        &self,
        id: &NodeId,
        entry: &State,
        manager: &IntervalManager,
    ) -> Result<Ternary, AnalysisError> {
        let node = self.cfg.metadata.node(id);
        match &node.kind {
            NodeKind::BinaryOperation {
                operator,
                left,
                right,
            } if is_comparison(operator) => {
                let l = manager.bound(entry, &self.arith_expr(left)?)?;
                let r = manager.bound(entry, &self.arith_expr(right)?)?;
                Ok(compare(operator, &l, &r))
            }
            _ => {
                warn!(node = %node.id, "condition is not an interval comparison, assuming either branch");
                Ok(Ternary::Any)
            }
        }
    }

    // SECTION: results

    pub fn start_node(&self) -> &NodeId {
        &self.start
    }

    pub fn end_node(&self) -> &NodeId {
        &self.end
    }

    pub fn manager(&self) -> Option<&IntervalManager> {
        self.manager.as_ref()
    }

    /// The interval of a variable within a state produced by this analysis.
    pub fn interval_of(&self, state: &State, name: &str) -> Option<Interval> {
        state.get(self.variables.get_id(name)?)
    }

    /// Render a state as `name -> [lo, hi]` lines, in variable-id order.
    pub fn render_state(&self, state: &State) -> String {
        let mut out = String::new();
        for name in self.variables.names_by_id() {
            if let Some(interval) = self.interval_of(state, name) {
                out.push_str(&format!("{name} -> {interval}\n"));
            }
        }
        out
    }
}

fn single_exit(state: State) -> Map<String, State> {
    Map::from([(WILDCARD.to_string(), state)])
}

fn is_comparison(operator: &str) -> bool {
    matches!(operator, "==" | "!=" | "<" | "<=" | ">" | ">=")
}

/// Names written by a node: declared variables and direct assignment or
/// inc/dec targets.
pub(crate) fn variables_assigned(meta: &CfgMetadata, node: &Node) -> Set<String> {
    let mut names = Set::new();
    match &node.kind {
        NodeKind::VariableDeclarationStatement { name, .. }
        | NodeKind::VariableDeclaration { name } => {
            names.insert(name.clone());
        }
        NodeKind::ExpressionStatement { expression } => match &meta.node(expression).kind {
            NodeKind::Assignment { left, .. } => {
                if let NodeKind::Identifier { name } = &meta.node(left).kind {
                    names.insert(name.clone());
                }
            }
            NodeKind::UnaryOperation {
                operator, operand, ..
            } if operator == "++" || operator == "--" => {
                if let NodeKind::Identifier { name } = &meta.node(operand).kind {
                    names.insert(name.clone());
                }
            }
            _ => {}
        },
        _ => {}
    }
    names
}

/// Three-valued interval comparison.
///
/// `Any` is returned when the outcome set straddles the decision boundary;
/// equality tests coarsen to a definite answer on interval equality.
pub(crate) fn compare(operator: &str, l: &Interval, r: &Interval) -> Ternary {
    use Ternary::{Any, False, True};

    if l.is_bottom() || r.is_bottom() {
        return Any;
    }
    let single = l.is_singleton();
    match operator {
        "<" => {
            if l.sup < r.inf {
                True
            } else if l.sup < r.sup || (single && l.inf < r.sup) {
                Any
            } else {
                False
            }
        }
        ">" => {
            if l.inf > r.sup {
                True
            } else if l.inf > r.inf || (single && l.sup > r.inf) {
                Any
            } else {
                False
            }
        }
        "<=" => {
            if l.sup <= r.inf {
                True
            } else if l.sup <= r.sup || (single && l.inf <= r.sup) {
                Any
            } else {
                False
            }
        }
        ">=" => {
            if l.inf >= r.sup {
                True
            } else if l.inf >= r.inf || (single && l.sup >= r.inf) {
                Any
            } else {
                False
            }
        }
        "==" => {
            if l.is_equal(r) {
                True
            } else {
                False
            }
        }
        "!=" => {
            if l.is_equal(r) {
                False
            } else {
                True
            }
        }
        _ => Any,
    }
}
