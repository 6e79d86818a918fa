//! Static analysis over the CFG: registries, per-point abstract states, and
//! the collecting-semantics fixpoint.

use std::collections::BTreeMap as Map;

use derive_more::Display;

use crate::middle_end::cfg::NodeId;

use self::interval::{IntervalManager, State};

pub mod collecting;
pub mod interval;


/// Exit-state key used when a node has one undifferentiated successor.
pub const WILDCARD: &str = "*";

/// Three-valued comparison verdict.
///
/// `Any` means the interval operands straddle the decision boundary: both
/// branches must receive the entry state.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Ternary {
    True,
    False,
    Any,
}

// SECTION: variable and constant registries

/// A caller-supplied constant binding: a known value, a range, or top.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Range(i64, i64),
    Top,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VarRecord {
    pub id: usize,
    pub name: String,
    pub value: Option<ConstValue>,
}

/// Dense indexing of names: ids are allocated on first sighting and double
/// as dimensions into the abstract states. Used for both the variable
/// registry (populated by discovery) and the constant registry (populated by
/// the caller).
#[derive(Clone, Debug, Default)]
pub struct VariableRegistry {
    table: Map<String, VarRecord>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        VariableRegistry::default()
    }

    /// Idempotent: re-registering a name keeps its id and value.
    pub fn register(&mut self, name: &str, value: Option<ConstValue>) -> &VarRecord {
        let next_id = self.table.len();
        self.table.entry(name.to_string()).or_insert(VarRecord {
            id: next_id,
            name: name.to_string(),
            value,
        })
    }

    pub fn get(&self, name: &str) -> Option<&VarRecord> {
        self.table.get(name)
    }

    pub fn get_id(&self, name: &str) -> Option<usize> {
        self.table.get(name).map(|record| record.id)
    }

    pub fn get_value(&self, name: &str) -> Option<ConstValue> {
        self.table.get(name).and_then(|record| record.value)
    }

    pub fn set_value(&mut self, name: &str, value: ConstValue) -> bool {
        match self.table.get_mut(name) {
            Some(record) => {
                record.value = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Registered names sorted by id.
    pub fn names_by_id(&self) -> Vec<&str> {
        let mut records: Vec<&VarRecord> = self.table.values().collect();
        records.sort_by_key(|record| record.id);
        records
            .into_iter()
            .map(|record| record.name.as_str())
            .collect()
    }
}

// SECTION: point states

#[derive(Clone, Debug, Default)]
struct NodeStates {
    /// iteration -> entry state
    entry: Map<usize, State>,
    /// iteration -> successor id (or `"*"`) -> exit state
    exit: Map<usize, Map<String, State>>,
}

/// Per-node, per-iteration abstract states, plus the fixed-point detector.
#[derive(Clone, Debug)]
pub struct PointState {
    states: Map<NodeId, NodeStates>,
    starting_node: NodeId,
    iteration: usize,
}

impl PointState {
    pub fn new(starting_node: &str) -> Self {
        PointState {
            states: Map::new(),
            starting_node: starting_node.to_string(),
            iteration: 0,
        }
    }

    /// Returns false if the node was already registered.
    pub fn register_node(&mut self, id: &str) -> bool {
        if self.states.contains_key(id) {
            return false;
        }
        self.states.insert(id.to_string(), NodeStates::default());
        true
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.states.keys()
    }

    /// Iteration-0 states: the starting node begins at the initial state
    /// (top unless the caller supplies one), every other node at bottom.
    pub fn init_node_states(&mut self, manager: &IntervalManager, initial: Option<State>) {
        let start = self.starting_node.clone();
        for (id, states) in &mut self.states {
            let state = if *id == start {
                initial.clone().unwrap_or_else(|| manager.top())
            } else {
                manager.bottom()
            };
            states.entry.insert(0, state.clone());
            states
                .exit
                .insert(0, Map::from([(WILDCARD.to_string(), state)]));
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn start_round(&mut self) {
        self.iteration += 1;
    }

    pub fn entry_state(&self, id: &str, iteration: usize) -> Option<&State> {
        self.states.get(id)?.entry.get(&iteration)
    }

    /// Exit state directed at `next`, falling back to the wildcard entry.
    pub fn exit_state(&self, id: &str, iteration: usize, next: &str) -> Option<&State> {
        let exits = self.states.get(id)?.exit.get(&iteration)?;
        exits.get(next).or_else(|| exits.get(WILDCARD))
    }

    pub fn exit_map(&self, id: &str, iteration: usize) -> Option<&Map<String, State>> {
        self.states.get(id)?.exit.get(&iteration)
    }

    /// Entry state for the current iteration: the join over the predecessors'
    /// previous-iteration exits directed at this node. The starting node (and
    /// any node with no usable predecessor) carries its previous entry
    /// forward. With `widen` set, the previous entry is widened with the
    /// join instead of being replaced by it.
    pub fn update_entry(
        &mut self,
        id: &str,
        prev_ids: &[NodeId],
        manager: &IntervalManager,
        widen: bool,
    ) -> State {
        let iteration = self.iteration;
        let mut joined: Option<State> = None;
        if id != self.starting_node {
            for prev in prev_ids {
                // predecessors outside the analyzed slice contribute nothing
                let Some(exit) = self.exit_state(prev, iteration - 1, id) else {
                    continue;
                };
                joined = Some(match joined {
                    None => exit.clone(),
                    Some(acc) => manager.join(&acc, exit),
                });
            }
        }

        let previous = self.entry_state(id, iteration - 1).cloned();
        let state = match (joined, previous) {
            (Some(new), Some(prev)) if widen => manager.widen(&prev, &new),
            (Some(new), _) => new,
            (None, Some(prev)) => prev,
            (None, None) => manager.bottom(),
        };

        if let Some(states) = self.states.get_mut(id) {
            states.entry.insert(iteration, state.clone());
        }
        state
    }

    pub fn update_exit(&mut self, id: &str, next: &str, state: State) {
        let iteration = self.iteration;
        if let Some(states) = self.states.get_mut(id) {
            states
                .exit
                .entry(iteration)
                .or_default()
                .insert(next.to_string(), state);
        }
    }

    /// True iff every registered node's entry state is unchanged since the
    /// previous iteration.
    pub fn fixed_point(&self, manager: &IntervalManager) -> bool {
        if self.iteration < 1 {
            return false;
        }
        for states in self.states.values() {
            let (Some(current), Some(previous)) = (
                states.entry.get(&self.iteration),
                states.entry.get(&(self.iteration - 1)),
            ) else {
                return false;
            };
            if !manager.equal(current, previous) {
                return false;
            }
        }
        true
    }

    /// Final entry state of a node, from the last completed iteration.
    pub fn final_entry(&self, id: &str) -> Option<&State> {
        self.entry_state(id, self.iteration)
    }

    pub fn final_exit(&self, id: &str, next: &str) -> Option<&State> {
        self.exit_state(id, self.iteration, next)
    }
}
