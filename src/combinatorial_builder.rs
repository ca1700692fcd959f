//! Lifts a combinatorial specification (dimensions, constraints,
//! transitions, setups, checkers, invariants) into a concrete
//! [`StateGraph`].

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::constraint::ConstraintSet;
use crate::context::Context;
use crate::covering_array::CoveringArrayGenerator;
use crate::dimension::{Combination, DimValue, Difference, DimensionSpace};
use crate::error::BuilderError;
use crate::state_graph::{
    Action, Edge, Invariant, InvariantCheck, Severity, StateChecker, StateGraph, StateNode,
};

type TransitionKey = (String, DimValue, DimValue);
type SetupKey = (String, DimValue);

struct InvariantSpec<C, D> {
    name: String,
    description: String,
    severity: Severity,
    check: Arc<dyn InvariantCheck<C, D>>,
}

/// Delegates to a shared, reference-counted check. Lets the same
/// registered invariant be re-attached to a freshly assembled graph
/// every time `build`/`build_journey_graph` runs, without requiring
/// `InvariantCheck` trait objects to be `Clone`.
struct SharedInvariant<C, D> {
    check: Arc<dyn InvariantCheck<C, D>>,
}

impl<C, D> InvariantCheck<C, D> for SharedInvariant<C, D> {
    fn check(&self, client: &C, store: Option<&D>, context: &Context) -> Result<bool, String> {
        self.check.check(client, store, context)
    }
}

/// Builds a [`StateGraph`] out of a [`DimensionSpace`], a
/// [`ConstraintSet`], and the registered transitions/setups/checkers/
/// invariants that give combinatorial dimension values operational
/// meaning.
pub struct CombinatorialGraphBuilder<C, D> {
    name: String,
    space: DimensionSpace,
    constraints: ConstraintSet,
    seed: u64,
    transitions: HashMap<TransitionKey, Arc<dyn Action<C>>>,
    setups: HashMap<SetupKey, Rc<dyn Action<C>>>,
    checkers: HashMap<SetupKey, Arc<dyn StateChecker<C, D>>>,
    invariants: Vec<InvariantSpec<C, D>>,
    initial: Option<Combination>,
}

impl<C: 'static, D: 'static> CombinatorialGraphBuilder<C, D> {
    pub fn new(name: impl Into<String>, space: DimensionSpace, constraints: ConstraintSet) -> Self {
        Self {
            name: name.into(),
            space,
            constraints,
            seed: 0,
            transitions: HashMap::new(),
            setups: HashMap::new(),
            checkers: HashMap::new(),
            invariants: Vec::new(),
            initial: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn space(&self) -> &DimensionSpace {
        &self.space
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_value(&self, dimension: &str, value: &DimValue) -> Result<(), BuilderError> {
        let dim = self
            .space
            .dimension(dimension)
            .ok_or_else(|| crate::error::DimensionError::UnknownDimension {
                name: dimension.to_string(),
            })?;
        if !dim.values().contains(value) {
            return Err(crate::error::DimensionError::ValueNotDeclared {
                dimension: dimension.to_string(),
                value: value.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn register_transition(
        &mut self,
        dimension: impl Into<String>,
        from: DimValue,
        to: DimValue,
        action: impl Action<C> + 'static,
    ) -> Result<(), BuilderError> {
        let dimension = dimension.into();
        self.check_value(&dimension, &from)?;
        self.check_value(&dimension, &to)?;
        self.transitions
            .insert((dimension, from, to), Arc::new(action));
        Ok(())
    }

    /// The registered setup action for `(dimension, value)`, if any.
    /// Exposed for the live executor's per-combination replay, which
    /// needs to invoke setups directly without going through a graph.
    pub fn setup_for(&self, dimension: &str, value: &DimValue) -> Option<Rc<dyn Action<C>>> {
        self.setups.get(&(dimension.to_string(), value.clone())).cloned()
    }

    pub fn register_setup(
        &mut self,
        dimension: impl Into<String>,
        value: DimValue,
        action: impl Action<C> + 'static,
    ) -> Result<(), BuilderError> {
        let dimension = dimension.into();
        self.check_value(&dimension, &value)?;
        self.setups.insert((dimension, value), Rc::new(action));
        Ok(())
    }

    pub fn register_checker(
        &mut self,
        dimension: impl Into<String>,
        value: DimValue,
        checker: impl StateChecker<C, D> + 'static,
    ) -> Result<(), BuilderError> {
        let dimension = dimension.into();
        self.check_value(&dimension, &value)?;
        self.checkers.insert((dimension, value), Arc::new(checker));
        Ok(())
    }

    pub fn add_invariant(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        check: impl InvariantCheck<C, D> + 'static,
    ) {
        self.invariants.push(InvariantSpec {
            name: name.into(),
            description: description.into(),
            severity,
            check: Arc::new(check),
        });
    }

    /// Registers the combination to prefer as the graph's initial
    /// node. Must satisfy every registered constraint.
    pub fn set_initial(&mut self, combination: Combination) -> Result<(), BuilderError> {
        if !self.constraints.is_valid_combination(&combination) {
            return Err(BuilderError::InvalidInitialCombination);
        }
        self.initial = Some(combination);
        Ok(())
    }

    /// Builds a graph from an explicit, constraint-filtered list of
    /// combinations.
    pub fn build_from(&self, combinations: Vec<Combination>) -> Result<StateGraph<C, D>, BuilderError> {
        let combinations = self.constraints.filter(combinations);
        self.assemble(combinations)
    }

    /// Builds a graph using the covering-array generator at the
    /// requested strength (clamped to the dimension count).
    pub fn build(&self, strength: usize) -> Result<StateGraph<C, D>, BuilderError> {
        let combinations = self.generate_combinations(strength)?;
        self.assemble(combinations)
    }

    /// Builds both the graph and the combination list used to build
    /// it, so a live executor can drive graph exploration and
    /// per-combination replay from one covering-array computation.
    pub fn build_journey_graph(
        &self,
        strength: usize,
    ) -> Result<(StateGraph<C, D>, Vec<Combination>), BuilderError> {
        let combinations = self.generate_combinations(strength)?;
        let graph = self.assemble(combinations.clone())?;
        Ok((graph, combinations))
    }

    fn generate_combinations(&self, strength: usize) -> Result<Vec<Combination>, BuilderError> {
        let strength = strength.min(self.space.len()).max(1);
        let mut generator = CoveringArrayGenerator::new(self.space.clone(), &self.constraints, self.seed);
        Ok(generator.generate(strength)?)
    }

    fn resolve_initial<'a>(&self, combinations: &'a [Combination]) -> &'a Combination {
        if let Some(requested) = &self.initial {
            if let Some(found) = combinations.iter().find(|c| *c == requested) {
                return found;
            }
            // `max_by_key` keeps the last tied element; ties here must
            // break by insertion order, so fold with a strict `>`.
            let mut best_index = 0;
            let mut best_score = combinations[0].matches(requested);
            for (index, candidate) in combinations.iter().enumerate().skip(1) {
                let score = candidate.matches(requested);
                if score > best_score {
                    best_score = score;
                    best_index = index;
                }
            }
            return &combinations[best_index];
        }
        let default = self.space.default_combination();
        if let Some(found) = combinations.iter().find(|c| *c == &default) {
            return found;
        }
        &combinations[0]
    }

    fn assemble(&self, combinations: Vec<Combination>) -> Result<StateGraph<C, D>, BuilderError> {
        if combinations.is_empty() {
            return Err(BuilderError::NoValidCombinations);
        }

        let mut graph = StateGraph::new(self.name.clone());

        for combination in &combinations {
            let id = combination.node_id();
            let mut node = StateNode::new(id, combination.description());

            let applicable_checkers: Vec<Arc<dyn StateChecker<C, D>>> = combination
                .values()
                .iter()
                .filter_map(|(dim, val)| self.checkers.get(&(dim.clone(), val.clone())).cloned())
                .collect();
            if !applicable_checkers.is_empty() {
                let combo_json = combination.to_json();
                node = node.with_checker(Box::new(CompositeChecker {
                    checkers: applicable_checkers,
                    combination: combo_json,
                }));
            }

            let mut dims: Vec<&String> = combination.values().keys().collect();
            dims.sort();
            for dim in dims {
                let value = combination.get(dim).expect("dim came from this combination");
                if let Some(action) = self.setups.get(&(dim.clone(), value.clone())) {
                    node = node.with_entry_action(action.clone());
                }
            }

            graph.add_node(node)?;
        }

        let initial = self.resolve_initial(&combinations).node_id();
        graph.set_initial(initial)?;

        for a in &combinations {
            for b in &combinations {
                if a == b {
                    continue;
                }
                let Difference::Single(dim) = a.differs_by_one(b) else {
                    continue;
                };
                let from_value = a.get(&dim).expect("differing dimension present").clone();
                let to_value = b.get(&dim).expect("differing dimension present").clone();
                let Some(action) = self
                    .transitions
                    .get(&(dim.clone(), from_value.clone(), to_value.clone()))
                    .cloned()
                else {
                    continue;
                };

                let edge_name = format!(
                    "{dim}:{from_value}->{to_value}@{}->{}",
                    a.node_id(),
                    b.node_id()
                );
                let wrapped = WrappedTransition {
                    inner: action,
                    from_combination: a.to_json(),
                    to_combination: b.to_json(),
                    changed_dimension: dim,
                    from_value: Json::from(&from_value),
                    to_value: Json::from(&to_value),
                };
                graph.add_edge(Edge::new(
                    edge_name,
                    a.node_id(),
                    b.node_id(),
                    format!("{} -> {}", a.node_id(), b.node_id()),
                    Box::new(wrapped),
                ))?;
            }
        }

        for spec in &self.invariants {
            graph.add_invariant(Invariant::new(
                spec.name.clone(),
                spec.description.clone(),
                spec.severity,
                Box::new(SharedInvariant {
                    check: spec.check.clone(),
                }),
            ))?;
        }

        Ok(graph)
    }

    /// Lists dimensions, registered counts, and any
    /// `(dimension, from, to)` adjacent-value pairs with no
    /// registered transition -- gaps in coverage the author may want
    /// to fill.
    pub fn summary(&self, strength: usize) -> String {
        let mut lines = vec![
            format!("Combinatorial builder: {}", self.name),
            format!("Dimensions: {}", self.space.len()),
            format!("Registered transitions: {}", self.transitions.len()),
            format!("Registered setups: {}", self.setups.len()),
            format!("Registered checkers: {}", self.checkers.len()),
            format!("Registered invariants: {}", self.invariants.len()),
        ];

        let clamped_strength = strength.min(self.space.len()).max(1);
        if let Ok(combinations) = self.generate_combinations(strength) {
            let generator =
                CoveringArrayGenerator::new(self.space.clone(), &self.constraints, self.seed);
            if let Ok(stats) = generator.coverage_stats(&combinations, clamped_strength) {
                lines.push(format!(
                    "Coverage at strength {}: {:.1}% ({} / {} tuples, {} tests)",
                    stats.strength,
                    stats.coverage_percentage(),
                    stats.covered_tuples,
                    stats.total_feasible_tuples,
                    stats.test_count,
                ));
            }
        }

        let missing = self.missing_transitions();
        if missing.is_empty() {
            lines.push("No missing transitions between adjacent dimension values.".to_string());
        } else {
            lines.push(format!("Missing transitions ({}):", missing.len()));
            for (dim, from, to) in missing {
                lines.push(format!("  - {dim}: {from} -> {to}"));
            }
        }

        lines.join("\n")
    }

    fn missing_transitions(&self) -> Vec<(String, DimValue, DimValue)> {
        let mut missing = Vec::new();
        for dim in self.space.dimensions() {
            let values = dim.values();
            for i in 0..values.len() {
                for j in 0..values.len() {
                    if i == j {
                        continue;
                    }
                    let key = (dim.name().to_string(), values[i].clone(), values[j].clone());
                    if !self.transitions.contains_key(&key) {
                        missing.push(key);
                    }
                }
            }
        }
        missing
    }
}

struct CompositeChecker<C, D> {
    checkers: Vec<Arc<dyn StateChecker<C, D>>>,
    combination: Json,
}

impl<C, D> StateChecker<C, D> for CompositeChecker<C, D> {
    fn check(&self, client: &C, store: Option<&D>, context: &mut Context) -> bool {
        context.set_current_combination(self.combination.clone());
        self.checkers.iter().all(|c| c.check(client, store, context))
    }
}

struct WrappedTransition<C> {
    inner: Arc<dyn Action<C>>,
    from_combination: Json,
    to_combination: Json,
    changed_dimension: String,
    from_value: Json,
    to_value: Json,
}

impl<C> Action<C> for WrappedTransition<C> {
    fn run(&self, client: &C, context: &mut Context) -> Result<Box<dyn crate::context::ActionResponse>, String> {
        context.set_transition(
            self.from_combination.clone(),
            self.to_combination.clone(),
            &self.changed_dimension,
            self.from_value.clone(),
            self.to_value.clone(),
        );
        self.inner.run(client, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActionResponse;
    use crate::dimension::Dimension;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn two_dim_space() -> DimensionSpace {
        DimensionSpace::new(vec![
            Dimension::new("auth", vec!["anon".into(), "user".into()], None, None).unwrap(),
            Dimension::new("items", vec![0i64.into(), 1i64.into()], None, None).unwrap(),
        ])
        .unwrap()
    }

    fn counting_action(counter: Arc<AtomicUsize>) -> impl Action<()> {
        move |_client: &(), _ctx: &mut Context| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Box::new(()) as Box<dyn ActionResponse>)
        }
    }

    #[test]
    fn build_lifts_every_combination_into_a_node() {
        let space = two_dim_space();
        let builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        let graph = builder.build(2).unwrap();
        assert_eq!(graph.node_count(), 4);
        assert!(graph.initial().is_some());
    }

    #[test]
    fn registered_transitions_become_edges_with_reserved_context() {
        let space = two_dim_space();
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        let counter = Arc::new(AtomicUsize::new(0));
        builder
            .register_transition("auth", "anon".into(), "user".into(), counting_action(counter.clone()))
            .unwrap();

        let graph = builder.build(2).unwrap();
        assert_eq!(graph.edge_count(), 2);

        let edge = graph
            .edges_from("auth=anon&items=0")
            .into_iter()
            .next()
            .expect("anon,0 has an outgoing edge to user,0");
        let mut ctx = Context::new();
        edge.run(&(), &mut ctx).unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
        assert!(ctx.get("_from_combination").is_some());
        assert!(ctx.get("_to_combination").is_some());
        assert_eq!(ctx.get("_changed_dimension").unwrap(), &Json::from("auth"));
    }

    #[test]
    fn registered_setups_become_shared_entry_actions() {
        let space = two_dim_space();
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        let counter = Arc::new(AtomicUsize::new(0));
        builder
            .register_setup("auth", "user".into(), counting_action(counter.clone()))
            .unwrap();

        let graph = builder.build(2).unwrap();
        let user_node_ids: Vec<&str> = graph.node_ids().filter(|id| id.contains("auth=user")).collect();
        assert_eq!(user_node_ids.len(), 2);
        for id in user_node_ids {
            let node = graph.node(id).unwrap();
            assert_eq!(node.entry_actions().len(), 1);
        }
    }

    #[test]
    fn unregistered_transitions_are_skipped() {
        let space = two_dim_space();
        let builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        let graph = builder.build(2).unwrap();
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn empty_combination_list_is_a_builder_error() {
        let space = two_dim_space();
        let builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        let err = builder.build_from(vec![]).unwrap_err();
        assert!(matches!(err, BuilderError::NoValidCombinations));
    }

    #[test]
    fn register_transition_rejects_undeclared_values() {
        let space = two_dim_space();
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        let err = builder
            .register_transition("auth", "anon".into(), "superuser".into(), |_: &(), _: &mut Context| {
                Ok(Box::new(()) as Box<dyn ActionResponse>)
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::Dimension(_)));
    }

    #[test]
    fn summary_lists_missing_transitions() {
        let space = two_dim_space();
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        builder
            .register_transition("auth", "anon".into(), "user".into(), |_: &(), _: &mut Context| {
                Ok(Box::new(()) as Box<dyn ActionResponse>)
            })
            .unwrap();

        let report = builder.summary(2);
        assert!(report.contains("Registered transitions: 1"));
        assert!(report.contains("Missing transitions"));
        assert!(report.contains("auth: user -> anon"));
        assert!(report.contains("items: 0 -> 1"));
    }

    #[test]
    fn invariants_are_reattached_on_every_build() {
        let space = two_dim_space();
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("cart", space, ConstraintSet::default());
        builder.add_invariant(
            "always_true",
            "sanity check",
            Severity::Low,
            |_client: &(), _store: Option<&()>, _context: &Context| Ok(true),
        );

        let first = builder.build(2).unwrap();
        let second = builder.build(2).unwrap();
        assert_eq!(first.invariants().len(), 1);
        assert_eq!(second.invariants().len(), 1);
    }
}
