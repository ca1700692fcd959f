//! Predicates and helpers for filtering invalid combinations.
//!
//! A [`Constraint`] wraps a predicate over a partial mapping of
//! dimension name to value. Constraints are only ever asked whether a
//! combination is valid; they never mutate anything and never see
//! state beyond the mapping they're handed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::dimension::{Combination, DimValue};

/// A partial mapping from dimension name to value, the common
/// argument shape both `Combination` and the covering-array
/// generator's partial tuples can present to a constraint.
pub type PartialAssignment = HashMap<String, DimValue>;

/// A predicate returning `true` when a combination is valid
/// (allowed).
pub type ConstraintPredicate = dyn Fn(&PartialAssignment) -> bool + Send + Sync;

/// A named rule that filters out invalid combinations.
///
/// When `dimensions` is set, the constraint is only evaluated once
/// every listed dimension is present in the assignment being
/// checked; otherwise it is vacuously valid ("not yet applicable").
/// A predicate that panics is treated as rejecting the combination,
/// with a warning logged -- mirroring the reference implementation's
/// treatment of an exception raised inside a constraint predicate.
pub struct Constraint {
    name: String,
    predicate: Box<ConstraintPredicate>,
    description: String,
    dimensions: Option<Vec<String>>,
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraint").field("name", &self.name).finish()
    }
}

impl Constraint {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&PartialAssignment) -> bool + Send + Sync + 'static,
        description: impl Into<String>,
        dimensions: Option<Vec<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            description: description.into(),
            dimensions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn dimensions(&self) -> Option<&[String]> {
        self.dimensions.as_deref()
    }

    fn applicable(&self, values: &PartialAssignment) -> bool {
        match &self.dimensions {
            Some(dims) => dims.iter().all(|d| values.contains_key(d)),
            None => true,
        }
    }

    /// Checks whether `values` satisfies this constraint. Not
    /// applicable (scoped dimensions absent) counts as valid.
    pub fn is_valid(&self, values: &PartialAssignment) -> bool {
        if !self.applicable(values) {
            return true;
        }
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(values))) {
            Ok(valid) => valid,
            Err(_) => {
                tracing::warn!(
                    constraint = %self.name,
                    "constraint predicate panicked; treating combination as invalid"
                );
                false
            }
        }
    }

    pub fn is_valid_combination(&self, combination: &Combination) -> bool {
        self.is_valid(combination.values())
    }
}

/// An ordered collection of constraints, all of which must pass for a
/// combination to be considered valid.
#[derive(Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn add(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn is_valid(&self, values: &PartialAssignment) -> bool {
        self.constraints.iter().all(|c| c.is_valid(values))
    }

    pub fn is_valid_combination(&self, combination: &Combination) -> bool {
        self.is_valid(combination.values())
    }

    /// Constraints violated by `values`, in declaration order.
    pub fn violated_by(&self, values: &PartialAssignment) -> Vec<&Constraint> {
        self.constraints.iter().filter(|c| !c.is_valid(values)).collect()
    }

    /// Keeps only the valid combinations, preserving input order.
    pub fn filter(&self, combinations: Vec<Combination>) -> Vec<Combination> {
        combinations
            .into_iter()
            .filter(|c| self.is_valid_combination(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{Dimension, DimensionSpace};

    fn values(pairs: &[(&str, DimValue)]) -> PartialAssignment {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn exclude_rejects_only_the_exact_combination() {
        let c = exclude("no_admin_delete", [
            ("role".to_string(), "admin".into()),
            ("action".to_string(), "delete".into()),
        ]);
        assert!(!c.is_valid(&values(&[("role", "admin".into()), ("action", "delete".into())])));
        assert!(c.is_valid(&values(&[("role", "admin".into()), ("action", "view".into())])));
        assert!(c.is_valid(&values(&[("role", "user".into()), ("action", "delete".into())])));
    }

    #[test]
    fn exclude_is_vacuously_valid_when_not_applicable() {
        let c = exclude("no_admin_delete", [
            ("role".to_string(), "admin".into()),
            ("action".to_string(), "delete".into()),
        ]);
        assert!(c.is_valid(&values(&[("role", "admin".into())])));
    }

    #[test]
    fn require_enforces_implication() {
        let c = require(
            "published_needs_author",
            [("status".to_string(), "published".into())],
            [("has_author".to_string(), true.into())],
        );
        assert!(c.is_valid(&values(&[("status", "draft".into()), ("has_author", false.into())])));
        assert!(c.is_valid(&values(&[("status", "published".into()), ("has_author", true.into())])));
        assert!(!c.is_valid(&values(&[("status", "published".into()), ("has_author", false.into())])));
    }

    #[test]
    fn at_most_one_allows_zero_or_one_match() {
        let c = at_most_one(
            "single_terminal_state",
            vec![
                values(&[("state", "archived".into())]),
                values(&[("state", "deleted".into())]),
            ],
        );
        assert!(c.is_valid(&values(&[("state", "active".into())])));
        assert!(c.is_valid(&values(&[("state", "archived".into())])));
    }

    #[test]
    fn panicking_predicate_is_treated_as_invalid() {
        let c = Constraint::new("boom", |_: &PartialAssignment| panic!("boom"), "always panics", None);
        assert!(!c.is_valid(&values(&[("x", 1i64.into())])));
    }

    #[test]
    fn constraint_set_filters_combinations() {
        let space = DimensionSpace::new(vec![
            Dimension::new("role", vec!["admin".into(), "user".into()], None, None).unwrap(),
            Dimension::new("action", vec!["view".into(), "delete".into()], None, None).unwrap(),
        ])
        .unwrap();
        let mut set = ConstraintSet::default();
        set.add(exclude("no_user_delete", [
            ("role".to_string(), "user".into()),
            ("action".to_string(), "delete".into()),
        ]));

        let all: Vec<_> = space.all_combinations().collect();
        assert_eq!(all.len(), 4);
        let filtered = set.filter(all);
        assert_eq!(filtered.len(), 3);
        assert!(filtered
            .iter()
            .all(|c| !(c.get("role") == Some(&"user".into()) && c.get("action") == Some(&"delete".into()))));
    }
}

fn values_of(pairs: impl IntoIterator<Item = (String, DimValue)>) -> PartialAssignment {
    pairs.into_iter().collect()
}

/// Rejects any combination in which every listed dimension equals its
/// listed value.
pub fn exclude(
    name: impl Into<String>,
    values: impl IntoIterator<Item = (String, DimValue)>,
) -> Constraint {
    let excluded = values_of(values);
    let dims: Vec<String> = excluded.keys().cloned().collect();
    let description = format!("Exclude combination: {excluded:?}");
    Constraint::new(
        name,
        move |d: &PartialAssignment| !excluded.iter().all(|(k, v)| d.get(k) == Some(v)),
        description,
        Some(dims),
    )
}

/// Encodes "if every dimension in `if_values` matches, every
/// dimension in `then_values` must also match".
pub fn require(
    name: impl Into<String>,
    if_values: impl IntoIterator<Item = (String, DimValue)>,
    then_values: impl IntoIterator<Item = (String, DimValue)>,
) -> Constraint {
    let if_values = values_of(if_values);
    let then_values = values_of(then_values);
    let dims: Vec<String> = if_values
        .keys()
        .chain(then_values.keys())
        .cloned()
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    let description = format!("If {if_values:?} then {then_values:?}");
    Constraint::new(
        name,
        move |d: &PartialAssignment| {
            let antecedent = if_values.iter().all(|(k, v)| d.get(k) == Some(v));
            if !antecedent {
                return true;
            }
            then_values.iter().all(|(k, v)| d.get(k) == Some(v))
        },
        description,
        Some(dims),
    )
}

/// Enforces that at most one of `conditions` matches.
pub fn at_most_one(
    name: impl Into<String>,
    conditions: Vec<PartialAssignment>,
) -> Constraint {
    let dims: Vec<String> = conditions
        .iter()
        .flat_map(|c| c.keys().cloned())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    let description = format!("At most one of {conditions:?}");
    let conditions_for_predicate = conditions.clone();
    Constraint::new(
        name,
        move |d: &PartialAssignment| {
            conditions_for_predicate
                .iter()
                .filter(|cond| cond.iter().all(|(k, v)| d.get(k) == Some(v)))
                .count()
                <= 1
        },
        description,
        Some(dims),
    )
}
