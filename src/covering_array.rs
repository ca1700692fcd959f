//! Greedy covering-array generation.
//!
//! Produces a small set of [`Combination`]s such that every feasible
//! `t`-tuple of `(dimension = value)` assignments appears in at least
//! one of them. The search is randomized but fully deterministic
//! under a fixed seed: every source of randomness flows through one
//! `StdRng`, never the thread-local generator.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::constraint::{ConstraintSet, PartialAssignment};
use crate::dimension::{Combination, DimValue, Dimension, DimensionSpace};
use crate::error::GeneratorError;

/// A canonical `t`-tuple: dimension/value pairs in ascending
/// dimension-index order, which is also the order
/// [`combinations_of_indices`] produces them in -- giving every tuple
/// a stable hash/equality without an extra sort step.
type Tuple = Vec<(String, DimValue)>;

fn tuple_to_assignment(tuple: &Tuple) -> PartialAssignment {
    tuple.iter().cloned().collect()
}

fn combination_contains_tuple(combination: &Combination, tuple: &Tuple) -> bool {
    tuple
        .iter()
        .all(|(name, value)| combination.get(name) == Some(value))
}

/// All `k`-element subsets of `0..n`, in lexicographic order -- the
/// same order `itertools.combinations` produces.
fn combinations_of_indices(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k == 0 || k > n {
        return if k == 0 { vec![vec![]] } else { vec![] };
    }
    let mut result = Vec::new();
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        result.push(current.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return result;
            }
            i -= 1;
            if current[i] != i + n - k {
                break;
            }
        }
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}

/// Cartesian product of the value lists of `dims`, each result tuple
/// paired with its dimension name, in declared order.
fn product_of_values(dims: &[&Dimension]) -> Vec<Tuple> {
    let mut results: Vec<Tuple> = vec![vec![]];
    for dim in dims {
        let mut next = Vec::with_capacity(results.len() * dim.values().len());
        for prefix in &results {
            for value in dim.values() {
                let mut t = prefix.clone();
                t.push((dim.name().to_string(), value.clone()));
                next.push(t);
            }
        }
        results = next;
    }
    results
}

/// Every raw `t`-tuple over `space`'s dimensions, in the order
/// dimension-subsets-of-size-`t` followed by each subset's declared
/// value order.
fn all_t_tuples(space: &DimensionSpace, t: usize) -> Vec<Tuple> {
    let dims = space.dimensions();
    let mut tuples = Vec::new();
    for subset in combinations_of_indices(dims.len(), t) {
        let subset_dims: Vec<&Dimension> = subset.iter().map(|&i| &dims[i]).collect();
        tuples.extend(product_of_values(&subset_dims));
    }
    tuples
}

/// Feasible `t`-tuples (those the constraint set does not reject as a
/// partial mapping) alongside the count of tuples that were excluded.
fn feasible_t_tuples(
    space: &DimensionSpace,
    constraints: &ConstraintSet,
    t: usize,
) -> (Vec<Tuple>, usize) {
    let all = all_t_tuples(space, t);
    let total = all.len();
    let feasible: Vec<Tuple> = all
        .into_iter()
        .filter(|tuple| constraints.is_valid(&tuple_to_assignment(tuple)))
        .collect();
    let excluded = total - feasible.len();
    (feasible, excluded)
}

/// For a given strength and candidate list, how many feasible tuples
/// each candidate/set covers.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageStats {
    pub strength: usize,
    pub total_feasible_tuples: usize,
    pub covered_tuples: usize,
    pub test_count: usize,
    pub excluded_by_constraints: usize,
}

impl CoverageStats {
    pub fn coverage_percentage(&self) -> f64 {
        if self.total_feasible_tuples == 0 {
            100.0
        } else {
            (self.covered_tuples as f64 / self.total_feasible_tuples as f64) * 100.0
        }
    }
}

/// Greedy, IPOG-flavoured covering-array builder.
pub struct CoveringArrayGenerator<'c> {
    space: DimensionSpace,
    constraints: &'c ConstraintSet,
    rng: StdRng,
}

impl<'c> CoveringArrayGenerator<'c> {
    pub fn new(space: DimensionSpace, constraints: &'c ConstraintSet, seed: u64) -> Self {
        Self {
            space,
            constraints,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn validate_strength(&self, strength: usize) -> Result<(), GeneratorError> {
        let max = self.space.len();
        if strength == 0 || strength > max {
            return Err(GeneratorError::StrengthOutOfRange { strength, max });
        }
        Ok(())
    }

    /// General entry point: a covering array of the requested
    /// strength.
    pub fn generate(&mut self, strength: usize) -> Result<Vec<Combination>, GeneratorError> {
        self.validate_strength(strength)?;

        if strength == self.space.len() {
            return Ok(self.constraints.filter(self.space.all_combinations().collect()));
        }

        let (feasible, _excluded) = feasible_t_tuples(&self.space, self.constraints, strength);
        let mut uncovered: Vec<Tuple> = feasible;
        let mut result = Vec::new();

        while !uncovered.is_empty() {
            let candidate = self
                .best_of_random_candidates(&uncovered)
                .or_else(|| self.systematic_search(&uncovered));

            let Some(candidate) = candidate else {
                tracing::warn!(
                    strength,
                    remaining = uncovered.len(),
                    "covering-array generation is over-constrained; returning partial coverage"
                );
                break;
            };

            uncovered.retain(|tuple| !combination_contains_tuple(&candidate, tuple));
            result.push(candidate);
        }

        Ok(result)
    }

    pub fn pairwise(&mut self) -> Result<Vec<Combination>, GeneratorError> {
        self.generate(2)
    }

    pub fn three_wise(&mut self) -> Result<Vec<Combination>, GeneratorError> {
        self.generate(3)
    }

    pub fn exhaustive(&mut self) -> Vec<Combination> {
        self.constraints.filter(self.space.all_combinations().collect())
    }

    /// Builds a full covering array, then, if it exceeds `n`, greedily
    /// keeps `n` elements maximising `t`-tuple coverage.
    pub fn sample(
        &mut self,
        n: usize,
        strength: usize,
    ) -> Result<Vec<Combination>, GeneratorError> {
        let full = self.generate(strength)?;
        if full.len() <= n {
            return Ok(full);
        }

        let (feasible, _) = feasible_t_tuples(&self.space, self.constraints, strength);
        let mut uncovered: Vec<Tuple> = feasible;
        let mut pool = full;
        let mut chosen = Vec::with_capacity(n);

        while chosen.len() < n && !pool.is_empty() {
            let (best_idx, _) = pool
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let score = uncovered
                        .iter()
                        .filter(|tuple| combination_contains_tuple(c, tuple))
                        .count();
                    (i, score)
                })
                .max_by_key(|&(_, score)| score)
                .expect("pool is non-empty");
            let picked = pool.remove(best_idx);
            uncovered.retain(|tuple| !combination_contains_tuple(&picked, tuple));
            chosen.push(picked);
        }

        Ok(chosen)
    }

    pub fn coverage_stats(
        &self,
        combinations: &[Combination],
        strength: usize,
    ) -> Result<CoverageStats, GeneratorError> {
        self.validate_strength(strength)?;
        let (feasible, excluded) = feasible_t_tuples(&self.space, self.constraints, strength);
        let covered = feasible
            .iter()
            .filter(|tuple| combinations.iter().any(|c| combination_contains_tuple(c, tuple)))
            .count();
        Ok(CoverageStats {
            strength,
            total_feasible_tuples: feasible.len(),
            covered_tuples: covered,
            test_count: combinations.len(),
            excluded_by_constraints: excluded,
        })
    }

    fn candidate_count(&self) -> usize {
        (10 * self.space.len()).max(50)
    }

    fn best_of_random_candidates(&mut self, uncovered: &[Tuple]) -> Option<Combination> {
        let mut best: Option<(Combination, usize)> = None;
        for _ in 0..self.candidate_count() {
            let seed = uncovered
                .choose(&mut self.rng)
                .expect("uncovered is non-empty while this loop runs");
            let Some(candidate) = self.build_candidate(seed) else {
                continue;
            };
            let score = uncovered
                .iter()
                .filter(|tuple| combination_contains_tuple(&candidate, tuple))
                .count();
            if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((candidate, score));
            }
        }
        best.map(|(c, _)| c)
    }

    /// Seeds a full assignment from `seed_tuple`, fills the remaining
    /// dimensions with random declared values, and accepts it iff the
    /// constraint set allows the full combination.
    fn build_candidate(&mut self, seed_tuple: &Tuple) -> Option<Combination> {
        let mut values = tuple_to_assignment(seed_tuple);
        for dim in self.space.dimensions() {
            values.entry(dim.name().to_string()).or_insert_with(|| {
                dim.values()
                    .choose(&mut self.rng)
                    .expect("dimension values is non-empty")
                    .clone()
            });
        }
        let combination = self.space.combination_from(values).ok()?;
        if self.constraints.is_valid_combination(&combination) {
            Some(combination)
        } else {
            None
        }
    }

    /// Fallback when no random candidate validated: try up to 20
    /// random uncovered tuples, each with up to 50 random
    /// completions, and return the first valid one found.
    fn systematic_search(&mut self, uncovered: &[Tuple]) -> Option<Combination> {
        let mut shuffled: Vec<&Tuple> = uncovered.iter().collect();
        shuffled.shuffle(&mut self.rng);
        for seed_tuple in shuffled.into_iter().take(20) {
            for _ in 0..50 {
                if let Some(candidate) = self.build_candidate(seed_tuple) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::exclude;
    use crate::dimension::Dimension;

    fn three_dim_space() -> DimensionSpace {
        DimensionSpace::new(vec![
            Dimension::new("auth", vec!["anon".into(), "user".into()], None, None).unwrap(),
            Dimension::new("items", vec![0i64.into(), 1i64.into()], None, None).unwrap(),
            Dimension::new("locale", vec!["en".into(), "fr".into()], None, None).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn pairwise_covers_every_feasible_pair() {
        let space = three_dim_space();
        let constraints = ConstraintSet::default();
        let mut generator = CoveringArrayGenerator::new(space.clone(), &constraints, 42);
        let combinations = generator.pairwise().unwrap();

        assert!(combinations.len() <= space.total_combinations());
        let mut checker = CoveringArrayGenerator::new(space, &constraints, 42);
        let stats = checker.coverage_stats(&combinations, 2).unwrap();
        assert_eq!(stats.covered_tuples, stats.total_feasible_tuples);
    }

    #[test]
    fn strength_equal_to_dimension_count_is_the_full_product() {
        let space = three_dim_space();
        let constraints = ConstraintSet::default();
        let mut generator = CoveringArrayGenerator::new(space.clone(), &constraints, 7);
        let combinations = generator.generate(3).unwrap();
        assert_eq!(combinations.len(), space.total_combinations());
    }

    #[test]
    fn generation_is_deterministic_under_a_fixed_seed() {
        let space = three_dim_space();
        let constraints = ConstraintSet::default();

        let mut a = CoveringArrayGenerator::new(space.clone(), &constraints, 42);
        let mut b = CoveringArrayGenerator::new(space, &constraints, 42);

        let mut combos_a = a.pairwise().unwrap();
        let mut combos_b = b.pairwise().unwrap();
        combos_a.sort();
        combos_b.sort();
        assert_eq!(combos_a, combos_b);
    }

    #[test]
    fn out_of_range_strength_is_rejected() {
        let space = three_dim_space();
        let constraints = ConstraintSet::default();
        let mut generator = CoveringArrayGenerator::new(space, &constraints, 1);
        assert!(matches!(
            generator.generate(0),
            Err(GeneratorError::StrengthOutOfRange { strength: 0, max: 3 })
        ));
        assert!(matches!(
            generator.generate(4),
            Err(GeneratorError::StrengthOutOfRange { strength: 4, max: 3 })
        ));
    }

    #[test]
    fn constraints_shrink_the_feasible_tuple_count() {
        let space = three_dim_space();
        let mut constraints = ConstraintSet::default();
        constraints.add(exclude("no_anon_one_item", [
            ("auth".to_string(), "anon".into()),
            ("items".to_string(), 1i64.into()),
        ]));

        let mut generator = CoveringArrayGenerator::new(space, &constraints, 1);
        let combinations = generator.pairwise().unwrap();
        assert!(combinations
            .iter()
            .all(|c| !(c.get("auth") == Some(&"anon".into()) && c.get("items") == Some(&1i64.into()))));
    }

    #[test]
    fn sample_never_exceeds_the_requested_count() {
        let space = three_dim_space();
        let constraints = ConstraintSet::default();
        let mut generator = CoveringArrayGenerator::new(space, &constraints, 1);
        let sampled = generator.sample(3, 2).unwrap();
        assert!(sampled.len() <= 3);
    }
}
