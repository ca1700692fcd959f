//! State-graph exploration and combinatorial test generation for
//! stateful black-box API testing.
//!
//! This crate provides:
//! - **Dimensions & combinations**: typed value domains and their
//!   constrained Cartesian-product combinations.
//! - **Covering-array generation**: a greedy generator that produces a
//!   small, seeded-deterministic set of combinations covering every
//!   feasible `t`-tuple of dimension values.
//! - **State graphs**: a typed graph of application states and the
//!   actions that move between them, with invariants checked at every
//!   visited node.
//! - **Exploration**: depth-first traversal of a state graph with
//!   streaming results and `O(depth)` path reconstruction.
//! - **Combinatorial lifting**: projecting a dimension space straight
//!   into a state graph, so combinatorial test generation and
//!   state-graph exploration share one model.
//! - **Live execution**: orchestrating graph exploration and
//!   per-combination replay against a live system under test.
//!
//! # Example
//!
//! ```rust,ignore
//! use stategraph_core::{
//!     CombinatorialGraphBuilder, ConstraintSet, Dimension, DimensionSpace,
//! };
//!
//! let space = DimensionSpace::new(vec![
//!     Dimension::new("auth", vec!["anon".into(), "user".into()], None, None)?,
//!     Dimension::new("items", vec![0i64.into(), 1i64.into()], None, None)?,
//! ])?;
//! let builder = CombinatorialGraphBuilder::<(), ()>::new("cart", space, ConstraintSet::default());
//! let (graph, combinations) = builder.build_journey_graph(2)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod combinatorial_builder;
pub mod constraint;
pub mod context;
pub mod covering_array;
pub mod dimension;
pub mod error;
pub mod executor;
pub mod exploration;
pub mod state_graph;

pub use combinatorial_builder::CombinatorialGraphBuilder;
pub use constraint::{exclude, require, at_most_one, Constraint, ConstraintSet, PartialAssignment};
pub use context::{ActionResponse, Context, RESERVED_KEYS};
pub use covering_array::{CoverageStats, CoveringArrayGenerator};
pub use dimension::{Combination, CombinationIter, DimValue, Difference, Dimension, DimensionSpace};
pub use error::{BuilderError, DimensionError, GeneratorError, GraphError};
pub use executor::{CombinatorialExecutor, ExecutionResult, StepResult};
pub use exploration::{
    explore, explore_iter, EdgeResult, Exploration, ExplorationNode, ExplorationResult,
    InvariantViolation, PathResult,
};
pub use state_graph::{
    Action, Edge, Invariant, InvariantCheck, ResetState, Severity, StateChecker, StateGraph,
    StateNode,
};
