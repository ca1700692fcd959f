//! Author-facing error types.
//!
//! Every error here is raised at configuration time: building a
//! dimension space, wiring up a state graph, or assembling a
//! combinatorial spec. Runtime failures from actions, checkers, and
//! invariants are never represented as `Err` values returned from the
//! engine -- they are captured as data on `EdgeResult` / `PathResult`
//! / `InvariantViolation` instead. See the crate's design notes on
//! error propagation for the rationale.

use thiserror::Error;

/// Errors raised while constructing dimensions, dimension spaces, or
/// combinations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DimensionError {
    #[error("dimension {name:?} has no declared values")]
    EmptyValues { name: String },

    #[error("dimension {name:?} declares duplicate value {value:?}")]
    DuplicateValue { name: String, value: String },

    #[error("dimension {name:?} default {default:?} is not among its declared values")]
    DefaultNotDeclared { name: String, default: String },

    #[error("dimension space declares duplicate dimension name {name:?}")]
    DuplicateDimensionName { name: String },

    #[error("unknown dimension {name:?}")]
    UnknownDimension { name: String },

    #[error("value {value:?} is not declared on dimension {dimension:?}")]
    ValueNotDeclared { dimension: String, value: String },

    #[error("combination is missing a value for dimension {name:?}")]
    MissingDimension { name: String },
}

/// Errors raised while mutating a [`crate::state_graph::StateGraph`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {id:?} already exists in this graph")]
    DuplicateNode { id: String },

    #[error("edge {name:?} already exists in this graph")]
    DuplicateEdge { name: String },

    #[error("invariant {name:?} already exists in this graph")]
    DuplicateInvariant { name: String },

    #[error("edge {edge:?} references unknown node {node:?}")]
    UnknownNode { edge: String, node: String },

    #[error("initial node {id:?} does not exist in this graph")]
    UnknownInitialNode { id: String },

    #[error("graph has no initial node set; call set_initial before exploring")]
    Uninitialized,
}

/// Errors raised by the covering-array generator for malformed input.
///
/// Over-constrained inputs that merely fail to reach full coverage are
/// *not* represented here -- they are a warning plus an honestly
/// short [`crate::covering_array::CoverageStats`], not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("strength {strength} is out of range; must be between 1 and {max} (the dimension count)")]
    StrengthOutOfRange { strength: usize, max: usize },

    #[error(transparent)]
    Dimension(#[from] DimensionError),
}

/// Errors raised while assembling a [`crate::combinatorial_builder::CombinatorialGraphBuilder`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("no valid combinations were produced; the dimension space and constraints are over-constrained")]
    NoValidCombinations,

    #[error("requested initial combination does not satisfy the registered constraints")]
    InvalidInitialCombination,

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Dimension(#[from] DimensionError),
}
