//! Typed value domains and their Cartesian-product combinations.
//!
//! A [`DimensionSpace`] is an ordered collection of [`Dimension`]s.
//! [`Combination`] is an immutable assignment of one value to every
//! dimension in a space, with a derived id stable across runs and
//! independent of anything but the declared dimension order and the
//! assigned values.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::DimensionError;

/// A single value a dimension can take.
///
/// Closed to three primitive kinds so that a value is simultaneously
/// hashable, orderable (for deterministic tuple enumeration) and
/// serializable (for context injection and node-id derivation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for DimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimValue::Bool(b) => write!(f, "{b}"),
            DimValue::Int(i) => write!(f, "{i}"),
            DimValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&DimValue> for Json {
    fn from(value: &DimValue) -> Self {
        match value {
            DimValue::Bool(b) => Json::Bool(*b),
            DimValue::Int(i) => Json::Number((*i).into()),
            DimValue::Str(s) => Json::String(s.clone()),
        }
    }
}

impl From<&str> for DimValue {
    fn from(value: &str) -> Self {
        DimValue::Str(value.to_string())
    }
}

impl From<String> for DimValue {
    fn from(value: String) -> Self {
        DimValue::Str(value)
    }
}

impl From<i64> for DimValue {
    fn from(value: i64) -> Self {
        DimValue::Int(value)
    }
}

impl From<bool> for DimValue {
    fn from(value: bool) -> Self {
        DimValue::Bool(value)
    }
}

/// A named, non-empty, ordered, duplicate-free sequence of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    name: String,
    values: Vec<DimValue>,
    default: DimValue,
    description: Option<String>,
}

impl Dimension {
    /// Builds a dimension. Fails if `values` is empty or contains a
    /// duplicate. If `default` is `None`, the first declared value
    /// becomes the default.
    pub fn new(
        name: impl Into<String>,
        values: Vec<DimValue>,
        description: Option<String>,
        default: Option<DimValue>,
    ) -> Result<Self, DimensionError> {
        let name = name.into();
        if values.is_empty() {
            return Err(DimensionError::EmptyValues { name });
        }
        for (i, v) in values.iter().enumerate() {
            if values[..i].contains(v) {
                return Err(DimensionError::DuplicateValue {
                    name,
                    value: v.to_string(),
                });
            }
        }
        let default = match default {
            Some(d) => {
                if !values.contains(&d) {
                    return Err(DimensionError::DefaultNotDeclared {
                        name,
                        default: d.to_string(),
                    });
                }
                d
            }
            None => values[0].clone(),
        };
        Ok(Self {
            name,
            values,
            default,
            description,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[DimValue] {
        &self.values
    }

    pub fn default(&self) -> &DimValue {
        &self.default
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// An ordered collection of dimensions with unique names.
#[derive(Debug, Clone)]
pub struct DimensionSpace {
    dimensions: Arc<Vec<Dimension>>,
    index: Arc<HashMap<String, usize>>,
}

impl DimensionSpace {
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self, DimensionError> {
        let mut index = HashMap::with_capacity(dimensions.len());
        for (i, dim) in dimensions.iter().enumerate() {
            if index.insert(dim.name().to_string(), i).is_some() {
                return Err(DimensionError::DuplicateDimensionName {
                    name: dim.name().to_string(),
                });
            }
        }
        Ok(Self {
            dimensions: Arc::new(dimensions),
            index: Arc::new(index),
        })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.index.get(name).map(|&i| &self.dimensions[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(Dimension::name)
    }

    /// Product of every dimension's value count.
    pub fn total_combinations(&self) -> usize {
        self.dimensions.iter().map(|d| d.values().len()).product()
    }

    pub fn default_combination(&self) -> Combination {
        let values = self
            .dimensions
            .iter()
            .map(|d| (d.name().to_string(), d.default().clone()))
            .collect();
        Combination::new(values, self.dimensions.clone())
    }

    /// Lazy Cartesian product in dimension-declaration order.
    pub fn all_combinations(&self) -> CombinationIter {
        CombinationIter::new(self.dimensions.clone())
    }

    pub fn combination_from(
        &self,
        values: HashMap<String, DimValue>,
    ) -> Result<Combination, DimensionError> {
        for dim in self.dimensions.iter() {
            let v = values
                .get(dim.name())
                .ok_or_else(|| DimensionError::MissingDimension {
                    name: dim.name().to_string(),
                })?;
            if !dim.values().contains(v) {
                return Err(DimensionError::ValueNotDeclared {
                    dimension: dim.name().to_string(),
                    value: v.to_string(),
                });
            }
        }
        Ok(Combination::new(values, self.dimensions.clone()))
    }
}

/// Lazy Cartesian-product iterator over a dimension list, in
/// declaration order (odometer-style: the last dimension varies
/// fastest).
pub struct CombinationIter {
    dimensions: Arc<Vec<Dimension>>,
    indices: Vec<usize>,
    done: bool,
}

impl CombinationIter {
    fn new(dimensions: Arc<Vec<Dimension>>) -> Self {
        let done = dimensions.iter().any(|d| d.values().is_empty());
        let indices = vec![0; dimensions.len()];
        Self {
            dimensions,
            indices,
            done,
        }
    }
}

impl Iterator for CombinationIter {
    type Item = Combination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let values = self
            .dimensions
            .iter()
            .zip(self.indices.iter())
            .map(|(d, &i)| (d.name().to_string(), d.values()[i].clone()))
            .collect();
        let combination = Combination::new(values, self.dimensions.clone());

        // Advance the odometer, least-significant (last) dimension first.
        let mut carry = true;
        for (dim, idx) in self.dimensions.iter().zip(self.indices.iter_mut()).rev() {
            if !carry {
                break;
            }
            *idx += 1;
            if *idx >= dim.values().len() {
                *idx = 0;
            } else {
                carry = false;
            }
        }
        if carry {
            self.done = true;
        }
        Some(combination)
    }
}

/// Sentinel describing how two combinations relate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    /// The combinations differ in exactly one dimension.
    Single(String),
    /// They are identical, or differ in more than one dimension.
    NoSingleDifference,
}

/// An immutable assignment of one value to every dimension in a
/// space.
#[derive(Debug, Clone)]
pub struct Combination {
    values: HashMap<String, DimValue>,
    order: Arc<Vec<Dimension>>,
}

impl Combination {
    fn new(values: HashMap<String, DimValue>, order: Arc<Vec<Dimension>>) -> Self {
        Self { values, order }
    }

    pub fn get(&self, dimension: &str) -> Option<&DimValue> {
        self.values.get(dimension)
    }

    pub fn values(&self) -> &HashMap<String, DimValue> {
        &self.values
    }

    fn ordered_pairs(&self) -> impl Iterator<Item = (&str, &DimValue)> {
        self.order
            .iter()
            .filter_map(|d| self.values.get(d.name()).map(|v| (d.name(), v)))
    }

    /// Stable identifier derived from dimension values in
    /// declaration order. Equal combinations always derive equal
    /// ids; unequal combinations never collide because every
    /// dimension contributes its name alongside its value.
    pub fn node_id(&self) -> String {
        self.ordered_pairs()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Human-readable `dimension=value` listing in declaration order.
    pub fn description(&self) -> String {
        self.ordered_pairs()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns the single differing dimension name if `self` and
    /// `other` differ in exactly one dimension, `NoSingleDifference`
    /// otherwise (including when they are equal). Runs in
    /// `O(dimensions)`.
    pub fn differs_by_one(&self, other: &Combination) -> Difference {
        let mut differing = None;
        for dim in self.order.iter() {
            let name = dim.name();
            if self.values.get(name) != other.values.get(name) {
                if differing.is_some() {
                    return Difference::NoSingleDifference;
                }
                differing = Some(name.to_string());
            }
        }
        match differing {
            Some(name) => Difference::Single(name),
            None => Difference::NoSingleDifference,
        }
    }

    /// Serializes the combination as a JSON object, suitable for
    /// injection into a [`crate::context::Context`] under a reserved
    /// key.
    pub fn to_json(&self) -> Json {
        let map = self
            .ordered_pairs()
            .map(|(name, value)| (name.to_string(), Json::from(value)))
            .collect();
        Json::Object(map)
    }

    /// Number of dimension-value pairs this combination shares with
    /// `other`. Used by the combinatorial builder to pick the closest
    /// match to a requested initial combination.
    pub fn matches(&self, other: &Combination) -> usize {
        self.values
            .iter()
            .filter(|(k, v)| other.values.get(k.as_str()) == Some(*v))
            .count()
    }
}

impl PartialEq for Combination {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Combination {}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl PartialOrd for Combination {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Combination {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node_id().cmp(&other.node_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_dim_space() -> DimensionSpace {
        DimensionSpace::new(vec![
            Dimension::new("auth", vec!["anon".into(), "user".into()], None, None).unwrap(),
            Dimension::new("items", vec![0i64.into(), 1i64.into()], None, None).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn dimension_rejects_empty_values() {
        let err = Dimension::new("auth", vec![], None, None).unwrap_err();
        assert_eq!(err, DimensionError::EmptyValues { name: "auth".to_string() });
    }

    #[test]
    fn dimension_rejects_duplicate_values() {
        let err = Dimension::new("auth", vec!["user".into(), "user".into()], None, None).unwrap_err();
        assert!(matches!(err, DimensionError::DuplicateValue { .. }));
    }

    #[test]
    fn dimension_default_falls_back_to_first_value() {
        let dim = Dimension::new("auth", vec!["anon".into(), "user".into()], None, None).unwrap();
        assert_eq!(dim.default(), &DimValue::from("anon"));
    }

    #[test]
    fn space_rejects_duplicate_dimension_names() {
        let err = DimensionSpace::new(vec![
            Dimension::new("auth", vec!["anon".into()], None, None).unwrap(),
            Dimension::new("auth", vec!["user".into()], None, None).unwrap(),
        ])
        .unwrap_err();
        assert!(matches!(err, DimensionError::DuplicateDimensionName { .. }));
    }

    #[test]
    fn all_combinations_is_a_full_cartesian_product() {
        let space = two_dim_space();
        let combos: Vec<Combination> = space.all_combinations().collect();
        assert_eq!(combos.len(), 4);
        assert_eq!(space.total_combinations(), 4);

        let mut ids: Vec<String> = combos.iter().map(Combination::node_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4, "every combination must have a unique id");
    }

    #[test]
    fn node_id_is_stable_and_order_independent_of_insertion() {
        let space = two_dim_space();
        let a = space
            .combination_from(HashMap::from([
                ("auth".to_string(), "user".into()),
                ("items".to_string(), 1i64.into()),
            ]))
            .unwrap();
        let b = space
            .combination_from(HashMap::from([
                ("items".to_string(), 1i64.into()),
                ("auth".to_string(), "user".into()),
            ]))
            .unwrap();
        assert_eq!(a.node_id(), b.node_id());
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_one_detects_single_dimension_change() {
        let space = two_dim_space();
        let a = space.default_combination();
        let b = space
            .combination_from(HashMap::from([
                ("auth".to_string(), "user".into()),
                ("items".to_string(), 0i64.into()),
            ]))
            .unwrap();
        assert_eq!(a.differs_by_one(&b), Difference::Single("auth".to_string()));
    }

    #[test]
    fn differs_by_one_rejects_multi_dimension_change() {
        let space = two_dim_space();
        let a = space.default_combination();
        let b = space
            .combination_from(HashMap::from([
                ("auth".to_string(), "user".into()),
                ("items".to_string(), 1i64.into()),
            ]))
            .unwrap();
        assert_eq!(a.differs_by_one(&b), Difference::NoSingleDifference);
    }

    #[test]
    fn differs_by_one_rejects_equal_combinations() {
        let space = two_dim_space();
        let a = space.default_combination();
        let b = space.default_combination();
        assert_eq!(a.differs_by_one(&b), Difference::NoSingleDifference);
    }

    #[test]
    fn combination_from_rejects_undeclared_value() {
        let space = two_dim_space();
        let err = space
            .combination_from(HashMap::from([
                ("auth".to_string(), "superuser".into()),
                ("items".to_string(), 0i64.into()),
            ]))
            .unwrap_err();
        assert!(matches!(err, DimensionError::ValueNotDeclared { .. }));
    }

    #[test]
    fn combination_from_rejects_missing_dimension() {
        let space = two_dim_space();
        let err = space
            .combination_from(HashMap::from([("auth".to_string(), "user".into())]))
            .unwrap_err();
        assert!(matches!(err, DimensionError::MissingDimension { .. }));
    }

    #[test]
    fn to_json_round_trips_values_by_name() {
        let space = two_dim_space();
        let combo = space.default_combination();
        let json = combo.to_json();
        assert_eq!(json["auth"], serde_json::json!("anon"));
        assert_eq!(json["items"], serde_json::json!(0));
    }
}
