//! Query predicates
//!
//! A [`Predicate`] is a bag of field conditions. Each condition is either a
//! plain equality value or a set of operators:
//!
//! ```text
//! { "status": "active", "age": { "$gte": 18, "$lt": 65 } }
//! ```
//!
//! The coordinators treat predicates as opaque and only rely on
//! [`Predicate::canonical`], which renders a deterministic string so two
//! semantically identical predicates always share one cache entry. The
//! reference tiers evaluate predicates with [`Predicate::matches`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PredicateError;
use crate::snapshot::DocData;

/// Comparison operator inside a field condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
}

impl Operator {
    /// Selector spelling of this operator (`$eq`, `$gt`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Exists => "$exists",
        }
    }

    /// Parse the selector spelling of an operator
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$exists" => Operator::Exists,
            _ => return None,
        };
        Some(op)
    }

    fn validate(&self, field: &str, operand: &Value) -> Result<(), PredicateError> {
        let reason = match self {
            Operator::In | Operator::Nin if !operand.is_array() => "expected an array",
            Operator::Exists if !operand.is_boolean() => "expected a boolean",
            _ => return Ok(()),
        };
        Err(PredicateError::InvalidOperand {
            field: field.to_string(),
            operator: self.as_str().to_string(),
            reason: reason.to_string(),
        })
    }

    fn holds(&self, actual: Option<&Value>, operand: &Value) -> bool {
        match self {
            Operator::Eq => actual == Some(operand),
            Operator::Ne => actual != Some(operand),
            Operator::Gt => compare(actual, operand) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare(actual, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(actual, operand) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare(actual, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => match (actual, operand.as_array()) {
                (Some(value), Some(candidates)) => candidates.contains(value),
                _ => false,
            },
            Operator::Nin => match (actual, operand.as_array()) {
                (Some(value), Some(candidates)) => !candidates.contains(value),
                (None, Some(_)) => true,
                _ => false,
            },
            Operator::Exists => operand.as_bool() == Some(actual.is_some()),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition on a single field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field must equal this value
    Equals(Value),
    /// Every operator must hold for the field
    Operators(BTreeMap<Operator, Value>),
}

impl Condition {
    fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            Condition::Equals(expected) => actual == Some(expected),
            Condition::Operators(ops) => ops.iter().all(|(op, operand)| op.holds(actual, operand)),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Condition::Equals(value) => canonical_value(value),
            Condition::Operators(ops) => {
                let mut map = Map::new();
                for (op, operand) in ops {
                    map.insert(op.as_str().to_string(), canonical_value(operand));
                }
                Value::Object(map)
            }
        }
    }
}

/// A bag of field conditions evaluated against document data
///
/// An empty predicate matches every document in a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Predicate {
    conditions: BTreeMap<String, Condition>,
}

impl Predicate {
    /// A predicate without conditions, matching every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a predicate from a JSON selector object
    pub fn from_value(value: Value) -> Result<Self, PredicateError> {
        let Value::Object(fields) = value else {
            return Err(PredicateError::NotAnObject(value.to_string()));
        };

        let mut conditions = BTreeMap::new();
        for (field, condition) in fields {
            let condition = match condition {
                Value::Object(ref ops)
                    if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) =>
                {
                    let mut parsed = BTreeMap::new();
                    for (name, operand) in ops {
                        let op = Operator::parse(name)
                            .ok_or_else(|| PredicateError::UnknownOperator(name.clone()))?;
                        op.validate(&field, operand)?;
                        parsed.insert(op, operand.clone());
                    }
                    Condition::Operators(parsed)
                }
                other => Condition::Equals(other),
            };
            conditions.insert(field, condition);
        }

        Ok(Self { conditions })
    }

    /// Require `field` to equal `value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .insert(field.into(), Condition::Equals(value.into()));
        self
    }

    /// Add an operator condition on `field`
    ///
    /// Operators on the same field accumulate; an existing equality
    /// condition on the field is folded in as `$eq`.
    pub fn with_operator(
        mut self,
        field: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Result<Self, PredicateError> {
        let field = field.into();
        let value = value.into();
        op.validate(&field, &value)?;

        let entry = self
            .conditions
            .entry(field)
            .or_insert_with(|| Condition::Operators(BTreeMap::new()));
        if let Condition::Equals(existing) = entry {
            let mut ops = BTreeMap::new();
            ops.insert(Operator::Eq, existing.clone());
            *entry = Condition::Operators(ops);
        }
        if let Condition::Operators(ops) = entry {
            ops.insert(op, value);
        }
        Ok(self)
    }

    /// Require `field` to be greater than `value`
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.comparison(field, Operator::Gt, value)
    }

    /// Require `field` to be greater than or equal to `value`
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.comparison(field, Operator::Gte, value)
    }

    /// Require `field` to be less than `value`
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.comparison(field, Operator::Lt, value)
    }

    /// Require `field` to be less than or equal to `value`
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.comparison(field, Operator::Lte, value)
    }

    /// Require `field` to differ from `value`
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.comparison(field, Operator::Ne, value)
    }

    /// Require `field` to be one of `values`
    pub fn one_of<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.comparison(field, Operator::In, Value::Array(values))
    }

    // Operators whose operand is never rejected by `validate`.
    fn comparison(self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.clone().with_operator(field, op, value) {
            Ok(predicate) => predicate,
            Err(_) => self,
        }
    }

    /// Whether this predicate has no conditions
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Condition for a field, if any
    pub fn condition(&self, field: &str) -> Option<&Condition> {
        self.conditions.get(field)
    }

    /// Evaluate this predicate against document data
    ///
    /// Field names may use dotted paths (`address.city`) to reach into
    /// nested objects.
    pub fn matches(&self, data: &DocData) -> bool {
        self.conditions
            .iter()
            .all(|(field, condition)| condition.matches(lookup(data, field)))
    }

    /// JSON selector form with every object key in sorted order
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (field, condition) in &self.conditions {
            map.insert(field.clone(), condition.to_value());
        }
        Value::Object(map)
    }

    /// Deterministic string form used for canonical keys
    pub fn canonical(&self) -> String {
        self.to_value().to_string()
    }
}

impl TryFrom<Value> for Predicate {
    type Error = PredicateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<Predicate> for Value {
    fn from(predicate: Predicate) -> Self {
        predicate.to_value()
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn lookup<'a>(data: &'a DocData, path: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn compare(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (actual?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Rebuild a value with object keys sorted at every depth
fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical_value(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}
