//! References to values that are not known until execution.
//!
//! A `Reference` is what a node attribute, port condition or workflow output
//! is bound to. Resolving a reference against a `State` is pure: it reads
//! the state (and its parent chain) and never mutates it.
//!
//! Reference kinds:
//! - `Constant`: a literal value
//! - `Input`: a workflow input
//! - `StateField`: a declared state field
//! - `NodeOutput`: an output of another node
//! - `ExternalInput`: a value supplied from outside to resume a paused node
//! - `Lazy`: a forward reference to a node output by node name
//! - `Expression`: an operator applied to other references

use crate::error::ResolveError;
use crate::node::{NodeId, json_kind_name};
use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// A lazily resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reference {
    /// A literal value.
    Constant(JsonValue),
    /// A workflow input by name.
    Input(String),
    /// A state field by name.
    StateField(String),
    /// An output of a node.
    NodeOutput { node: NodeId, output: String },
    /// An external input declared by a node.
    ExternalInput { node: NodeId, name: String },
    /// A forward reference to a node output, bound by node name.
    Lazy { node_name: String, output: String },
    /// An operator applied to other references.
    Expression(Box<Expression>),
}

/// Operators over references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", content = "operands", rename_all = "snake_case")]
pub enum Expression {
    Equals(Reference, Reference),
    NotEquals(Reference, Reference),
    GreaterThan(Reference, Reference),
    GreaterOrEqual(Reference, Reference),
    LessThan(Reference, Reference),
    LessOrEqual(Reference, Reference),
    /// Substring, array membership or object key presence.
    Contains(Reference, Reference),
    And(Reference, Reference),
    Or(Reference, Reference),
    Not(Reference),
    IsNull(Reference),
    IsNotNull(Reference),
    /// The left value unless it is unresolved or null, else the right value.
    Coalesce(Reference, Reference),
    /// Object key or array index lookup; missing entries yield null.
    Access(Reference, Reference),
    Length(Reference),
}

impl From<JsonValue> for Reference {
    fn from(value: JsonValue) -> Self {
        Self::Constant(value)
    }
}

impl Reference {
    /// References a workflow input.
    #[must_use]
    pub fn input(name: impl Into<String>) -> Self {
        Self::Input(name.into())
    }

    /// References a state field.
    #[must_use]
    pub fn state(name: impl Into<String>) -> Self {
        Self::StateField(name.into())
    }

    /// References a node output.
    #[must_use]
    pub fn node_output(node: NodeId, output: impl Into<String>) -> Self {
        Self::NodeOutput {
            node,
            output: output.into(),
        }
    }

    /// References the output of a node that may not be defined yet.
    #[must_use]
    pub fn lazy(node_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Lazy {
            node_name: node_name.into(),
            output: output.into(),
        }
    }

    fn binary(self, other: impl Into<Reference>, op: fn(Reference, Reference) -> Expression) -> Self {
        Self::Expression(Box::new(op(self, other.into())))
    }

    #[must_use]
    pub fn equals(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::Equals)
    }

    #[must_use]
    pub fn not_equals(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::NotEquals)
    }

    #[must_use]
    pub fn greater_than(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::GreaterThan)
    }

    #[must_use]
    pub fn greater_or_equal(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::GreaterOrEqual)
    }

    #[must_use]
    pub fn less_than(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::LessThan)
    }

    #[must_use]
    pub fn less_or_equal(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::LessOrEqual)
    }

    #[must_use]
    pub fn contains(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::Contains)
    }

    #[must_use]
    pub fn and(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::And)
    }

    #[must_use]
    pub fn or(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::Or)
    }

    #[must_use]
    pub fn coalesce(self, other: impl Into<Reference>) -> Self {
        self.binary(other, Expression::Coalesce)
    }

    /// Looks up an object key or array index.
    #[must_use]
    pub fn access(self, key: impl Into<Reference>) -> Self {
        self.binary(key, Expression::Access)
    }

    /// Logical negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Expression(Box::new(Expression::Not(self)))
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        Self::Expression(Box::new(Expression::IsNull(self)))
    }

    #[must_use]
    pub fn is_not_null(self) -> Self {
        Self::Expression(Box::new(Expression::IsNotNull(self)))
    }

    #[must_use]
    pub fn length(self) -> Self {
        Self::Expression(Box::new(Expression::Length(self)))
    }

    /// Resolves the reference against a state.
    ///
    /// # Errors
    ///
    /// Returns an `Unresolved*` error when a referenced value is not present
    /// yet, or `InvalidOperand` when an operator cannot be applied.
    pub fn resolve(&self, state: &State) -> Result<JsonValue, ResolveError> {
        match self {
            Self::Constant(value) => Ok(value.clone()),
            Self::Input(name) => state.workflow_input(name).cloned().ok_or_else(|| {
                ResolveError::UnresolvedInput { name: name.clone() }
            }),
            Self::StateField(name) => state.field(name).cloned().ok_or_else(|| {
                ResolveError::UnresolvedStateField { name: name.clone() }
            }),
            Self::NodeOutput { node, output } => resolve_node_output(state, *node, output),
            Self::Lazy { node_name, output } => {
                resolve_node_output(state, NodeId::from_name(node_name), output)
            }
            Self::ExternalInput { node, name } => {
                state.external_input(*node, name).cloned().ok_or_else(|| {
                    ResolveError::UnresolvedExternalInput {
                        node_id: *node,
                        name: name.clone(),
                    }
                })
            }
            Self::Expression(expression) => expression.evaluate(state),
        }
    }

    /// Collects the leaf references of this reference, in order.
    pub(crate) fn leaves<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Expression(expression) => {
                for operand in expression.operands() {
                    operand.leaves(out);
                }
            }
            leaf => out.push(leaf),
        }
    }
}

fn resolve_node_output(
    state: &State,
    node: NodeId,
    output: &str,
) -> Result<JsonValue, ResolveError> {
    state
        .node_output(node, output)
        .cloned()
        .ok_or_else(|| ResolveError::UnresolvedNodeOutput {
            node_id: node,
            output: output.to_string(),
        })
}

/// Truthiness used by port conditions and boolean operators.
#[must_use]
pub fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) if left.is_number() && right.is_number() => l == r,
        _ => left == right,
    }
}

fn compare(
    operator: &'static str,
    left: &JsonValue,
    right: &JsonValue,
) -> Result<Ordering, ResolveError> {
    let ordering = match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r)),
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.cmp(r)),
        _ => None,
    };
    ordering.ok_or_else(|| ResolveError::InvalidOperand {
        operator,
        reason: format!(
            "cannot order {} against {}",
            json_kind_name(left),
            json_kind_name(right)
        ),
    })
}

impl Expression {
    fn operands(&self) -> Vec<&Reference> {
        match self {
            Self::Equals(l, r)
            | Self::NotEquals(l, r)
            | Self::GreaterThan(l, r)
            | Self::GreaterOrEqual(l, r)
            | Self::LessThan(l, r)
            | Self::LessOrEqual(l, r)
            | Self::Contains(l, r)
            | Self::And(l, r)
            | Self::Or(l, r)
            | Self::Coalesce(l, r)
            | Self::Access(l, r) => vec![l, r],
            Self::Not(v) | Self::IsNull(v) | Self::IsNotNull(v) | Self::Length(v) => vec![v],
        }
    }

    fn evaluate(&self, state: &State) -> Result<JsonValue, ResolveError> {
        let value = match self {
            Self::Equals(l, r) => {
                JsonValue::Bool(values_equal(&l.resolve(state)?, &r.resolve(state)?))
            }
            Self::NotEquals(l, r) => {
                JsonValue::Bool(!values_equal(&l.resolve(state)?, &r.resolve(state)?))
            }
            Self::GreaterThan(l, r) => JsonValue::Bool(
                compare("greater_than", &l.resolve(state)?, &r.resolve(state)?)?.is_gt(),
            ),
            Self::GreaterOrEqual(l, r) => JsonValue::Bool(
                compare("greater_or_equal", &l.resolve(state)?, &r.resolve(state)?)?.is_ge(),
            ),
            Self::LessThan(l, r) => JsonValue::Bool(
                compare("less_than", &l.resolve(state)?, &r.resolve(state)?)?.is_lt(),
            ),
            Self::LessOrEqual(l, r) => JsonValue::Bool(
                compare("less_or_equal", &l.resolve(state)?, &r.resolve(state)?)?.is_le(),
            ),
            Self::Contains(l, r) => {
                let haystack = l.resolve(state)?;
                let needle = r.resolve(state)?;
                let found = match (&haystack, &needle) {
                    (JsonValue::String(h), JsonValue::String(n)) => h.contains(n.as_str()),
                    (JsonValue::Array(items), _) => {
                        items.iter().any(|item| values_equal(item, &needle))
                    }
                    (JsonValue::Object(map), JsonValue::String(key)) => map.contains_key(key),
                    _ => {
                        return Err(ResolveError::InvalidOperand {
                            operator: "contains",
                            reason: format!(
                                "cannot search {} in {}",
                                json_kind_name(&needle),
                                json_kind_name(&haystack)
                            ),
                        });
                    }
                };
                JsonValue::Bool(found)
            }
            Self::And(l, r) => {
                JsonValue::Bool(truthy(&l.resolve(state)?) && truthy(&r.resolve(state)?))
            }
            Self::Or(l, r) => {
                JsonValue::Bool(truthy(&l.resolve(state)?) || truthy(&r.resolve(state)?))
            }
            Self::Not(v) => JsonValue::Bool(!truthy(&v.resolve(state)?)),
            Self::IsNull(v) => JsonValue::Bool(v.resolve(state)?.is_null()),
            Self::IsNotNull(v) => JsonValue::Bool(!v.resolve(state)?.is_null()),
            Self::Coalesce(l, r) => match l.resolve(state) {
                Ok(value) if !value.is_null() => value,
                Ok(_) => r.resolve(state)?,
                Err(err) if err.is_unresolved() => r.resolve(state)?,
                Err(err) => return Err(err),
            },
            Self::Access(l, r) => {
                let container = l.resolve(state)?;
                let key = r.resolve(state)?;
                match (&container, &key) {
                    (JsonValue::Object(map), JsonValue::String(key)) => {
                        map.get(key).cloned().unwrap_or(JsonValue::Null)
                    }
                    (JsonValue::Array(items), JsonValue::Number(index)) => index
                        .as_u64()
                        .and_then(|i| usize::try_from(i).ok())
                        .and_then(|i| items.get(i))
                        .cloned()
                        .unwrap_or(JsonValue::Null),
                    _ => {
                        return Err(ResolveError::InvalidOperand {
                            operator: "access",
                            reason: format!(
                                "cannot index {} with {}",
                                json_kind_name(&container),
                                json_kind_name(&key)
                            ),
                        });
                    }
                }
            }
            Self::Length(v) => {
                let value = v.resolve(state)?;
                let len = match &value {
                    JsonValue::String(s) => s.chars().count(),
                    JsonValue::Array(items) => items.len(),
                    JsonValue::Object(map) => map.len(),
                    other => {
                        return Err(ResolveError::InvalidOperand {
                            operator: "length",
                            reason: format!("{} has no length", json_kind_name(other)),
                        });
                    }
                };
                JsonValue::from(len)
            }
        };
        Ok(value)
    }
}
