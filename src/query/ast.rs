use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::core::types::{Document, FieldValue, ValueKind};

/// The closed set of typed comparison operations. Each declares the operand
/// class it expects; leaf construction validates the operand against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    IntEquals,
    IntLessThan,
    IntLessOrEqual,
    IntGreaterThan,
    IntGreaterOrEqual,
    IntStartsWith,
    IntEndsWith,
    IntContains,
    StringEquals,
    StringLessThan,
    StringLessOrEqual,
    StringGreaterThan,
    StringGreaterOrEqual,
    StringStartsWith,
    StringEndsWith,
    StringContains,
    VectorSimilar,
}

impl Operation {
    pub fn operand_kind(&self) -> ValueKind {
        match self {
            Operation::IntEquals
            | Operation::IntLessThan
            | Operation::IntLessOrEqual
            | Operation::IntGreaterThan
            | Operation::IntGreaterOrEqual
            | Operation::IntStartsWith
            | Operation::IntEndsWith
            | Operation::IntContains => ValueKind::Integer,
            Operation::VectorSimilar => ValueKind::Vector,
            _ => ValueKind::Text,
        }
    }
}

/// One predicate over a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafNode {
    pub field: String,
    pub operation: Operation,
    pub value: FieldValue,
}

impl LeafNode {
    pub fn new(field: impl Into<String>, operation: Operation, value: FieldValue) -> Result<Self> {
        if value.kind() != operation.operand_kind() {
            return Err(Error::invalid_input(format!(
                "operation {:?} expects a {} operand, got {}",
                operation,
                operation.operand_kind().type_name(),
                value.kind().type_name()
            )));
        }
        Ok(LeafNode {
            field: field.into(),
            operation,
            value,
        })
    }

    /// Evaluate against a concrete field value. VectorSimilar is truthy; it
    /// ranks rather than filters.
    pub fn matches_value(&self, value: &FieldValue) -> bool {
        match (self.operation, value, &self.value) {
            (Operation::IntEquals, FieldValue::Integer(v), FieldValue::Integer(op)) => v == op,
            (Operation::IntLessThan, FieldValue::Integer(v), FieldValue::Integer(op)) => v < op,
            (Operation::IntLessOrEqual, FieldValue::Integer(v), FieldValue::Integer(op)) => v <= op,
            (Operation::IntGreaterThan, FieldValue::Integer(v), FieldValue::Integer(op)) => v > op,
            (Operation::IntGreaterOrEqual, FieldValue::Integer(v), FieldValue::Integer(op)) => {
                v >= op
            }
            (Operation::IntStartsWith, FieldValue::Integer(v), FieldValue::Integer(op)) => {
                v.to_string().starts_with(&op.to_string())
            }
            (Operation::IntEndsWith, FieldValue::Integer(v), FieldValue::Integer(op)) => {
                v.to_string().ends_with(&op.to_string())
            }
            (Operation::IntContains, FieldValue::Integer(v), FieldValue::Integer(op)) => {
                v.to_string().contains(&op.to_string())
            }
            (Operation::StringEquals, FieldValue::Text(v), FieldValue::Text(op)) => v == op,
            (Operation::StringLessThan, FieldValue::Text(v), FieldValue::Text(op)) => v < op,
            (Operation::StringLessOrEqual, FieldValue::Text(v), FieldValue::Text(op)) => v <= op,
            (Operation::StringGreaterThan, FieldValue::Text(v), FieldValue::Text(op)) => v > op,
            (Operation::StringGreaterOrEqual, FieldValue::Text(v), FieldValue::Text(op)) => v >= op,
            (Operation::StringStartsWith, FieldValue::Text(v), FieldValue::Text(op)) => {
                v.starts_with(op.as_str())
            }
            (Operation::StringEndsWith, FieldValue::Text(v), FieldValue::Text(op)) => {
                v.ends_with(op.as_str())
            }
            (Operation::StringContains, FieldValue::Text(v), FieldValue::Text(op)) => {
                v.contains(op.as_str())
            }
            (Operation::VectorSimilar, FieldValue::Vector(_), FieldValue::Vector(_)) => true,
            _ => false,
        }
    }
}

/// Logical query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalNode {
    And(Box<LogicalNode>, Box<LogicalNode>),
    Or(Box<LogicalNode>, Box<LogicalNode>),
    Not(Box<LogicalNode>),
    Leaf(LeafNode),
    MatchAll,
    MatchNone,
}

impl LogicalNode {
    pub fn and(left: LogicalNode, right: LogicalNode) -> LogicalNode {
        LogicalNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: LogicalNode, right: LogicalNode) -> LogicalNode {
        LogicalNode::Or(Box::new(left), Box::new(right))
    }

    pub fn not(child: LogicalNode) -> LogicalNode {
        LogicalNode::Not(Box::new(child))
    }

    /// Conjunction of two or more operands.
    pub fn all_of(operands: Vec<LogicalNode>) -> Result<LogicalNode> {
        Self::combine(operands, Self::and)
    }

    /// Disjunction of two or more operands.
    pub fn any_of(operands: Vec<LogicalNode>) -> Result<LogicalNode> {
        Self::combine(operands, Self::or)
    }

    fn combine(
        operands: Vec<LogicalNode>,
        join: fn(LogicalNode, LogicalNode) -> LogicalNode,
    ) -> Result<LogicalNode> {
        if operands.len() < 2 {
            return Err(Error::invalid_input(
                "a multi-operand query needs at least two operands",
            ));
        }
        let mut iter = operands.into_iter();
        let first = iter.next().unwrap_or(LogicalNode::MatchNone);
        Ok(iter.fold(first, join))
    }

    pub fn leaf(field: impl Into<String>, operation: Operation, value: FieldValue) -> Result<Self> {
        Ok(LogicalNode::Leaf(LeafNode::new(field, operation, value)?))
    }

    pub fn is_equal(field: impl Into<String>, value: &str) -> Result<Self> {
        Self::leaf(
            field,
            Operation::StringEquals,
            FieldValue::Text(value.to_string()),
        )
    }

    pub fn is_int_equal(field: impl Into<String>, value: i32) -> Result<Self> {
        Self::leaf(field, Operation::IntEquals, FieldValue::Integer(value))
    }

    pub fn is_greater_than(field: impl Into<String>, value: i32) -> Result<Self> {
        Self::leaf(field, Operation::IntGreaterThan, FieldValue::Integer(value))
    }

    pub fn is_less_than(field: impl Into<String>, value: i32) -> Result<Self> {
        Self::leaf(field, Operation::IntLessThan, FieldValue::Integer(value))
    }

    pub fn is_similar_to(field: impl Into<String>, query: Vec<f32>) -> Result<Self> {
        Self::leaf(field, Operation::VectorSimilar, FieldValue::Vector(query))
    }

    /// Direct evaluation against an in-memory document; the oracle the
    /// split/compile pipeline must agree with.
    pub fn evaluate(&self, document: &Document) -> bool {
        match self {
            LogicalNode::And(left, right) => {
                left.evaluate(document) && right.evaluate(document)
            }
            LogicalNode::Or(left, right) => left.evaluate(document) || right.evaluate(document),
            LogicalNode::Not(child) => !child.evaluate(document),
            LogicalNode::Leaf(leaf) => document
                .get_field(&leaf.field)
                .map(|value| leaf.matches_value(value))
                .unwrap_or(false),
            LogicalNode::MatchAll => true,
            LogicalNode::MatchNone => false,
        }
    }
}
