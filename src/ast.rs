// Abstract Syntax Tree definitions

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// AST node types
///
/// The closed set of expression forms. Nodes own their children and are never
/// mutated after the parser builds them; the evaluator matches on this enum
/// exhaustively.
///
/// Projections (`Projection`, `ValueProjection`, `FilterProjection`) carry a
/// left side producing the collection and a right side applied to each
/// element. `foo[*].bar` is `Projection { lhs: Field(foo), rhs: Field(bar) }`,
/// and `foo[]` is `Projection { lhs: Flatten(Field(foo)), rhs: Identity }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// The current value (`@`). Also the implicit right side of a projection
    /// with nothing after it.
    Identity,

    /// The root document (`$`).
    Root,

    /// Named child lookup (`foo`, `"foo bar"`).
    Field(String),

    /// Array element access (`[0]`, `[-1]`).
    Index(i64),

    /// Array or string slice (`[start:stop:step]`).
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },

    /// Merge one level of nested arrays (`[]`).
    Flatten(Box<AstNode>),

    /// Apply `rhs` to every element of the array produced by `lhs` (`[*]`, slices,
    /// and flatten).
    Projection { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// Apply `rhs` to every value of the object produced by `lhs` (`*`).
    ValueProjection { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// Keep the elements of `lhs` for which `predicate` is truthy, then apply
    /// `rhs` to each of them (`[?predicate]`).
    FilterProjection {
        lhs: Box<AstNode>,
        predicate: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// Dot-chain: evaluate `rhs` against the result of `lhs`.
    Subexpression { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// `lhs | rhs`: like a subexpression, but ends any projection on the left.
    Pipe { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// `[a, b]`
    MultiSelectList(Vec<AstNode>),

    /// `{key: a, other: b}`
    MultiSelectHash(Vec<(String, AstNode)>),

    Comparison {
        op: ComparisonOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    Unary { op: UnaryOp, operand: Box<AstNode> },

    And { lhs: Box<AstNode>, rhs: Box<AstNode> },

    Or { lhs: Box<AstNode>, rhs: Box<AstNode> },

    Not(Box<AstNode>),

    /// `condition ? then_branch : else_branch`
    Ternary {
        condition: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Box<AstNode>,
    },

    /// Embedded JSON (`` `{"a": 1}` ``) or a bare number.
    Literal(Value),

    /// `'raw string'`
    RawString(String),

    FunctionCall { name: String, args: Vec<AstNode> },

    /// `&expr`. The body sits behind an `Arc` so the values created from it
    /// share the tree instead of copying it.
    ExpressionRef(Arc<AstNode>),

    /// `let $a = x, $b = y in body`. Binding names keep their `$` sigil.
    Let {
        bindings: Vec<(String, AstNode)>,
        body: Box<AstNode>,
    },

    /// `$name`, sigil included.
    Variable(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    /// `//`, floored division
    IntegerDivide,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `+x`
    Plus,
}

impl AstNode {
    /// Create a field lookup node
    pub fn field(name: impl Into<String>) -> Self {
        AstNode::Field(name.into())
    }

    /// Create a literal node
    pub fn literal(value: impl Into<Value>) -> Self {
        AstNode::Literal(value.into())
    }

    /// Create a binding reference node; the sigil is added if missing
    pub fn variable(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.starts_with('$') {
            AstNode::Variable(name)
        } else {
            AstNode::Variable(format!("${name}"))
        }
    }

    pub fn subexpression(lhs: AstNode, rhs: AstNode) -> Self {
        AstNode::Subexpression {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn projection(lhs: AstNode, rhs: AstNode) -> Self {
        AstNode::Projection {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "==",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        }
    }
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulo => "%",
            ArithmeticOp::IntegerDivide => "//",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ast_node_creation() {
        assert_eq!(AstNode::field("foo"), AstNode::Field("foo".to_string()));
        assert_eq!(AstNode::variable("x"), AstNode::Variable("$x".to_string()));
        assert_eq!(AstNode::variable("$x"), AstNode::Variable("$x".to_string()));
        assert!(matches!(AstNode::literal(1i64), AstNode::Literal(Value::Number(_))));
    }
}
