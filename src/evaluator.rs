// Tree-walking evaluator

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::trace;

use crate::ast::{ArithmeticOp, AstNode, ComparisonOp, UnaryOp};
use crate::bindings::{Binding, Bindings};
use crate::functions::FunctionCaller;
use crate::utils::{flatten, normalize_index, slice_indices};
use crate::value::{ExpRef, Value};

/// Default nesting limit for a single evaluation
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Evaluator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("Unknown binding: {name}")]
    UnknownBinding { name: String },

    #[error("Unknown function: {name}()")]
    UnknownFunction { name: String },

    #[error("Invalid arity for {function}(): expected {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("Invalid type for argument {position} of {function}(): expected {expected}, got {actual}")]
    ArgumentType {
        function: String,
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

/// Evaluator for compiled expressions
///
/// One evaluator serves one search: it holds the root document (for `$`) and
/// the function table, and tracks nesting depth. The current value and the
/// binding scope are passed down explicitly.
pub struct Evaluator<'a> {
    root: &'a Value,
    caller: &'a FunctionCaller,
    depth: usize,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(root: &'a Value, caller: &'a FunctionCaller) -> Self {
        Evaluator {
            root,
            caller,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The document the search started from
    pub fn root(&self) -> &Value {
        self.root
    }

    /// Evaluate `node` against `value` with `bindings` in scope.
    pub fn evaluate(
        &mut self,
        node: &AstNode,
        value: &Value,
        bindings: &Bindings,
    ) -> Result<Value, EvaluatorError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(EvaluatorError::EvaluationError(format!(
                "maximum nesting depth ({}) exceeded",
                self.max_depth
            )));
        }

        let result = self.evaluate_impl(node, value, bindings);

        self.depth -= 1;
        result
    }

    /// Evaluate an expression reference against `value`, in the scope it
    /// was created in.
    pub fn apply_expref(&mut self, expref: &ExpRef, value: &Value) -> Result<Value, EvaluatorError> {
        self.evaluate(expref.node(), value, expref.bindings())
    }

    fn evaluate_impl(
        &mut self,
        node: &AstNode,
        value: &Value,
        bindings: &Bindings,
    ) -> Result<Value, EvaluatorError> {
        match node {
            AstNode::Identity => Ok(value.clone()),

            AstNode::Root => Ok(self.root.clone()),

            AstNode::Field(name) => Ok(value.get(name).cloned().unwrap_or(Value::Absent)),

            AstNode::Index(index) => match value {
                Value::Array(items) => Ok(normalize_index(*index, items.len())
                    .map(|i| items[i].clone())
                    .unwrap_or(Value::Absent)),
                _ => Ok(Value::Absent),
            },

            AstNode::Slice { start, stop, step } => {
                let step = step.unwrap_or(1);
                if step == 0 {
                    return Err(EvaluatorError::EvaluationError(
                        "slice step cannot be 0".to_string(),
                    ));
                }
                match value {
                    Value::Array(items) => Ok(Value::from(
                        slice_indices(items.len(), *start, *stop, step)
                            .into_iter()
                            .map(|i| items[i].clone())
                            .collect::<Vec<_>>(),
                    )),
                    Value::String(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        Ok(Value::from(
                            slice_indices(chars.len(), *start, *stop, step)
                                .into_iter()
                                .map(|i| chars[i])
                                .collect::<String>(),
                        ))
                    }
                    _ => Ok(Value::Absent),
                }
            }

            AstNode::Flatten(inner) => match self.evaluate(inner, value, bindings)? {
                Value::Array(items) => Ok(Value::from(flatten(&items))),
                _ => Ok(Value::Absent),
            },

            AstNode::Projection { lhs, rhs } => match self.evaluate(lhs, value, bindings)? {
                Value::Array(items) => self.project(items.iter(), rhs, bindings),
                // A string slice yields one string; there is nothing to project over
                s @ Value::String(_) if ends_in_slice(lhs) => self.evaluate(rhs, &s, bindings),
                _ => Ok(Value::Absent),
            },

            AstNode::ValueProjection { lhs, rhs } => match self.evaluate(lhs, value, bindings)? {
                Value::Object(map) => self.project(map.values(), rhs, bindings),
                _ => Ok(Value::Absent),
            },

            AstNode::FilterProjection { lhs, predicate, rhs } => {
                let base = self.evaluate(lhs, value, bindings)?;
                let Value::Array(items) = base else {
                    return Ok(Value::Absent);
                };
                let mut kept = Vec::new();
                for item in items.iter() {
                    if self.evaluate(predicate, item, bindings)?.is_truthy() {
                        kept.push(item);
                    }
                }
                self.project(kept.into_iter(), rhs, bindings)
            }

            AstNode::Subexpression { lhs, rhs } => {
                let left = self.evaluate(lhs, value, bindings)?;
                if left.is_nullish() {
                    return Ok(left);
                }
                self.evaluate(rhs, &left, bindings)
            }

            AstNode::Pipe { lhs, rhs } => {
                let left = self.evaluate(lhs, value, bindings)?;
                self.evaluate(rhs, &left, bindings)
            }

            AstNode::MultiSelectList(elements) => {
                if value.is_nullish() {
                    return Ok(value.clone());
                }
                let mut result = Vec::with_capacity(elements.len());
                for element in elements {
                    result.push(materialize(self.evaluate(element, value, bindings)?));
                }
                Ok(Value::from(result))
            }

            AstNode::MultiSelectHash(pairs) => {
                if value.is_nullish() {
                    return Ok(value.clone());
                }
                let mut result = IndexMap::with_capacity(pairs.len());
                for (key, element) in pairs {
                    let v = materialize(self.evaluate(element, value, bindings)?);
                    result.insert(key.clone(), v);
                }
                Ok(Value::object(result))
            }

            AstNode::Comparison { op, lhs, rhs } => {
                let left = self.evaluate(lhs, value, bindings)?;
                let right = self.evaluate(rhs, value, bindings)?;
                Ok(compare(*op, &left, &right))
            }

            AstNode::Arithmetic { op, lhs, rhs } => {
                let left = self.evaluate(lhs, value, bindings)?;
                let right = self.evaluate(rhs, value, bindings)?;
                arithmetic(*op, &left, &right)
            }

            AstNode::Unary { op, operand } => {
                let operand = self.evaluate(operand, value, bindings)?;
                let Some(n) = operand.as_f64() else {
                    return Err(EvaluatorError::TypeError(format!(
                        "unary {} requires a number, got {}",
                        if *op == UnaryOp::Negate { "-" } else { "+" },
                        operand.type_name()
                    )));
                };
                Ok(Value::Number(match op {
                    UnaryOp::Negate => -n,
                    UnaryOp::Plus => n,
                }))
            }

            AstNode::And { lhs, rhs } => {
                let left = self.evaluate(lhs, value, bindings)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.evaluate(rhs, value, bindings)
            }

            AstNode::Or { lhs, rhs } => {
                let left = self.evaluate(lhs, value, bindings)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.evaluate(rhs, value, bindings)
            }

            AstNode::Not(operand) => {
                let operand = self.evaluate(operand, value, bindings)?;
                Ok(Value::Bool(!operand.is_truthy()))
            }

            AstNode::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, value, bindings)?.is_truthy() {
                    self.evaluate(then_branch, value, bindings)
                } else {
                    self.evaluate(else_branch, value, bindings)
                }
            }

            AstNode::Literal(literal) => Ok(literal.clone()),

            AstNode::RawString(s) => Ok(Value::from(s.as_str())),

            AstNode::FunctionCall { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg, value, bindings)?);
                }
                let caller = self.caller;
                caller.call(name, &values, self)
            }

            AstNode::ExpressionRef(body) => Ok(Value::expref(Arc::clone(body), bindings.clone())),

            AstNode::Let {
                bindings: declarations,
                body,
            } => {
                // Every initializer sees the enclosing scope only
                let mut entries = Vec::with_capacity(declarations.len());
                for (name, init) in declarations {
                    let bound = self.evaluate(init, value, bindings)?;
                    entries.push((name.clone(), Binding::Value(bound)));
                }
                trace!(count = entries.len(), "extending let scope");
                let scope = bindings.extend(entries);
                self.evaluate(body, value, &scope)
            }

            AstNode::Variable(name) => bindings.lookup(name),
        }
    }

    /// Apply `rhs` to each item, dropping null and absent results.
    fn project<'v>(
        &mut self,
        items: impl Iterator<Item = &'v Value>,
        rhs: &AstNode,
        bindings: &Bindings,
    ) -> Result<Value, EvaluatorError> {
        let mut result = Vec::new();
        for item in items {
            let projected = self.evaluate(rhs, item, bindings)?;
            if !projected.is_nullish() {
                result.push(projected);
            }
        }
        Ok(Value::from(result))
    }
}

/// Whether the left side of a projection is a slice, the only projection
/// source that can produce a string.
fn ends_in_slice(node: &AstNode) -> bool {
    match node {
        AstNode::Slice { .. } => true,
        AstNode::Subexpression { rhs, .. } => matches!(**rhs, AstNode::Slice { .. }),
        _ => false,
    }
}

/// Absent has no place inside a constructed array or object.
fn materialize(value: Value) -> Value {
    if value.is_absent() {
        Value::Null
    } else {
        value
    }
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Value {
    match op {
        ComparisonOp::Equal => Value::Bool(left == right),
        ComparisonOp::NotEqual => Value::Bool(left != right),
        _ => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Value::Absent;
            };
            Value::Bool(match op {
                ComparisonOp::LessThan => a < b,
                ComparisonOp::LessThanOrEqual => a <= b,
                ComparisonOp::GreaterThan => a > b,
                _ => a >= b,
            })
        }
    }
}

fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value, EvaluatorError> {
    let operand = |side: &str, v: &Value| {
        v.as_f64().ok_or_else(|| {
            EvaluatorError::TypeError(format!(
                "the {} side of the {} operator must evaluate to a number, got {}",
                side,
                op.symbol(),
                v.type_name()
            ))
        })
    };
    let a = operand("left", left)?;
    let b = operand("right", right)?;

    let divisor = |b: f64| {
        if b == 0.0 {
            Err(EvaluatorError::EvaluationError(format!(
                "division by zero in {} operator",
                op.symbol()
            )))
        } else {
            Ok(b)
        }
    };

    let n = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Subtract => a - b,
        ArithmeticOp::Multiply => a * b,
        ArithmeticOp::Divide => a / divisor(b)?,
        ArithmeticOp::Modulo => a % divisor(b)?,
        ArithmeticOp::IntegerDivide => (a / divisor(b)?).floor(),
    };
    Ok(Value::Number(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn eval(expression: &str, data: serde_json::Value) -> Result<Value, EvaluatorError> {
        let ast = parse(expression).unwrap();
        let caller = FunctionCaller::builtins();
        let root = Value::from(data);
        let mut evaluator = Evaluator::new(&root, &caller);
        evaluator.evaluate(&ast, &root, &Bindings::new())
    }

    fn eval_ok(expression: &str, data: serde_json::Value) -> Value {
        eval(expression, data).unwrap()
    }

    #[test]
    fn test_evaluate_literals() {
        assert_eq!(eval_ok("`42`", json!(null)), Value::from(42i64));
        assert_eq!(eval_ok("'hello'", json!(null)), Value::from("hello"));
        assert_eq!(eval_ok("`null`", json!(null)), Value::Null);
        assert_eq!(eval_ok("2.5", json!(null)), Value::from(2.5));
    }

    #[test]
    fn test_evaluate_path() {
        let data = json!({"foo": {"bar": {"baz": 1}}});
        assert_eq!(eval_ok("foo.bar.baz", data.clone()), Value::from(1i64));
        assert_eq!(eval_ok("foo.missing", data.clone()), Value::Absent);
        assert_eq!(eval_ok("foo.missing.deeper", data), Value::Absent);
        assert_eq!(eval_ok("foo", json!([1])), Value::Absent);
    }

    #[test]
    fn test_index_and_slice() {
        let data = json!([0, 1, 2, 3, 4]);
        assert_eq!(eval_ok("[1]", data.clone()), Value::from(1i64));
        assert_eq!(eval_ok("[-1]", data.clone()), Value::from(4i64));
        assert_eq!(eval_ok("[10]", data.clone()), Value::Absent);
        assert_eq!(eval_ok("[1:3]", data.clone()), Value::from(json!([1, 2])));
        assert_eq!(eval_ok("[::-1]", data.clone()), Value::from(json!([4, 3, 2, 1, 0])));
        assert_eq!(eval_ok("[::2]", data.clone()), Value::from(json!([0, 2, 4])));
        assert!(matches!(
            eval("[::0]", data),
            Err(EvaluatorError::EvaluationError(_))
        ));
    }

    #[test]
    fn test_string_slice() {
        let data = json!({"name": "hello"});
        assert_eq!(eval_ok("name[1:3]", data.clone()), Value::from("el"));
        assert_eq!(eval_ok("name[::-1]", data.clone()), Value::from("olleh"));
        // a wildcard over a string is not a slice
        assert_eq!(eval_ok("name[*]", data), Value::Absent);
    }

    #[test]
    fn test_slice_with_huge_step() {
        let data = json!([0, 1, 2]);
        assert_eq!(eval_ok("[1::9223372036854775807]", data.clone()), Value::from(json!([1])));
        assert_eq!(eval_ok("[::-9223372036854775807]", data.clone()), Value::from(json!([2])));
        assert_eq!(eval_ok("[::99999999999999999999]", data), Value::from(json!([0])));
        assert_eq!(
            eval_ok("name[::9223372036854775807]", json!({"name": "abc"})),
            Value::from("a")
        );
    }

    #[test]
    fn test_projections_drop_nullish() {
        let data = json!({"foo": [{"bar": 1}, {}, {"bar": null}, {"bar": 2}]});
        assert_eq!(eval_ok("foo[*].bar", data), Value::from(json!([1, 2])));

        let data = json!({"a": {"x": 1}, "b": {"x": 2}, "c": {}});
        assert_eq!(eval_ok("*.x", data), Value::from(json!([1, 2])));

        assert_eq!(eval_ok("foo[*]", json!({"foo": "str"})), Value::Absent);
        assert_eq!(eval_ok("*", json!([1])), Value::Absent);
    }

    #[test]
    fn test_flatten() {
        let data = json!([[1, 2], [3], 4]);
        assert_eq!(eval_ok("[]", data), Value::from(json!([1, 2, 3, 4])));

        let data = json!({"a": [[{"b": 1}], [{"b": 2}]]});
        assert_eq!(eval_ok("a[].b", data), Value::from(json!([1, 2])));
    }

    #[test]
    fn test_pipe_stops_projection() {
        let data = json!({"foo": [{"bar": [1, 2]}, {"bar": [3]}]});
        assert_eq!(eval_ok("foo[*].bar[0]", data.clone()), Value::from(json!([1, 3])));
        assert_eq!(eval_ok("foo[*].bar | [0]", data), Value::from(json!([1, 2])));
    }

    #[test]
    fn test_filter() {
        let data = json!({"people": [
            {"name": "a", "age": 30},
            {"name": "b", "age": 20},
            {"name": "c", "age": 40}
        ]});
        assert_eq!(
            eval_ok("people[?age > `25`].name", data.clone()),
            Value::from(json!(["a", "c"]))
        );
        assert_eq!(
            eval_ok("people[?name == 'b'] | [0].age", data),
            Value::from(20i64)
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_ok("`1` < `2`", json!(null)), Value::Bool(true));
        assert_eq!(eval_ok("'a' < 'b'", json!(null)), Value::Absent);
        assert_eq!(eval_ok("`[1, {\"a\": 2}]` == `[1, {\"a\": 2}]`", json!(null)), Value::Bool(true));
        assert_eq!(eval_ok("missing == `null`", json!({})), Value::Bool(false));
        assert_eq!(eval_ok("`0` == `false`", json!(null)), Value::Bool(false));
    }

    #[test]
    fn test_logical_operators_return_operands() {
        let data = json!({"a": 0, "b": "", "c": "yes"});
        assert_eq!(eval_ok("a || c", data.clone()), Value::from(0i64));
        assert_eq!(eval_ok("b || c", data.clone()), Value::from("yes"));
        assert_eq!(eval_ok("b && c", data.clone()), Value::from(""));
        assert_eq!(eval_ok("!b", data.clone()), Value::Bool(true));
        // the right side is never evaluated
        assert_eq!(eval_ok("c || nope(@)", data), Value::from("yes"));
    }

    #[test]
    fn test_multi_select() {
        let data = json!({"a": 1, "b": 2});
        assert_eq!(eval_ok("[a, b, c]", data.clone()), Value::from(json!([1, 2, null])));
        assert_eq!(eval_ok("{x: a, y: b}", data), Value::from(json!({"x": 1, "y": 2})));
        assert_eq!(eval_ok("missing.[a, b]", json!({})), Value::Absent);
    }

    #[test]
    fn test_arithmetic() {
        let data = json!({"a": 7, "b": 2});
        assert_eq!(eval_ok("a + b", data.clone()), Value::from(9i64));
        assert_eq!(eval_ok("a - b * 2", data.clone()), Value::from(3i64));
        assert_eq!(eval_ok("a / b", data.clone()), Value::from(3.5));
        assert_eq!(eval_ok("a % b", data.clone()), Value::from(1i64));
        assert_eq!(eval_ok("a // b", data.clone()), Value::from(3i64));
        assert_eq!(eval_ok("-a", data.clone()), Value::from(-7i64));
        assert!(matches!(eval("a / `0`", data.clone()), Err(EvaluatorError::EvaluationError(_))));
        assert!(matches!(eval("a + 'x'", data), Err(EvaluatorError::TypeError(_))));
    }

    #[test]
    fn test_ternary_and_root() {
        let data = json!({"flag": true, "items": [1, 2], "limit": 1});
        assert_eq!(eval_ok("flag ? 'on' : 'off'", data.clone()), Value::from("on"));
        assert_eq!(eval_ok("items[?@ > $.limit]", data), Value::from(json!([2])));
    }

    #[test]
    fn test_let_is_parallel_and_scoped() {
        let data = json!({"a": 1, "b": 2});
        assert_eq!(eval_ok("let $x = a in $x", data.clone()), Value::from(1i64));
        assert_eq!(
            eval_ok("let $x = a in let $x = b in $x", data.clone()),
            Value::from(2i64)
        );
        // siblings cannot see each other
        assert_eq!(
            eval("let $x = a, $y = $x in $y", data.clone()),
            Err(EvaluatorError::UnknownBinding {
                name: "$x".to_string()
            })
        );
        assert!(matches!(
            eval("$nope", data),
            Err(EvaluatorError::UnknownBinding { .. })
        ));
    }

    #[test]
    fn test_expref_captures_scope() {
        let data = json!({"items": [{"v": 1}, {"v": 2}]});
        assert_eq!(
            eval_ok("let $k = 'v' in map(&@.v, items)", data.clone()),
            Value::from(json!([1, 2]))
        );
        assert_eq!(
            eval_ok("let $n = `10` in map(&sum([v, $n]), items)", data),
            Value::from(json!([11, 12]))
        );
    }

    #[test]
    fn test_functions_with_exprefs() {
        let data = json!({"people": [
            {"name": "a", "age": 30},
            {"name": "b", "age": 20},
            {"name": "c", "age": 40}
        ]});
        assert_eq!(
            eval_ok("sort_by(people, &age)[*].name", data.clone()),
            Value::from(json!(["b", "a", "c"]))
        );
        assert_eq!(eval_ok("max_by(people, &age).name", data.clone()), Value::from("c"));
        assert_eq!(eval_ok("min_by(people, &age).name", data.clone()), Value::from("b"));
        assert_eq!(
            eval_ok("group_by(people, &age > `25` && 'old' || 'young')", data.clone()),
            Value::from(json!({
                "old": [{"name": "a", "age": 30}, {"name": "c", "age": 40}],
                "young": [{"name": "b", "age": 20}]
            }))
        );
        assert!(matches!(
            eval("sort_by(people, &name == 'a')", data),
            Err(EvaluatorError::TypeError(_))
        ));
    }

    #[test]
    fn test_function_reads_search_root() {
        use crate::functions::FunctionEntry;
        use crate::signature::Signature;

        let document = FunctionEntry::new(
            "document",
            Signature::new(vec![]),
            |_: &[Value], evaluator: &mut Evaluator<'_>| Ok(evaluator.root().clone()),
        );
        let caller = FunctionCaller::with_builtins([document]);
        let ast = parse("items[?@ > document().total] | [0]").unwrap();
        let root = Value::from(json!({"items": [1, 5, 7], "total": 3}));
        let mut evaluator = Evaluator::new(&root, &caller);
        assert_eq!(
            evaluator.evaluate(&ast, &root, &Bindings::new()).unwrap(),
            Value::from(5i64)
        );
    }

    #[test]
    fn test_max_depth() {
        let ast = parse("a.b.c.d").unwrap();
        let caller = FunctionCaller::builtins();
        let root = Value::from(json!({"a": {"b": {"c": {"d": 1}}}}));
        let mut evaluator = Evaluator::new(&root, &caller).with_max_depth(2);
        assert!(matches!(
            evaluator.evaluate(&ast, &root, &Bindings::new()),
            Err(EvaluatorError::EvaluationError(_))
        ));
    }
}
