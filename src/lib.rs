// jmespath-core - JMESPath query engine
// Copyright (c) 2025 jmespath-core contributors
// Licensed under the MIT License

//! # jmespath-core
//!
//! A JMESPath (community edition) query engine. Compile an expression once,
//! then search any number of documents with it, from any number of threads.
//!
//! ```
//! use jmespath_core::{JmesPath, Value};
//! use serde_json::json;
//!
//! let expr = JmesPath::compile("people[?age > `30`].name").unwrap();
//! let data = Value::from(json!({"people": [{"name": "a", "age": 42}, {"name": "b", "age": 7}]}));
//! assert_eq!(expr.search(&data).unwrap(), Value::from(json!(["a"])));
//! ```
//!
//! ## Architecture
//!
//! - `lexer` - Source text to tokens
//! - `parser` - Pratt parser, tokens to AST
//! - `ast` - Abstract Syntax Tree definitions
//! - `evaluator` - Tree-walking evaluator
//! - `bindings` - Scope chain for `$name` lookups
//! - `functions` - Function registry and built-ins
//! - `signature` - Function signature validation
//! - `value` - The runtime value type

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub mod ast;
pub mod bindings;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod signature;
pub mod value;
mod utils;

pub use ast::AstNode;
pub use bindings::{Binding, Bindings};
pub use evaluator::{Evaluator, EvaluatorError, DEFAULT_MAX_DEPTH};
pub use functions::{FunctionCaller, FunctionEntry, FunctionHandler};
pub use lexer::LexError;
pub use parser::{ParserError, MAX_PARSE_DEPTH};
pub use signature::{ParamType, Parameter, Signature};
pub use value::{ExpRef, Value};

/// Errors from the one-shot helpers
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParserError),

    #[error("Evaluation error: {0}")]
    Evaluate(#[from] EvaluatorError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A compiled expression
///
/// Holds the parsed AST and the function table it was compiled with. Both are
/// immutable, so a `JmesPath` can be shared across threads and searched
/// concurrently; every search builds its own evaluator and scope.
#[derive(Clone)]
pub struct JmesPath {
    expression: String,
    ast: Arc<AstNode>,
    caller: Arc<FunctionCaller>,
    max_depth: usize,
}

impl JmesPath {
    /// Compile `expression` with the built-in functions.
    pub fn compile(expression: &str) -> Result<Self, ParserError> {
        Self::compile_with_functions(expression, Vec::new())
    }

    /// Compile `expression` with the built-ins plus `functions`. An entry
    /// named like a built-in replaces it.
    pub fn compile_with_functions(
        expression: &str,
        functions: impl IntoIterator<Item = FunctionEntry>,
    ) -> Result<Self, ParserError> {
        let ast = parser::parse(expression).map_err(|e| {
            debug!(expression, error = %e, "failed to compile expression");
            e
        })?;
        let caller = FunctionCaller::with_builtins(functions);
        debug!(expression, functions = caller.len(), "compiled expression");
        Ok(JmesPath {
            expression: expression.to_string(),
            ast: Arc::new(ast),
            caller: Arc::new(caller),
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    /// Like [`JmesPath::compile`], but panics if the expression is invalid.
    /// Meant for expressions fixed at build time.
    pub fn must_compile(expression: &str) -> Self {
        match Self::compile(expression) {
            Ok(compiled) => compiled,
            Err(e) => panic!("jmespath: compile({expression:?}): {e}"),
        }
    }

    /// Limit how deeply evaluation may nest.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn search(&self, data: &Value) -> Result<Value, EvaluatorError> {
        self.search_with_bindings(data, &Bindings::new())
    }

    /// Search with parameters; key `x` is visible as `$x`.
    pub fn search_with_params(
        &self,
        data: &Value,
        params: &HashMap<String, Value>,
    ) -> Result<Value, EvaluatorError> {
        let bindings = Bindings::from_params(params.iter().map(|(k, v)| (k, v.clone())));
        self.search_with_bindings(data, &bindings)
    }

    /// Search with a prepared scope, e.g. one holding delegate bindings.
    pub fn search_with_bindings(
        &self,
        data: &Value,
        bindings: &Bindings,
    ) -> Result<Value, EvaluatorError> {
        let mut evaluator = Evaluator::new(data, &self.caller).with_max_depth(self.max_depth);
        evaluator.evaluate(&self.ast, data, bindings).map_err(|e| {
            debug!(expression = %self.expression, error = %e, "search failed");
            e
        })
    }

    /// Search a JSON document given as text and render the result as JSON.
    pub fn search_json(&self, json: &str) -> Result<String, Error> {
        let data = Value::from_json_str(json)?;
        let result = self.search(&data)?;
        Ok(result.to_json_string()?)
    }

    pub fn ast(&self) -> &AstNode {
        &self.ast
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }
}

impl fmt::Debug for JmesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JmesPath")
            .field("expression", &self.expression)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for JmesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Compile `expression` with the built-ins plus `functions`.
pub fn compile(
    expression: &str,
    functions: impl IntoIterator<Item = FunctionEntry>,
) -> Result<JmesPath, ParserError> {
    JmesPath::compile_with_functions(expression, functions)
}

/// Compile and search in one step.
pub fn search(expression: &str, data: &Value) -> Result<Value, Error> {
    Ok(JmesPath::compile(expression)?.search(data)?)
}

/// Compile and search in one step, with parameters exposed as `$name`.
pub fn search_with_params(
    expression: &str,
    data: &Value,
    params: &HashMap<String, Value>,
) -> Result<Value, Error> {
    Ok(JmesPath::compile(expression)?.search_with_params(data, params)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_compiled_expression_is_shareable() {
        assert_send_sync::<JmesPath>();
        assert_send_sync::<Value>();
    }

    #[test]
    fn test_search_json() {
        let expr = JmesPath::compile("a.b").unwrap();
        assert_eq!(expr.search_json(r#"{"a": {"b": [1, 2]}}"#).unwrap(), "[1,2]");
        assert_eq!(expr.search_json("{}").unwrap(), "null");
        assert!(matches!(expr.search_json("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_one_shot_helpers() {
        let data = Value::from(json!({"a": 1}));
        assert_eq!(search("a", &data).unwrap(), Value::from(1i64));
        assert!(matches!(search("a.", &data), Err(Error::Parse(_))));
        assert!(matches!(search("nope(a)", &data), Err(Error::Evaluate(_))));
    }

    #[test]
    #[should_panic(expected = "jmespath: compile")]
    fn test_must_compile_panics() {
        JmesPath::must_compile("[");
    }

    #[test]
    fn test_accessors() {
        let expr = JmesPath::must_compile("foo");
        assert_eq!(expr.as_str(), "foo");
        assert_eq!(expr.to_string(), "foo");
        assert_eq!(expr.ast(), &AstNode::field("foo"));
    }
}
