// Function registry and built-in function implementations

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::trace;

use crate::evaluator::{Evaluator, EvaluatorError};
use crate::signature::{ParamType, Parameter, Signature};
use crate::value::{ExpRef, Value};

/// A function body. It receives arguments that already passed signature
/// validation, plus the running evaluator for applying expression references.
pub type FunctionHandler =
    Arc<dyn Fn(&[Value], &mut Evaluator<'_>) -> Result<Value, EvaluatorError> + Send + Sync>;

type Builtin = fn(&[Value], &mut Evaluator<'_>) -> Result<Value, EvaluatorError>;

/// A named function with its signature
#[derive(Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub signature: Signature,
    pub handler: FunctionHandler,
}

impl FunctionEntry {
    pub fn new<F>(name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: Fn(&[Value], &mut Evaluator<'_>) -> Result<Value, EvaluatorError> + Send + Sync + 'static,
    {
        FunctionEntry {
            name: name.into(),
            signature,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Name to function table used by one compiled expression
#[derive(Clone, Debug, Default)]
pub struct FunctionCaller {
    entries: HashMap<String, FunctionEntry>,
}

impl FunctionCaller {
    /// Build a table from `entries`; on a name collision the later entry wins.
    pub fn new(entries: impl IntoIterator<Item = FunctionEntry>) -> Self {
        let mut table = HashMap::new();
        for entry in entries {
            table.insert(entry.name.clone(), entry);
        }
        FunctionCaller { entries: table }
    }

    /// The built-in functions only
    pub fn builtins() -> Self {
        FunctionCaller::new(builtin_entries().iter().cloned())
    }

    /// Built-ins followed by `extra`, which override built-ins of the same name.
    pub fn with_builtins(extra: impl IntoIterator<Item = FunctionEntry>) -> Self {
        FunctionCaller::new(builtin_entries().iter().cloned().chain(extra))
    }

    pub fn resolve(&self, name: &str) -> Result<&FunctionEntry, EvaluatorError> {
        self.entries
            .get(name)
            .ok_or_else(|| EvaluatorError::UnknownFunction {
                name: name.to_string(),
            })
    }

    /// Validate `args` against the signature of `name`, then invoke it.
    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        evaluator: &mut Evaluator<'_>,
    ) -> Result<Value, EvaluatorError> {
        let entry = self.resolve(name)?;
        entry.signature.validate(name, args)?;
        trace!(function = name, args = args.len(), "calling function");
        (entry.handler)(args, evaluator)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn builtin(name: &str, params: Vec<Parameter>, handler: Builtin) -> FunctionEntry {
    FunctionEntry::new(name, Signature::new(params), handler)
}

fn req(types: &[ParamType]) -> Parameter {
    Parameter::required(types)
}

fn opt(types: &[ParamType]) -> Parameter {
    Parameter::optional(types)
}

/// Built-in table, built once per process and shared by every compile.
fn builtin_entries() -> &'static [FunctionEntry] {
    static BUILTINS: OnceLock<Vec<FunctionEntry>> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        use ParamType::*;
        let sortable = [ArrayNumber, ArrayString];
        vec![
            builtin("abs", vec![req(&[Number])], numeric::abs),
            builtin("avg", vec![req(&[ArrayNumber])], numeric::avg),
            builtin("ceil", vec![req(&[Number])], numeric::ceil),
            builtin("floor", vec![req(&[Number])], numeric::floor),
            builtin("sum", vec![req(&[ArrayNumber])], numeric::sum),
            builtin("max", vec![req(&sortable)], numeric::max),
            builtin("min", vec![req(&sortable)], numeric::min),
            builtin("max_by", vec![req(&[Array]), req(&[Expref])], numeric::max_by),
            builtin("min_by", vec![req(&[Array]), req(&[Expref])], numeric::min_by),
            builtin("to_number", vec![req(&[Any])], numeric::to_number),
            builtin("contains", vec![req(&[Array, String]), req(&[Any])], string::contains),
            builtin("ends_with", vec![req(&[String]), req(&[String])], string::ends_with),
            builtin("starts_with", vec![req(&[String]), req(&[String])], string::starts_with),
            builtin(
                "find_first",
                vec![req(&[String]), req(&[String]), opt(&[Number]), opt(&[Number])],
                string::find_first,
            ),
            builtin(
                "find_last",
                vec![req(&[String]), req(&[String]), opt(&[Number]), opt(&[Number])],
                string::find_last,
            ),
            builtin("join", vec![req(&[String]), req(&[ArrayString])], string::join),
            builtin("length", vec![req(&[String, Array, Object])], string::length),
            builtin("lower", vec![req(&[String])], string::lower),
            builtin("upper", vec![req(&[String])], string::upper),
            builtin(
                "pad_left",
                vec![req(&[String]), req(&[Number]), opt(&[String])],
                string::pad_left,
            ),
            builtin(
                "pad_right",
                vec![req(&[String]), req(&[Number]), opt(&[String])],
                string::pad_right,
            ),
            builtin(
                "replace",
                vec![req(&[String]), req(&[String]), req(&[String]), opt(&[Number])],
                string::replace,
            ),
            builtin(
                "split",
                vec![req(&[String]), req(&[String]), opt(&[Number])],
                string::split,
            ),
            builtin("trim", vec![req(&[String]), opt(&[String])], string::trim),
            builtin("trim_left", vec![req(&[String]), opt(&[String])], string::trim_left),
            builtin("trim_right", vec![req(&[String]), opt(&[String])], string::trim_right),
            builtin("to_string", vec![req(&[Any])], string::to_string),
            builtin("type", vec![req(&[Any])], object::type_of),
            builtin("keys", vec![req(&[Object])], object::keys),
            builtin("values", vec![req(&[Object])], object::values),
            builtin("items", vec![req(&[Object])], object::items),
            builtin("from_items", vec![req(&[Array])], object::from_items),
            FunctionEntry::new(
                "merge",
                Signature::new(vec![]).with_variadic(req(&[Object])),
                object::merge,
            ),
            FunctionEntry::new(
                "not_null",
                Signature::new(vec![req(&[Any])]).with_variadic(opt(&[Any])),
                object::not_null,
            ),
            builtin("map", vec![req(&[Expref]), req(&[Array])], array::map),
            builtin("reverse", vec![req(&[Array, String])], array::reverse),
            builtin("sort", vec![req(&sortable)], array::sort),
            builtin("sort_by", vec![req(&[Array]), req(&[Expref])], array::sort_by),
            builtin("group_by", vec![req(&[Array]), req(&[Expref])], array::group_by),
            builtin("to_array", vec![req(&[Any])], array::to_array),
            FunctionEntry::new(
                "zip",
                Signature::new(vec![req(&[Array])]).with_variadic(opt(&[Array])),
                array::zip,
            ),
        ]
    })
}

// ── Argument access ──────────────────────────────────────────────────────────
//
// Handlers run after signature validation, so these only fail when a handler
// is invoked directly with arguments it was never declared to accept.

static ABSENT: Value = Value::Absent;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&ABSENT)
}

fn invalid(function: &str, index: usize, expected: &str, actual: &Value) -> EvaluatorError {
    EvaluatorError::ArgumentType {
        function: function.to_string(),
        position: index + 1,
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

fn array_arg<'v>(function: &str, args: &'v [Value], index: usize) -> Result<&'v [Value], EvaluatorError> {
    let value = arg(args, index);
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| invalid(function, index, "array", value))
}

fn string_arg<'v>(function: &str, args: &'v [Value], index: usize) -> Result<&'v str, EvaluatorError> {
    let value = arg(args, index);
    value
        .as_str()
        .ok_or_else(|| invalid(function, index, "string", value))
}

fn number_arg(function: &str, args: &[Value], index: usize) -> Result<f64, EvaluatorError> {
    let value = arg(args, index);
    value
        .as_f64()
        .ok_or_else(|| invalid(function, index, "number", value))
}

/// An optional integer argument; `None` when not supplied.
fn integer_arg(function: &str, args: &[Value], index: usize) -> Result<Option<i64>, EvaluatorError> {
    match arg(args, index) {
        Value::Absent => Ok(None),
        Value::Number(n) => crate::utils::as_integer(*n)
            .map(Some)
            .ok_or_else(|| EvaluatorError::ArgumentType {
                function: function.to_string(),
                position: index + 1,
                expected: "integer".to_string(),
                actual: n.to_string(),
            }),
        other => Err(invalid(function, index, "number", other)),
    }
}

fn expref_arg<'v>(function: &str, args: &'v [Value], index: usize) -> Result<&'v ExpRef, EvaluatorError> {
    let value = arg(args, index);
    value
        .as_expref()
        .ok_or_else(|| invalid(function, index, "expref", value))
}

/// Evaluate `expref` against every item, requiring all keys to be numbers
/// or all to be strings.
fn sort_keys(
    function: &str,
    items: &[Value],
    expref: &ExpRef,
    evaluator: &mut Evaluator<'_>,
) -> Result<Vec<Value>, EvaluatorError> {
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        let key = evaluator.apply_expref(expref, item)?;
        let consistent = match keys.first() {
            None => key.is_number() || key.is_string(),
            Some(Value::Number(_)) => key.is_number(),
            Some(_) => key.is_string(),
        };
        if !consistent {
            return Err(EvaluatorError::TypeError(format!(
                "{function}() expression must yield all numbers or all strings, got {} at element {}",
                key.type_name(),
                keys.len()
            )));
        }
        keys.push(key);
    }
    Ok(keys)
}

/// Built-in numeric functions
pub mod numeric {
    use super::*;
    use crate::utils::compare_sortable;
    use std::cmp::Ordering;

    pub fn abs(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(Value::Number(number_arg("abs", args, 0)?.abs()))
    }

    pub fn ceil(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(Value::Number(number_arg("ceil", args, 0)?.ceil()))
    }

    pub fn floor(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(Value::Number(number_arg("floor", args, 0)?.floor()))
    }

    pub fn sum(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let total = array_arg("sum", args, 0)?
            .iter()
            .filter_map(Value::as_f64)
            .sum::<f64>();
        Ok(Value::Number(total))
    }

    /// Mean of the numbers; null for an empty array.
    pub fn avg(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let items = array_arg("avg", args, 0)?;
        if items.is_empty() {
            return Ok(Value::Null);
        }
        let total: f64 = items.iter().filter_map(Value::as_f64).sum();
        Ok(Value::Number(total / items.len() as f64))
    }

    fn extreme(function: &str, args: &[Value], wanted: Ordering) -> Result<Value, EvaluatorError> {
        let items = array_arg(function, args, 0)?;
        let best = items.iter().reduce(|best, item| {
            if compare_sortable(item, best) == wanted {
                item
            } else {
                best
            }
        });
        Ok(best.cloned().unwrap_or(Value::Null))
    }

    /// Largest element; null for an empty array.
    pub fn max(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        extreme("max", args, Ordering::Greater)
    }

    /// Smallest element; null for an empty array.
    pub fn min(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        extreme("min", args, Ordering::Less)
    }

    fn extreme_by(
        function: &str,
        args: &[Value],
        evaluator: &mut Evaluator<'_>,
        wanted: Ordering,
    ) -> Result<Value, EvaluatorError> {
        let items = array_arg(function, args, 0)?;
        let expref = expref_arg(function, args, 1)?;
        let keys = sort_keys(function, items, expref, evaluator)?;

        let mut best: Option<usize> = None;
        for (i, key) in keys.iter().enumerate() {
            match best {
                Some(b) if compare_sortable(key, &keys[b]) != wanted => {}
                _ => best = Some(i),
            }
        }
        Ok(best.map_or(Value::Null, |i| items[i].clone()))
    }

    pub fn max_by(args: &[Value], evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        extreme_by("max_by", args, evaluator, Ordering::Greater)
    }

    pub fn min_by(args: &[Value], evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        extreme_by("min_by", args, evaluator, Ordering::Less)
    }

    /// Numbers pass through, numeric strings are parsed, anything else is null.
    pub fn to_number(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(match arg(args, 0) {
            Value::Number(n) => Value::Number(*n),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Value::Number(n),
                _ => Value::Null,
            },
            _ => Value::Null,
        })
    }
}

/// Built-in string functions
pub mod string {
    use super::*;

    /// Widest string `pad_left` and `pad_right` will build, in code points.
    pub const MAX_PAD_WIDTH: usize = 1 << 20;

    pub fn contains(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let search = arg(args, 1);
        let found = match arg(args, 0) {
            Value::Array(items) => items.iter().any(|item| item == search),
            Value::String(subject) => search.as_str().is_some_and(|s| subject.contains(s)),
            other => return Err(invalid("contains", 0, "array|string", other)),
        };
        Ok(Value::Bool(found))
    }

    pub fn starts_with(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let subject = string_arg("starts_with", args, 0)?;
        let prefix = string_arg("starts_with", args, 1)?;
        Ok(Value::Bool(subject.starts_with(prefix)))
    }

    pub fn ends_with(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let subject = string_arg("ends_with", args, 0)?;
        let suffix = string_arg("ends_with", args, 1)?;
        Ok(Value::Bool(subject.ends_with(suffix)))
    }

    /// Length in code points for strings, element count otherwise.
    pub fn length(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let len = match arg(args, 0) {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => return Err(invalid("length", 0, "string|array|object", other)),
        };
        Ok(Value::from(len))
    }

    pub fn lower(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(Value::from(string_arg("lower", args, 0)?.to_lowercase()))
    }

    pub fn upper(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(Value::from(string_arg("upper", args, 0)?.to_uppercase()))
    }

    pub fn join(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let glue = string_arg("join", args, 0)?;
        let parts: Vec<&str> = array_arg("join", args, 1)?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        Ok(Value::from(parts.join(glue)))
    }

    /// Split on `separator`, at most `count` times when given. An empty
    /// separator splits into code points.
    pub fn split(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let subject = string_arg("split", args, 0)?;
        let separator = string_arg("split", args, 1)?;
        let count = non_negative("split", args, 2)?;

        let parts: Vec<Value> = if separator.is_empty() {
            let chars: Vec<char> = subject.chars().collect();
            let limit = count.unwrap_or(chars.len()).min(chars.len());
            let mut parts: Vec<Value> = chars[..limit].iter().map(|c| Value::from(c.to_string())).collect();
            if limit < chars.len() {
                parts.push(Value::from(chars[limit..].iter().collect::<String>()));
            }
            parts
        } else {
            match count {
                Some(n) => subject.splitn(n + 1, separator).map(Value::from).collect(),
                None => subject.split(separator).map(Value::from).collect(),
            }
        };
        Ok(Value::from(parts))
    }

    pub fn replace(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let subject = string_arg("replace", args, 0)?;
        let old = string_arg("replace", args, 1)?;
        let new = string_arg("replace", args, 2)?;
        let replaced = match non_negative("replace", args, 3)? {
            Some(count) => subject.replacen(old, new, count),
            None => subject.replace(old, new),
        };
        Ok(Value::from(replaced))
    }

    fn trim_with(
        function: &str,
        args: &[Value],
        left: bool,
        right: bool,
    ) -> Result<Value, EvaluatorError> {
        let subject = string_arg(function, args, 0)?;
        let chars: Vec<char> = match arg(args, 1) {
            Value::String(s) if !s.is_empty() => s.chars().collect(),
            _ => Vec::new(),
        };
        let strip = |c: char| {
            if chars.is_empty() {
                c.is_whitespace()
            } else {
                chars.contains(&c)
            }
        };
        let mut result = subject;
        if left {
            result = result.trim_start_matches(strip);
        }
        if right {
            result = result.trim_end_matches(strip);
        }
        Ok(Value::from(result))
    }

    pub fn trim(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        trim_with("trim", args, true, true)
    }

    pub fn trim_left(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        trim_with("trim_left", args, true, false)
    }

    pub fn trim_right(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        trim_with("trim_right", args, false, true)
    }

    fn pad(function: &str, args: &[Value], left: bool) -> Result<Value, EvaluatorError> {
        let subject = string_arg(function, args, 0)?;
        let width = non_negative(function, args, 1)?.unwrap_or(0);
        if width > MAX_PAD_WIDTH {
            return Err(EvaluatorError::EvaluationError(format!(
                "{function}() width {width} exceeds the limit of {MAX_PAD_WIDTH}"
            )));
        }
        let pad = match arg(args, 2) {
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(EvaluatorError::EvaluationError(format!(
                            "{function}() pad must be a single character, got {s:?}"
                        )))
                    }
                }
            }
            _ => ' ',
        };

        let len = subject.chars().count();
        if len >= width {
            return Ok(Value::from(subject));
        }
        let fill: String = std::iter::repeat(pad).take(width - len).collect();
        Ok(Value::from(if left {
            fill + subject
        } else {
            format!("{subject}{fill}")
        }))
    }

    pub fn pad_left(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        pad("pad_left", args, true)
    }

    pub fn pad_right(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        pad("pad_right", args, false)
    }

    /// Resolve a slice-style bound against a length.
    fn bound(value: Option<i64>, len: usize, default: usize) -> usize {
        match value {
            None => default,
            Some(i) if i < 0 => (len as i64 + i).max(0) as usize,
            Some(i) => (i as usize).min(len),
        }
    }

    fn find(function: &str, args: &[Value], last: bool) -> Result<Value, EvaluatorError> {
        let subject: Vec<char> = string_arg(function, args, 0)?.chars().collect();
        let needle: Vec<char> = string_arg(function, args, 1)?.chars().collect();
        let start = bound(integer_arg(function, args, 2)?, subject.len(), 0);
        let end = bound(integer_arg(function, args, 3)?, subject.len(), subject.len());

        if needle.is_empty() || start >= end || end - start < needle.len() {
            return Ok(Value::Null);
        }
        let mut candidates = start..=end - needle.len();
        let is_match = |&i: &usize| subject[i..i + needle.len()] == needle[..];
        let found = if last {
            candidates.rev().find(is_match)
        } else {
            candidates.find(is_match)
        };
        Ok(found.map_or(Value::Null, Value::from))
    }

    /// Code point index of the first occurrence, or null.
    pub fn find_first(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        find("find_first", args, false)
    }

    /// Code point index of the last occurrence, or null.
    pub fn find_last(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        find("find_last", args, true)
    }

    /// Strings pass through; everything else is rendered as JSON.
    pub fn to_string(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        match arg(args, 0) {
            s @ Value::String(_) => Ok(s.clone()),
            other => other
                .to_json_string()
                .map(Value::from)
                .map_err(|e| EvaluatorError::EvaluationError(e.to_string())),
        }
    }

    fn non_negative(function: &str, args: &[Value], index: usize) -> Result<Option<usize>, EvaluatorError> {
        match integer_arg(function, args, index)? {
            Some(n) if n < 0 => Err(EvaluatorError::ArgumentType {
                function: function.to_string(),
                position: index + 1,
                expected: "non-negative integer".to_string(),
                actual: n.to_string(),
            }),
            other => Ok(other.map(|n| n as usize)),
        }
    }
}

/// Built-in array functions
pub mod array {
    use super::*;
    use crate::utils::compare_sortable;
    use indexmap::IndexMap;

    /// Apply the expression to every element. Unlike a projection, null
    /// results are kept.
    pub fn map(args: &[Value], evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let expref = expref_arg("map", args, 0)?;
        let items = array_arg("map", args, 1)?;
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            match evaluator.apply_expref(expref, item)? {
                Value::Absent => result.push(Value::Null),
                value => result.push(value),
            }
        }
        Ok(Value::from(result))
    }

    pub fn reverse(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        match arg(args, 0) {
            Value::String(s) => Ok(Value::from(s.chars().rev().collect::<String>())),
            Value::Array(items) => Ok(Value::from(items.iter().rev().cloned().collect::<Vec<_>>())),
            other => Err(invalid("reverse", 0, "array|string", other)),
        }
    }

    pub fn sort(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let mut items = array_arg("sort", args, 0)?.to_vec();
        items.sort_by(compare_sortable);
        Ok(Value::from(items))
    }

    /// Stable sort by the key the expression yields for each element.
    pub fn sort_by(args: &[Value], evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let items = array_arg("sort_by", args, 0)?;
        let expref = expref_arg("sort_by", args, 1)?;
        let keys = sort_keys("sort_by", items, expref, evaluator)?;

        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| compare_sortable(&keys[a], &keys[b]));
        Ok(Value::from(
            order.into_iter().map(|i| items[i].clone()).collect::<Vec<_>>(),
        ))
    }

    /// Group elements by a string key. Elements whose key is null are skipped.
    pub fn group_by(args: &[Value], evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let items = array_arg("group_by", args, 0)?;
        let expref = expref_arg("group_by", args, 1)?;

        let mut groups: IndexMap<String, Vec<Value>> = IndexMap::new();
        for (i, item) in items.iter().enumerate() {
            match evaluator.apply_expref(expref, item)? {
                Value::String(key) => groups.entry(key.to_string()).or_default().push(item.clone()),
                Value::Null | Value::Absent => {}
                other => {
                    return Err(EvaluatorError::TypeError(format!(
                        "group_by() expression must yield a string, got {} at element {}",
                        other.type_name(),
                        i
                    )))
                }
            }
        }
        Ok(Value::object(
            groups
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
        ))
    }

    pub fn to_array(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(match arg(args, 0) {
            array @ Value::Array(_) => array.clone(),
            Value::Absent => Value::from(vec![Value::Null]),
            other => Value::from(vec![other.clone()]),
        })
    }

    /// Tuples of the i-th elements, as long as the shortest input.
    pub fn zip(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let arrays = (0..args.len())
            .map(|i| array_arg("zip", args, i))
            .collect::<Result<Vec<_>, _>>()?;
        let len = arrays.iter().map(|a| a.len()).min().unwrap_or(0);
        let tuples = (0..len)
            .map(|i| Value::from(arrays.iter().map(|a| a[i].clone()).collect::<Vec<_>>()))
            .collect::<Vec<_>>();
        Ok(Value::from(tuples))
    }
}

/// Built-in object and general functions
pub mod object {
    use super::*;
    use indexmap::IndexMap;

    fn object_arg<'v>(
        function: &str,
        args: &'v [Value],
        index: usize,
    ) -> Result<&'v IndexMap<String, Value>, EvaluatorError> {
        let value = arg(args, index);
        value
            .as_object()
            .ok_or_else(|| invalid(function, index, "object", value))
    }

    pub fn type_of(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(Value::from(arg(args, 0).type_name()))
    }

    pub fn keys(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let map = object_arg("keys", args, 0)?;
        Ok(Value::from(
            map.keys().map(|k| Value::from(k.as_str())).collect::<Vec<_>>(),
        ))
    }

    pub fn values(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let map = object_arg("values", args, 0)?;
        Ok(Value::from(map.values().cloned().collect::<Vec<_>>()))
    }

    /// `[[key, value], ...]` in insertion order
    pub fn items(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let map = object_arg("items", args, 0)?;
        Ok(Value::from(
            map.iter()
                .map(|(k, v)| Value::from(vec![Value::from(k.as_str()), v.clone()]))
                .collect::<Vec<_>>(),
        ))
    }

    /// Inverse of `items`. Later pairs overwrite earlier ones.
    pub fn from_items(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let pairs = array_arg("from_items", args, 0)?;
        let mut map = IndexMap::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(key), value]) => {
                    map.insert(key.to_string(), value.clone());
                }
                _ => {
                    return Err(EvaluatorError::ArgumentType {
                        function: "from_items".to_string(),
                        position: 1,
                        expected: "array of [string, any] pairs".to_string(),
                        actual: format!("{} at element {}", pair, i),
                    })
                }
            }
        }
        Ok(Value::object(map))
    }

    /// Shallow merge, later objects win.
    pub fn merge(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        let mut merged = IndexMap::new();
        for i in 0..args.len() {
            for (k, v) in object_arg("merge", args, i)? {
                merged.insert(k.clone(), v.clone());
            }
        }
        Ok(Value::object(merged))
    }

    /// First argument that is neither null nor absent, else null.
    pub fn not_null(args: &[Value], _: &mut Evaluator<'_>) -> Result<Value, EvaluatorError> {
        Ok(args
            .iter()
            .find(|v| !v.is_nullish())
            .cloned()
            .unwrap_or(Value::Null))
    }
}
