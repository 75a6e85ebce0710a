// Function signatures and argument validation

use crate::evaluator::EvaluatorError;
use crate::value::Value;

/// Parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Any,
    Number,
    String,
    Boolean,
    Null,
    Array,
    Object,
    /// An array whose elements are all numbers
    ArrayNumber,
    /// An array whose elements are all strings
    ArrayString,
    Expref,
}

impl ParamType {
    pub fn name(self) -> &'static str {
        match self {
            ParamType::Any => "any",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Null => "null",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::ArrayNumber => "array[number]",
            ParamType::ArrayString => "array[string]",
            ParamType::Expref => "expref",
        }
    }

    /// Whether `value` is acceptable. Absent counts as null.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_bool(),
            ParamType::Null => value.is_nullish(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::ArrayNumber => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_number)),
            ParamType::ArrayString => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            ParamType::Expref => value.is_expref(),
        }
    }

    /// The element kind required by a typed array, if this is one.
    fn element_type(self) -> Option<ParamType> {
        match self {
            ParamType::ArrayNumber => Some(ParamType::Number),
            ParamType::ArrayString => Some(ParamType::String),
            _ => None,
        }
    }
}

/// Function parameter definition
#[derive(Debug, Clone)]
pub struct Parameter {
    pub types: Vec<ParamType>,
    pub optional: bool,
}

impl Parameter {
    pub fn required(types: &[ParamType]) -> Self {
        Parameter {
            types: types.to_vec(),
            optional: false,
        }
    }

    pub fn optional(types: &[ParamType]) -> Self {
        Parameter {
            types: types.to_vec(),
            optional: true,
        }
    }

    fn expected(&self) -> String {
        self.types
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join("|")
    }

    fn check(&self, function: &str, position: usize, arg: &Value) -> Result<(), EvaluatorError> {
        if self.types.iter().any(|t| t.matches(arg)) {
            return Ok(());
        }

        let actual = match (arg.as_array(), self.offending_element(arg)) {
            (Some(_), Some((index, element))) => {
                format!("array with {} at element {}", element.type_name(), index)
            }
            _ => arg.type_name().to_string(),
        };
        Err(EvaluatorError::ArgumentType {
            function: function.to_string(),
            position,
            expected: self.expected(),
            actual,
        })
    }

    /// For typed-array parameters, the first element that breaks the
    /// element kind chosen by the array's first element.
    fn offending_element<'v>(&self, arg: &'v Value) -> Option<(usize, &'v Value)> {
        let items = arg.as_array()?;
        let element_types: Vec<ParamType> =
            self.types.iter().filter_map(|t| t.element_type()).collect();
        if element_types.is_empty() {
            return None;
        }

        let first = items.first()?;
        let Some(kind) = element_types.iter().find(|t| t.matches(first)) else {
            return Some((0, first));
        };
        items.iter().enumerate().find(|(_, item)| !kind.matches(item))
    }
}

/// Function signature: fixed parameters, optionally followed by a variadic tail
#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<Parameter>,
    pub variadic: Option<Parameter>,
}

impl Signature {
    pub fn new(params: Vec<Parameter>) -> Self {
        Signature {
            params,
            variadic: None,
        }
    }

    /// Accept any number of further arguments matching `param` after the
    /// fixed ones (at least one).
    pub fn with_variadic(mut self, param: Parameter) -> Self {
        self.variadic = Some(param);
        self
    }

    /// A signature accepting anything, for caller functions that validate
    /// their own arguments.
    pub fn any() -> Self {
        Signature::new(Vec::new()).with_variadic(Parameter::optional(&[ParamType::Any]))
    }

    fn arity_range(&self) -> (usize, Option<usize>) {
        let required = self.params.iter().filter(|p| !p.optional).count();
        match &self.variadic {
            Some(p) if p.optional => (required, None),
            Some(_) => (self.params.len() + 1, None),
            None => (required, Some(self.params.len())),
        }
    }

    fn expected_arity(&self) -> String {
        match self.arity_range() {
            (min, None) => format!("at least {min}"),
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{min} to {max}"),
        }
    }

    /// Check argument count, then the kind of each argument. Positions in
    /// errors are 1-based.
    pub fn validate(&self, function: &str, args: &[Value]) -> Result<(), EvaluatorError> {
        let (min, max) = self.arity_range();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(EvaluatorError::Arity {
                function: function.to_string(),
                expected: self.expected_arity(),
                actual: args.len(),
            });
        }

        for (i, arg) in args.iter().enumerate() {
            let param = match self.params.get(i) {
                Some(p) => p,
                None => match &self.variadic {
                    Some(p) => p,
                    None => break,
                },
            };
            param.check(function, i + 1, arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_signature_validation() {
        let sig = Signature::new(vec![
            Parameter::required(&[ParamType::String]),
            Parameter::optional(&[ParamType::Number]),
        ]);

        assert!(sig.validate("f", &[v(json!("a"))]).is_ok());
        assert!(sig.validate("f", &[v(json!("a")), v(json!(1))]).is_ok());

        match sig.validate("f", &[]).unwrap_err() {
            EvaluatorError::Arity {
                function,
                expected,
                actual,
            } => {
                assert_eq!(function, "f");
                assert_eq!(expected, "1 to 2");
                assert_eq!(actual, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(sig
            .validate("f", &[v(json!("a")), v(json!(1)), v(json!(2))])
            .is_err());
    }

    #[test]
    fn test_argument_type_names_position() {
        let sig = Signature::new(vec![
            Parameter::required(&[ParamType::String]),
            Parameter::required(&[ParamType::String]),
        ]);
        let err = sig.validate("starts_with", &[v(json!("a")), v(json!(1))]).unwrap_err();
        assert_eq!(
            err,
            EvaluatorError::ArgumentType {
                function: "starts_with".to_string(),
                position: 2,
                expected: "string".to_string(),
                actual: "number".to_string(),
            }
        );
    }

    #[test]
    fn test_typed_array_names_element() {
        let sig = Signature::new(vec![Parameter::required(&[
            ParamType::ArrayNumber,
            ParamType::ArrayString,
        ])]);
        assert!(sig.validate("max", &[v(json!([1, 2]))]).is_ok());
        assert!(sig.validate("max", &[v(json!(["a", "b"]))]).is_ok());
        assert!(sig.validate("max", &[v(json!([]))]).is_ok());

        match sig.validate("max", &[v(json!([1, "a", 2]))]).unwrap_err() {
            EvaluatorError::ArgumentType {
                expected, actual, ..
            } => {
                assert_eq!(expected, "array[number]|array[string]");
                assert_eq!(actual, "array with string at element 1");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_variadic() {
        let sig = Signature::new(vec![]).with_variadic(Parameter::required(&[ParamType::Object]));
        assert!(sig.validate("merge", &[v(json!({}))]).is_ok());
        assert!(sig.validate("merge", &[v(json!({})), v(json!({"a": 1}))]).is_ok());
        assert!(matches!(
            sig.validate("merge", &[]),
            Err(EvaluatorError::Arity { .. })
        ));
        assert!(matches!(
            sig.validate("merge", &[v(json!({})), v(json!(1))]),
            Err(EvaluatorError::ArgumentType { position: 2, .. })
        ));
    }

    #[test]
    fn test_absent_counts_as_null() {
        let sig = Signature::new(vec![Parameter::required(&[ParamType::Null])]);
        assert!(sig.validate("f", &[Value::Absent]).is_ok());
        assert_eq!(Signature::any().expected_arity(), "at least 0");
    }
}
