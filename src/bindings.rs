// Binding environment for `$name` lookups

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::evaluator::EvaluatorError;
use crate::value::Value;

type Compute = Box<dyn Fn() -> Result<Value, EvaluatorError> + Send + Sync>;

/// A deferred binding: computed on first access, then remembered.
pub struct Delegate {
    compute: Compute,
    resolved: OnceLock<Result<Value, EvaluatorError>>,
}

impl Delegate {
    fn resolve(&self) -> Result<Value, EvaluatorError> {
        self.resolved.get_or_init(|| (self.compute)()).clone()
    }
}

/// A bound value, either known up front or produced on demand
#[derive(Clone)]
pub enum Binding {
    Value(Value),
    Delegate(Arc<Delegate>),
}

impl Binding {
    pub fn new(value: impl Into<Value>) -> Self {
        Binding::Value(value.into())
    }

    /// A binding whose value is computed by `compute` the first time it is
    /// read. Errors are remembered as well.
    pub fn delegate<F>(compute: F) -> Self
    where
        F: Fn() -> Result<Value, EvaluatorError> + Send + Sync + 'static,
    {
        Binding::Delegate(Arc::new(Delegate {
            compute: Box::new(compute),
            resolved: OnceLock::new(),
        }))
    }

    pub fn value(&self) -> Result<Value, EvaluatorError> {
        match self {
            Binding::Value(v) => Ok(v.clone()),
            Binding::Delegate(d) => d.resolve(),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Binding::Delegate(d) => match d.resolved.get() {
                Some(resolved) => f.debug_tuple("Delegate").field(resolved).finish(),
                None => f.write_str("Delegate(<pending>)"),
            },
        }
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

struct Scope {
    entries: HashMap<String, Binding>,
    parent: Option<Arc<Scope>>,
}

/// Persistent chain of scopes
///
/// Extending never touches the parent, so a `Bindings` captured by an
/// expression reference keeps seeing exactly the names that were visible
/// when it was created. Cloning is a reference-count bump.
#[derive(Clone, Default)]
pub struct Bindings {
    scope: Option<Arc<Scope>>,
}

impl Bindings {
    /// The empty environment
    pub fn new() -> Self {
        Bindings { scope: None }
    }

    /// Build a root scope from parameters; key `x` becomes `$x`.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Binding>,
    {
        Bindings::new().extend(
            params
                .into_iter()
                .map(|(k, v)| (format!("${}", k.as_ref()), v.into())),
        )
    }

    /// A child scope holding `entries` on top of `self`. Names are stored as
    /// given, sigil included.
    pub fn extend<I, K>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Binding)>,
        K: Into<String>,
    {
        let entries: HashMap<String, Binding> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if entries.is_empty() {
            return self.clone();
        }
        Bindings {
            scope: Some(Arc::new(Scope {
                entries,
                parent: self.scope.clone(),
            })),
        }
    }

    /// Shorthand for extending with a single eager value.
    pub fn register(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extend([(name.into(), Binding::new(value))])
    }

    /// Innermost binding for `name`, if any
    pub fn get(&self, name: &str) -> Option<&Binding> {
        let mut scope = self.scope.as_deref();
        while let Some(s) = scope {
            if let Some(binding) = s.entries.get(name) {
                return Some(binding);
            }
            scope = s.parent.as_deref();
        }
        None
    }

    /// Resolve `name` to a value. An unbound name is an error, never Absent.
    pub fn lookup(&self, name: &str) -> Result<Value, EvaluatorError> {
        match self.get(name) {
            Some(binding) => binding.value(),
            None => Err(EvaluatorError::UnknownBinding {
                name: name.to_string(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_none()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        let mut scope = self.scope.as_deref();
        while let Some(s) = scope {
            let mut names: Vec<&String> = s.entries.keys().collect();
            names.sort();
            list.entry(&names);
            scope = s.parent.as_deref();
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lookup_walks_outward() {
        let outer = Bindings::new().register("$a", 1i64).register("$b", 2i64);
        let inner = outer.register("$a", 10i64);

        assert_eq!(inner.lookup("$a").unwrap(), Value::from(10i64));
        assert_eq!(inner.lookup("$b").unwrap(), Value::from(2i64));
        // the parent is untouched
        assert_eq!(outer.lookup("$a").unwrap(), Value::from(1i64));
    }

    #[test]
    fn test_unknown_binding_is_an_error() {
        let err = Bindings::new().lookup("$missing").unwrap_err();
        assert_eq!(
            err,
            EvaluatorError::UnknownBinding {
                name: "$missing".to_string()
            }
        );
    }

    #[test]
    fn test_from_params_adds_sigil() {
        let bindings = Bindings::from_params([("x", Value::from("hi"))]);
        assert_eq!(bindings.lookup("$x").unwrap(), Value::from("hi"));
        assert!(bindings.get("x").is_none());
    }

    #[test]
    fn test_delegate_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let binding = Binding::delegate(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(42i64))
        });
        let bindings = Bindings::new().extend([("$answer", binding)]);

        assert_eq!(bindings.lookup("$answer").unwrap(), Value::from(42i64));
        assert_eq!(bindings.lookup("$answer").unwrap(), Value::from(42i64));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delegate_error_surfaces_on_lookup() {
        let binding = Binding::delegate(|| Err(EvaluatorError::EvaluationError("boom".into())));
        let bindings = Bindings::new().extend([("$bad", binding)]);
        assert!(matches!(
            bindings.lookup("$bad"),
            Err(EvaluatorError::EvaluationError(_))
        ));
    }

    #[test]
    fn test_extend_with_nothing_shares_scope() {
        let bindings = Bindings::new();
        let same = bindings.extend(Vec::<(String, Binding)>::new());
        assert!(same.is_empty());
    }
}
