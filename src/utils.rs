// Utility functions and helpers shared by the evaluator and built-ins

use std::cmp::Ordering;

use crate::value::Value;

/// Flatten one level of nesting; non-array elements are kept as they are.
pub fn flatten(arr: &[Value]) -> Vec<Value> {
    let mut result = Vec::with_capacity(arr.len());
    for item in arr {
        match item {
            Value::Array(inner) => result.extend(inner.iter().cloned()),
            _ => result.push(item.clone()),
        }
    }
    result
}

/// Resolve a possibly negative index against a length.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        Some(resolved as usize)
    } else {
        None
    }
}

/// Positions selected by `start:stop:step` over a sequence of `len` items,
/// with Python clamping rules. `step` must not be zero.
pub fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |bound: i64| -> i64 {
        if bound < 0 {
            let b = bound + len;
            if b < 0 {
                if step < 0 {
                    -1
                } else {
                    0
                }
            } else {
                b
            }
        } else if bound >= len {
            if step < 0 {
                len - 1
            } else {
                len
            }
        } else {
            bound
        }
    };

    let start = match start {
        Some(s) => clamp(s),
        None if step < 0 => len - 1,
        None => 0,
    };
    let stop = match stop {
        Some(s) => clamp(s),
        None if step < 0 => -1,
        None => len,
    };

    let mut indices = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        indices.push(i as usize);
        // a step past the end of the i64 range also ends the slice
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    indices
}

/// Ordering used by `sort`, `sort_by`, `min_by` and `max_by`: numbers
/// numerically, strings by code point. Callers have already checked that
/// both sides have the same sortable kind.
pub fn compare_sortable(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Whether a number is integral and representable without loss.
pub fn as_integer(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Some(n as i64)
    } else {
        None
    }
}
