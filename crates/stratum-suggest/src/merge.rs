//! Ways to fold per-chunk results into one. Every function takes the
//! accumulated value first and the newer chunk's value second.

use serde_json::{Map, Value};

pub fn first_wins<T>(acc: T, _next: T) -> T {
    acc
}

pub fn last_wins<T>(_acc: T, next: T) -> T {
    next
}

/// Keep the accumulated object unless it is empty.
pub fn first_non_empty(acc: Map<String, Value>, next: Map<String, Value>) -> Map<String, Value> {
    if acc.is_empty() {
        next
    } else {
        acc
    }
}

pub fn concat_text(mut acc: String, next: String) -> String {
    if !acc.is_empty() && !next.is_empty() {
        acc.push('\n');
    }
    acc.push_str(&next);
    acc
}

pub fn extend<T>(mut acc: Vec<T>, next: Vec<T>) -> Vec<T> {
    acc.extend(next);
    acc
}

/// Objects merge key by key, arrays concatenate without duplicates, and any
/// other pair resolves to the newer value.
pub fn deep_merge(acc: Value, next: Value) -> Value {
    match (acc, next) {
        (Value::Object(a), Value::Object(b)) => Value::Object(deep_merge_map(a, b)),
        (Value::Array(mut a), Value::Array(b)) => {
            for item in b {
                if !a.contains(&item) {
                    a.push(item);
                }
            }
            Value::Array(a)
        }
        (_, next) => next,
    }
}

pub fn deep_merge_map(mut acc: Map<String, Value>, next: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in next {
        let merged = match acc.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        acc.insert(key, merged);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn simple_strategies() {
        assert_eq!(first_wins(1, 2), 1);
        assert_eq!(last_wins(1, 2), 2);
        assert_eq!(concat_text("a".into(), "b".into()), "a\nb");
        assert_eq!(concat_text(String::new(), "b".into()), "b");
        assert_eq!(extend(vec![1, 2], vec![2, 3]), vec![1, 2, 2, 3]);
    }

    #[test]
    fn first_non_empty_skips_empty_objects() {
        let full = json!({"a": 1}).as_object().cloned().unwrap();
        assert_eq!(first_non_empty(Map::new(), full.clone()), full);
        assert_eq!(first_non_empty(full.clone(), Map::new()), full);
    }

    #[test]
    fn deep_merge_combines_nested_structures() {
        let merged = deep_merge(
            json!({"coverage": {"conclusion": "❌", "notes": ["a"]}, "suggestions": ["x"], "n": 1}),
            json!({"coverage": {"notes": ["a", "b"]}, "suggestions": ["y"], "n": 2, "extra": true}),
        );
        assert_eq!(
            merged,
            json!({
                "coverage": {"conclusion": "❌", "notes": ["a", "b"]},
                "suggestions": ["x", "y"],
                "n": 2,
                "extra": true
            })
        );
    }
}
