//! String-keyed dynamic parameter bags.
//!
//! Callers hand parameters over as untyped [serde_json::Value]s (the HTTP
//! layer posts them as plain strings).  Typed getters enforce ranges and
//! coercions at construction time and name the offending key.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};

pub type Params = BTreeMap<String, Value>;

/// Builds a [Params] from literal entries; mostly used by tests and
/// internal compound wiring.
pub fn params_from<const N: usize>(entries: [(&str, Value); N]) -> Params {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub fn get_i64(params: &Params, key: &str, default: i64) -> Result<i64> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| Error::param(format!("{key} is not an integer ({value})"))),
    }
}

pub fn get_f64(params: &Params, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| Error::param(format!("{key} is not a number ({value})"))),
    }
}

pub fn get_f64_opt(params: &Params, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::param(format!("{key} is not a number ({value})"))),
    }
}

pub fn get_bool(params: &Params, key: &str, default: bool) -> Result<bool> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| Error::param(format!("{key} is not a boolean ({value})"))),
    }
}

pub fn get_str(params: &Params, key: &str) -> Result<String> {
    match params.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(value) => Err(Error::param(format!("{key} is not a string ({value})"))),
        None => Err(Error::param(format!("missing parameter ({key})"))),
    }
}

pub fn get_str_or(params: &Params, key: &str, default: &str) -> Result<String> {
    match params.get(key) {
        None => Ok(default.to_string()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(value) => Err(Error::param(format!("{key} is not a string ({value})"))),
    }
}

/// Re-keys a parameter bag: `key_map` maps local names to shared names;
/// shared names absent from `params` are skipped.
pub fn map_keys(params: &Params, key_map: &BTreeMap<String, String>) -> Params {
    key_map
        .iter()
        .filter_map(|(local, shared)| {
            params
                .get(shared)
                .map(|value| (local.clone(), value.clone()))
        })
        .collect()
}

/// Merges caller parameters over defaults.  A caller value for a defaulted
/// key is coerced to the default's type; unknown keys pass through as-is.
pub fn merge_defaults(caller: &Params, defaults: &Params) -> Result<Params> {
    let mut merged = caller.clone();
    for (key, default) in defaults {
        let value = match caller.get(key) {
            Some(provided) => cast_like(default, provided)
                .map_err(|e| Error::param(format!("{key}: {e}")))?,
            None => default.clone(),
        };
        merged.insert(key.clone(), value);
    }
    Ok(merged)
}

/// Coerces `provided` to the JSON type of `template`.  Strings are parsed,
/// numbers converted, `"true"`/`"false"` become booleans.
pub fn cast_like(template: &Value, provided: &Value) -> Result<Value> {
    match template {
        Value::Number(n) if n.is_i64() || n.is_u64() => match provided {
            Value::Number(p) => p
                .as_i64()
                .map(Value::from)
                .ok_or_else(|| Error::param(format!("not an integer ({provided})"))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| Error::param(format!("not an integer ({s})"))),
            _ => Err(Error::param(format!("not an integer ({provided})"))),
        },
        Value::Number(_) => match provided {
            Value::Number(p) => p
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| Error::param(format!("not a number ({provided})"))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| Error::param(format!("not a number ({s})"))),
            _ => Err(Error::param(format!("not a number ({provided})"))),
        },
        Value::Bool(_) => match provided {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(Error::param(format!("not a boolean ({other})"))),
            },
            _ => Err(Error::param(format!("not a boolean ({provided})"))),
        },
        Value::String(_) => match provided {
            Value::String(s) => Ok(Value::String(s.clone())),
            other => Ok(Value::String(other.to_string())),
        },
        _ => Ok(provided.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_casts_caller_strings() {
        let defaults = params_from([
            ("lag", json!(9)),
            ("boost", json!(1.0)),
            ("isSymm", json!(false)),
        ]);
        let caller = params_from([
            ("lag", json!("14")),
            ("boost", json!("2.5")),
            ("isSymm", json!("true")),
            ("secCode", json!("SBER")),
        ]);
        let merged = merge_defaults(&caller, &defaults).unwrap();
        assert_eq!(merged.get("lag"), Some(&json!(14)));
        assert_eq!(merged.get("boost"), Some(&json!(2.5)));
        assert_eq!(merged.get("isSymm"), Some(&json!(true)));
        assert_eq!(merged.get("secCode"), Some(&json!("SBER")));
    }

    #[test]
    fn merge_rejects_garbage() {
        let defaults = params_from([("lag", json!(9))]);
        let caller = params_from([("lag", json!("fast"))]);
        assert!(merge_defaults(&caller, &defaults).is_err());
    }

    #[test]
    fn map_keys_filters_missing() {
        let params = params_from([("Rsi.lag", json!(14))]);
        let mut key_map = BTreeMap::new();
        key_map.insert("lag".to_string(), "Rsi.lag".to_string());
        key_map.insert("alpha".to_string(), "Rsi.alpha".to_string());
        let mapped = map_keys(&params, &key_map);
        assert_eq!(mapped.get("lag"), Some(&json!(14)));
        assert!(!mapped.contains_key("alpha"));
    }

    #[test]
    fn typed_getters_report_key() {
        let params = params_from([("lag", json!("soon"))]);
        let err = get_i64(&params, "lag", 9).unwrap_err();
        assert!(err.to_string().contains("lag"));
        assert_eq!(get_i64(&params, "other", 9).unwrap(), 9);
    }
}
