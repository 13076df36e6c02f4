//! General template functions
//!
//! Node discovery functions live in [`crate::discovery`].

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

/// Abort the render with a message
///
/// Usage: {{ fail("controlplane nodes need values.endpoint") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// Build a mapping from key/value pairs
///
/// Usage: {{ dict("interface", link, "dhcp", false) | toyaml }}
pub fn dict(args: Vec<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict requires an even number of arguments (key-value pairs)",
        ));
    }

    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        let value = serde_json::to_value(&pair[1])
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        map.insert(key.to_string(), value);
    }
    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

/// Usage: {{ list("1.1.1.1", "8.8.8.8") }}
pub fn list(args: Vec<Value>) -> Value {
    Value::from(args)
}

/// Attribute with a fallback
///
/// Usage: {{ get(values, "clusterDomain", "cluster.local") }}
pub fn get(obj: Value, key: String, default: Option<Value>) -> Value {
    match obj.get_attr(&key) {
        Ok(v) if !v.is_undefined() && !v.is_none() => v,
        _ => default.unwrap_or(Value::UNDEFINED),
    }
}

/// Nested attribute with a fallback; the last argument is the default
///
/// Usage: {{ dig(existing_config(), "machine", "install", "disk", "/dev/sda") }}
pub fn dig(obj: Value, keys_and_default: Rest<Value>) -> Result<Value, Error> {
    let Some((default, keys)) = keys_and_default.split_last() else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dig requires at least one key and a default value",
        ));
    };

    let mut current = obj;
    for key in keys {
        let next = match key.as_str() {
            Some(name) => current.get_attr(name),
            None => current.get_item(key),
        };
        match next {
            Ok(v) if !v.is_undefined() && !v.is_none() => current = v,
            _ => return Ok(default.clone()),
        }
    }
    Ok(current)
}

/// First argument that is neither undefined, none nor an empty string
///
/// Usage: {{ coalesce(values.hostname, discovered_hostname(), "talos") }}
pub fn coalesce(args: Vec<Value>) -> Value {
    args.into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && arg.as_str().is_none_or(|s| !s.is_empty())
        })
        .unwrap_or(Value::UNDEFINED)
}

/// Usage: {{ ternary("controlplane", "worker", values.isControlPlane) }}
pub fn ternary(true_val: Value, false_val: Value, condition: Value) -> Value {
    if condition.is_true() { true_val } else { false_val }
}

pub fn tostring(value: Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

pub fn toint(value: Value) -> Result<i64, Error> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    let text = tostring(value);
    text.trim().parse::<i64>().map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot convert '{}' to int", text),
        )
    })
}

/// Printf-style formatting with `%s`, `%d`, `%v` and `%%`
///
/// Usage: {{ printf("https://%s:%d", endpoint, 6443) }}
pub fn printf(format: String, args: Vec<Value>) -> Result<String, Error> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.into_iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('%'),
            Some('%') => out.push('%'),
            Some(_) => {
                let arg = args.next().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        "not enough arguments for format string",
                    )
                })?;
                out.push_str(&tostring(arg));
            }
        }
    }
    Ok(out)
}
