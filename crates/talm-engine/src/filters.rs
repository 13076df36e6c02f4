//! Template filters
//!
//! Helm-style helpers plus a few network filters for composing Talos
//! machine configs from discovered addresses.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};
use semver::{Version, VersionReq};
use std::net::IpAddr;

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| invalid(e.to_string()))
}

/// Convert a value to YAML
///
/// Usage: {{ values.network | toyaml | nindent(4) }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Convert a value to compact JSON
///
/// Usage: {{ values.nameservers | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))
}

/// Usage: {{ token | b64encode }}
#[must_use]
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Usage: {{ encoded | b64decode }}
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.trim().as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;
    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

fn plain(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

/// Double-quote a scalar
///
/// Usage: {{ values.clusterName | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    format!("\"{}\"", plain(&value).replace('\\', "\\\\").replace('"', "\\\""))
}

/// Single-quote a scalar (YAML style, `'` doubled)
#[must_use]
pub fn squote(value: Value) -> String {
    format!("'{}'", plain(&value).replace('\'', "''"))
}

/// Indent every non-empty line, starting on a new line
///
/// Usage: {{ values.extraConfig | toyaml | nindent(2) }}
#[must_use]
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Indent every non-empty line
#[must_use]
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fail the render when a value is missing or empty
///
/// Usage: {{ values.endpoint | required("endpoint must be set") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined() || value.is_none();
    let blank = value.as_str().is_some_and(str::is_empty);
    if missing || blank {
        let reason = if missing { "missing" } else { "empty" };
        return Err(invalid(
            message.unwrap_or_else(|| format!("required value is {}", reason)),
        ));
    }
    Ok(value)
}

/// True for undefined, none, empty strings and empty collections
///
/// Usage: {% if discovered_resolvers() | empty %}
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    match value.as_str() {
        Some(s) => s.is_empty(),
        None => value.len() == Some(0),
    }
}

/// Usage: {% if values | haskey("podSubnets") %}
pub fn haskey(value: Value, key: String) -> bool {
    value
        .get_attr(&key)
        .map(|v| !v.is_undefined())
        .unwrap_or(false)
}

/// Keys of a mapping, in insertion order
pub fn keys(value: Value) -> Result<Vec<String>, Error> {
    let iter = value
        .try_iter()
        .map_err(|_| invalid("cannot get keys from non-mapping value"))?;
    Ok(iter.filter_map(|v| v.as_str().map(str::to_string)).collect())
}

/// Deep merge of two mappings; the argument wins
///
/// Usage: {{ values.defaults | merge(values.overrides) | toyaml }}
pub fn merge(base: Value, overlay: Value) -> Result<Value, Error> {
    let mut merged = to_json(&base)?;
    let overlay = to_json(&overlay)?;
    talm_core::values::deep_merge(&mut merged, &overlay);
    Ok(Value::from_serialize(&merged))
}

/// Hex-encoded SHA-256 digest
pub fn sha256sum(value: String) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Usage: {{ capabilities.talosVersion | trimprefix("v") }}
pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

/// Parse versions such as `v1.9`, `1.31.1` or `1.31.0-0` leniently
fn lenient_version(raw: &str) -> Option<Version> {
    let clean = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(clean) {
        return Some(version);
    }

    let core = clean.split(['-', '+']).next().unwrap_or(clean);
    let mut parts = core.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().unwrap_or(Ok(0)).ok()?;
    let patch = parts.next().unwrap_or(Ok(0)).ok()?;
    Some(Version::new(major, minor, patch))
}

/// Match a version against a semver constraint
///
/// Usage: {% if capabilities.talosVersion | semver_match(">=1.8") %}
pub fn semver_match(version: Value, constraint: String) -> Result<bool, Error> {
    let raw = version
        .as_str()
        .ok_or_else(|| invalid("version must be a string"))?;
    let parsed = lenient_version(raw).ok_or_else(|| invalid(format!("invalid version '{}'", raw)))?;

    let req = VersionReq::parse(constraint.trim())
        .map_err(|e| invalid(format!("invalid constraint '{}': {}", constraint, e)))?;
    Ok(req.matches(&parsed))
}

fn split_cidr(value: &str) -> Result<(IpAddr, Option<u8>), Error> {
    let (addr, prefix) = match value.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (value, None),
    };
    let ip: IpAddr = addr
        .trim()
        .parse()
        .map_err(|_| invalid(format!("'{}' is not an IP address", value)))?;
    let prefix = prefix
        .map(|p| {
            p.trim()
                .parse::<u8>()
                .map_err(|_| invalid(format!("'{}' has an invalid prefix length", value)))
        })
        .transpose()?;
    Ok((ip, prefix))
}

/// Address part of a CIDR
///
/// Usage: {{ "10.0.0.5/24" | ip_address }} -> 10.0.0.5
pub fn ip_address(value: String) -> Result<String, Error> {
    Ok(split_cidr(&value)?.0.to_string())
}

/// Prefix length of a CIDR, the full host length when absent
///
/// Usage: {{ "10.0.0.5/24" | ip_prefix }} -> 24
pub fn ip_prefix(value: String) -> Result<u8, Error> {
    let (ip, prefix) = split_cidr(&value)?;
    Ok(prefix.unwrap_or(if ip.is_ipv6() { 128 } else { 32 }))
}

pub fn is_ipv6(value: String) -> Result<bool, Error> {
    Ok(split_cidr(&value)?.0.is_ipv6())
}
