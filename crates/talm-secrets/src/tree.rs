//! Per-leaf encryption of YAML trees
//!
//! Every string leaf becomes `ENC[AGE,data:<base64 ciphertext>]`. Keys,
//! numbers, booleans and the overall shape stay readable, so encrypted
//! files remain reviewable and diffable.

use age::x25519;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

use crate::error::{Result, SecretsError};

const ENC_PREFIX: &str = "ENC[AGE,data:";
const ENC_SUFFIX: &str = "]";

/// Whether a string is an encrypted leaf
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENC_PREFIX) && value.ends_with(ENC_SUFFIX)
}

/// Encrypt a single string
pub fn encrypt_value(plain: &str, recipient: &x25519::Recipient) -> Result<String> {
    let ciphertext = age::encrypt(recipient, plain.as_bytes()).map_err(|e| {
        SecretsError::Encryption {
            message: e.to_string(),
        }
    })?;
    Ok(format!("{}{}{}", ENC_PREFIX, STANDARD.encode(ciphertext), ENC_SUFFIX))
}

/// Decrypt a single `ENC[AGE,data:...]` string
pub fn decrypt_value(encrypted: &str, identity: &x25519::Identity) -> Result<String> {
    let payload = encrypted
        .strip_prefix(ENC_PREFIX)
        .and_then(|rest| rest.strip_suffix(ENC_SUFFIX))
        .ok_or_else(|| SecretsError::decryption(PathBuf::new(), "not an encrypted value"))?;

    let ciphertext = STANDARD
        .decode(payload)
        .map_err(|e| SecretsError::decryption(PathBuf::new(), format!("invalid base64: {}", e)))?;
    let plain = age::decrypt(identity, &ciphertext)
        .map_err(|e| SecretsError::decryption(PathBuf::new(), e.to_string()))?;

    String::from_utf8(plain)
        .map_err(|e| SecretsError::decryption(PathBuf::new(), format!("invalid UTF-8: {}", e)))
}

/// Encrypt every string leaf
pub fn encrypt_tree(plain: &Value, recipient: &x25519::Recipient) -> Result<Value> {
    map_leaves(plain, &mut |leaf| encrypt_value(leaf, recipient))
}

/// Decrypt every encrypted leaf
///
/// Strings that are not `ENC[...]` values are left as they are. Any leaf
/// that fails to decrypt aborts the whole operation.
pub fn decrypt_tree(encrypted: &Value, identity: &x25519::Identity) -> Result<Value> {
    map_leaves(encrypted, &mut |leaf| {
        if is_encrypted(leaf) {
            decrypt_value(leaf, identity)
        } else {
            Ok(leaf.to_string())
        }
    })
}

/// Encrypt `plain`, reusing ciphertext from `previous` for unchanged leaves
///
/// A leaf keeps its previous ciphertext byte-for-byte when the previous
/// value at the same path decrypts to the same plaintext. New, changed and
/// undecryptable leaves are encrypted fresh; keys that only exist in
/// `previous` are dropped.
pub fn merge_and_encrypt(
    plain: &Value,
    previous: Option<&Value>,
    identity: &x25519::Identity,
) -> Result<Value> {
    let recipient = identity.to_public();
    merge_node(plain, previous, identity, &recipient)
}

fn merge_node(
    plain: &Value,
    previous: Option<&Value>,
    identity: &x25519::Identity,
    recipient: &x25519::Recipient,
) -> Result<Value> {
    match plain {
        Value::String(text) => {
            if let Some(Value::String(old)) = previous {
                match decrypt_value(old, identity) {
                    Ok(decrypted) if decrypted == *text => return Ok(Value::String(old.clone())),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "re-encrypting undecryptable value"),
                }
            }
            Ok(Value::String(encrypt_value(text, recipient)?))
        }
        Value::Mapping(map) => {
            let old = previous.and_then(Value::as_mapping);
            let mut out = Mapping::new();
            for (key, value) in map {
                let prev = old.and_then(|m| m.get(key));
                out.insert(key.clone(), merge_node(value, prev, identity, recipient)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => {
            let old = previous.and_then(Value::as_sequence);
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    merge_node(item, old.and_then(|s| s.get(i)), identity, recipient)
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence)
        }
        Value::Tagged(tagged) => {
            let old = match previous {
                Some(Value::Tagged(old)) if old.tag == tagged.tag => Some(&old.value),
                _ => None,
            };
            Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag.clone(),
                value: merge_node(&tagged.value, old, identity, recipient)?,
            })))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn map_leaves<F>(value: &Value, f: &mut F) -> Result<Value>
where
    F: FnMut(&str) -> Result<String>,
{
    match value {
        Value::String(text) => Ok(Value::String(f(text)?)),
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (key, item) in map {
                out.insert(key.clone(), map_leaves(item, f)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => items
            .iter()
            .map(|item| map_leaves(item, f))
            .collect::<Result<Vec<_>>>()
            .map(Value::Sequence),
        Value::Tagged(tagged) => Ok(Value::Tagged(Box::new(TaggedValue {
            tag: tagged.tag.clone(),
            value: map_leaves(&tagged.value, f)?,
        }))),
        scalar => Ok(scalar.clone()),
    }
}
