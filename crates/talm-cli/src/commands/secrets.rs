//! Secrets commands - encrypt, decrypt and rotate the project key

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use console::style;
use std::path::{Path, PathBuf};

use talm_core::{CaKind, CertificateAndKey};
use talm_secrets::{EncryptOutcome, SecretsStore};

use crate::error::{CliError, Result};

fn store(root: &Path, key: Option<&Path>) -> SecretsStore {
    let store = SecretsStore::new(root);
    match key {
        Some(key) => store.with_key_path(key),
        None => store,
    }
}

/// Encrypt every managed plaintext file present in the project
pub fn encrypt(root: &Path, key: Option<&Path>) -> Result<()> {
    let store = store(root, key);
    let mut found = false;

    for file in store.managed_files() {
        if !file.plain.exists() {
            continue;
        }
        found = true;
        match store.encrypt(&file)? {
            EncryptOutcome::Written => {
                println!("{} {}", style("wrote").green(), file.encrypted.display())
            }
            EncryptOutcome::Unchanged => {
                println!("{} {}", style("unchanged").dim(), file.encrypted.display())
            }
        }
    }

    if !found {
        return Err(CliError::input_with_help(
            format!("nothing to encrypt in {}", root.display()),
            "expected secrets.yaml, talosconfig or kubeconfig",
        ));
    }
    Ok(())
}

/// Decrypt every managed encrypted file present in the project
pub fn decrypt(root: &Path, key: Option<&Path>) -> Result<()> {
    let store = store(root, key);
    let mut found = false;

    for file in store.managed_files() {
        if !file.encrypted.exists() {
            continue;
        }
        found = true;
        store.decrypt(&file)?;
        println!("{} {}", style("wrote").green(), file.plain.display());
    }

    if !found {
        return Err(CliError::input(format!(
            "no encrypted files in {}",
            root.display()
        )));
    }
    Ok(())
}

/// Generate a new key and re-encrypt every encrypted file with it
pub fn rotate_keys(root: &Path, key: Option<&Path>) -> Result<()> {
    let store = store(root, key);
    let rewritten: Vec<PathBuf> = store.rotate_keys()?;

    println!("{} {}", style("wrote").green(), store.key_path().display());
    for path in rewritten {
        println!("{} {}", style("wrote").green(), path.display());
    }
    Ok(())
}

/// Bundle encoding of a certificate or key file: PEM input is base64-encoded,
/// anything else is taken as already encoded
fn read_pem(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))?;
    let content = content.trim();
    if content.starts_with("-----BEGIN") {
        Ok(STANDARD.encode(format!("{}\n", content)))
    } else {
        Ok(content.to_string())
    }
}

/// Replace the OS or Kubernetes CA in the project's secrets bundle
pub fn rotate_ca(
    root: &Path,
    key: Option<&Path>,
    ca: CaKind,
    crt: &Path,
    ca_key: &Path,
) -> Result<()> {
    let store = store(root, key);
    let mut bundle = store.load_bundle()?;
    bundle.replace_ca(ca, CertificateAndKey::new(read_pem(crt)?, read_pem(ca_key)?))?;

    for path in store.save_bundle(&bundle)? {
        println!("{} {}", style("wrote").green(), path.display());
    }
    println!(
        "{}",
        style(format!("{} CA replaced, re-render node configs to pick it up", ca)).dim()
    );
    Ok(())
}
