//! Encrypted secrets files of a talm project
//!
//! Each managed file has a plaintext form (`secrets.yaml`) and an
//! encrypted one (`secrets.encrypted.yaml`) that is safe to commit. Writes
//! go through a temporary file and a rename, so a failed operation leaves
//! the previous encrypted file untouched.

use serde_yaml::Value;
use std::path::{Path, PathBuf};

use talm_core::{FileBundleProvider, SecretsBundle, SecretsBundleProvider};
use talm_core::fsutil::{write_atomic, write_private};

use crate::error::{Result, SecretsError};
use crate::key::AgeKey;
use crate::tree::{decrypt_tree, encrypt_tree, merge_and_encrypt};

/// Default key file name, relative to the project root
pub const KEY_FILE: &str = "talm.key";

/// A plaintext file and its encrypted counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    pub plain: PathBuf,
    pub encrypted: PathBuf,
}

impl ManagedFile {
    pub fn new(plain: impl Into<PathBuf>, encrypted: impl Into<PathBuf>) -> Self {
        Self {
            plain: plain.into(),
            encrypted: encrypted.into(),
        }
    }
}

/// What `encrypt` did to a managed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptOutcome {
    Written,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct SecretsStore {
    root: PathBuf,
    key_path: PathBuf,
}

impl SecretsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let key_path = root.join(KEY_FILE);
        Self { root, key_path }
    }

    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = key_path.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// `secrets.yaml`, `talosconfig` and `kubeconfig` with their encrypted forms
    pub fn managed_files(&self) -> Vec<ManagedFile> {
        [
            ("secrets.yaml", "secrets.encrypted.yaml"),
            ("talosconfig", "talosconfig.encrypted"),
            ("kubeconfig", "kubeconfig.encrypted"),
        ]
        .into_iter()
        .map(|(plain, encrypted)| ManagedFile::new(self.root.join(plain), self.root.join(encrypted)))
        .collect()
    }

    /// The `secrets.yaml` pair
    pub fn secrets_file(&self) -> ManagedFile {
        ManagedFile::new(
            self.root.join("secrets.yaml"),
            self.root.join("secrets.encrypted.yaml"),
        )
    }

    pub fn load_key(&self) -> Result<AgeKey> {
        AgeKey::load(&self.key_path)
    }

    /// Encrypt one file, keeping ciphertext of unchanged leaves
    ///
    /// The key is generated on first use.
    pub fn encrypt(&self, file: &ManagedFile) -> Result<EncryptOutcome> {
        let plain = read_yaml(&file.plain)?;
        self.write_encrypted(file, &plain)
    }

    fn write_encrypted(&self, file: &ManagedFile, plain: &Value) -> Result<EncryptOutcome> {
        let (key, created) = AgeKey::load_or_generate(&self.key_path)?;

        let previous_text = if created {
            None
        } else {
            read_optional(&file.encrypted)?
        };
        let previous = match &previous_text {
            Some(text) => Some(parse_yaml(&file.encrypted, text)?),
            None => None,
        };

        let encrypted = merge_and_encrypt(plain, previous.as_ref(), key.identity())?;
        let output = to_yaml(&file.encrypted, &encrypted)?;

        if previous_text.as_deref() == Some(output.as_str()) {
            tracing::debug!(path = %file.encrypted.display(), "encrypted file unchanged");
            return Ok(EncryptOutcome::Unchanged);
        }

        write_atomic(&file.encrypted, output.as_bytes())?;
        tracing::debug!(path = %file.encrypted.display(), "wrote encrypted file");
        Ok(EncryptOutcome::Written)
    }

    /// Decrypt one file in memory
    pub fn decrypt_to_string(&self, file: &ManagedFile) -> Result<String> {
        let key = self.load_key()?;
        let encrypted = read_yaml(&file.encrypted)?;
        let plain = decrypt_tree(&encrypted, key.identity()).map_err(|e| e.at(&file.encrypted))?;
        to_yaml(&file.plain, &plain)
    }

    /// Decrypt one file and write its plaintext form, readable only by the owner
    pub fn decrypt(&self, file: &ManagedFile) -> Result<()> {
        let plain = self.decrypt_to_string(file)?;
        write_private(&file.plain, plain.as_bytes())?;
        tracing::debug!(path = %file.plain.display(), "wrote decrypted file");
        Ok(())
    }

    /// Plaintext contents, decrypting on the fly when only the encrypted file exists
    pub fn read_plain(&self, file: &ManagedFile) -> Result<String> {
        if let Some(text) = read_optional(&file.plain)? {
            return Ok(text);
        }
        if file.encrypted.exists() {
            tracing::debug!(path = %file.encrypted.display(), "decrypting transparently");
            return self.decrypt_to_string(file);
        }
        Err(SecretsError::io(
            &file.plain,
            std::io::Error::new(std::io::ErrorKind::NotFound, "neither plain nor encrypted file exists"),
        ))
    }

    /// Secrets bundle from `secrets.yaml` or its encrypted form
    pub fn load_bundle(&self) -> Result<SecretsBundle> {
        let text = self.read_plain(&self.secrets_file())?;
        Ok(SecretsBundle::from_yaml(&text)?)
    }

    /// Persist an updated bundle in whichever forms the project keeps
    ///
    /// A plaintext `secrets.yaml` is rewritten when present (or when the
    /// project has neither form); an existing encrypted file is re-encrypted
    /// from memory, so a project holding only the encrypted form never gets
    /// a plaintext copy. Returns the paths written.
    pub fn save_bundle(&self, bundle: &SecretsBundle) -> Result<Vec<PathBuf>> {
        let file = self.secrets_file();
        let has_plain = file.plain.exists();
        let has_encrypted = file.encrypted.exists();
        let mut written = Vec::new();

        if has_plain || !has_encrypted {
            FileBundleProvider::new(&file.plain).save(bundle)?;
            written.push(file.plain.clone());
        }
        if has_encrypted {
            let tree = parse_yaml(&file.plain, &bundle.to_yaml()?)?;
            if self.write_encrypted(&file, &tree)? == EncryptOutcome::Written {
                written.push(file.encrypted.clone());
            }
        }
        Ok(written)
    }

    /// Where the previous key is kept while a rotation is in progress
    pub fn backup_key_path(&self) -> PathBuf {
        let mut name = self.key_path.as_os_str().to_os_string();
        name.push(".old");
        PathBuf::from(name)
    }

    /// Replace the key and re-encrypt every existing encrypted file
    ///
    /// All files are decrypted with the old key and re-encrypted with the
    /// new one in memory before anything is written. The old key stays on
    /// disk as `<key>.old` until every file has been rewritten. If a file
    /// write fails, the files already rewritten and the old key are put
    /// back; the backup is only removed once nothing depends on it.
    pub fn rotate_keys(&self) -> Result<Vec<PathBuf>> {
        self.rotate_keys_with(|path, contents| Ok(write_atomic(path, contents)?))
    }

    fn rotate_keys_with<W>(&self, mut write: W) -> Result<Vec<PathBuf>>
    where
        W: FnMut(&Path, &[u8]) -> Result<()>,
    {
        let old_key = self.load_key()?;
        let old_key_file = std::fs::read(&self.key_path)
            .map_err(|e| SecretsError::io(&self.key_path, e))?;

        let mut decrypted = Vec::new();
        for file in self.managed_files() {
            let Some(text) = read_optional(&file.encrypted)? else {
                continue;
            };
            let tree = parse_yaml(&file.encrypted, &text)?;
            let plain =
                decrypt_tree(&tree, old_key.identity()).map_err(|e| e.at(&file.encrypted))?;
            decrypted.push((file.encrypted, text, plain));
        }

        let new_key = AgeKey::generate();
        let recipient = new_key.recipient();
        let staged = decrypted
            .into_iter()
            .map(|(path, original, plain)| {
                let encrypted = encrypt_tree(&plain, &recipient)?;
                let text = to_yaml(&path, &encrypted)?;
                Ok(StagedFile {
                    path,
                    original,
                    text,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let backup = self.backup_key_path();
        write_private(&backup, &old_key_file)?;
        if let Err(e) = new_key.save(&self.key_path) {
            remove_backup(&backup);
            return Err(e);
        }

        let mut written = Vec::with_capacity(staged.len());
        for (i, file) in staged.iter().enumerate() {
            if let Err(e) = write(&file.path, file.text.as_bytes()) {
                tracing::warn!(path = %file.path.display(), error = %e, "rotation failed, restoring previous key");
                self.restore(&mut write, &staged[..i], &old_key_file, &backup);
                return Err(e);
            }
            written.push(file.path.clone());
        }

        remove_backup(&backup);
        tracing::info!(public_key = %new_key.public_key(), "rotated age key");
        Ok(written)
    }

    /// Put back the old ciphertext and the old key after a failed rotation
    ///
    /// When a rewritten file cannot be restored the new key stays in place
    /// for it and the old key stays in the backup file for the others.
    fn restore<W>(&self, write: &mut W, rewritten: &[StagedFile], old_key_file: &[u8], backup: &Path)
    where
        W: FnMut(&Path, &[u8]) -> Result<()>,
    {
        let mut restored = true;
        for file in rewritten {
            if let Err(e) = write(&file.path, file.original.as_bytes()) {
                tracing::warn!(path = %file.path.display(), error = %e, "could not restore encrypted file");
                restored = false;
            }
        }
        if !restored {
            tracing::warn!(
                key = %self.key_path.display(),
                backup = %backup.display(),
                "rotation left files under both keys"
            );
            return;
        }

        match write_private(&self.key_path, old_key_file) {
            Ok(()) => remove_backup(backup),
            Err(e) => tracing::warn!(
                path = %self.key_path.display(),
                backup = %backup.display(),
                error = %e,
                "could not restore key file, previous key kept in backup"
            ),
        }
    }
}

/// Re-encrypted contents waiting to replace `original`
struct StagedFile {
    path: PathBuf,
    original: String,
    text: String,
}

fn remove_backup(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove backup key");
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SecretsError::io(path, e)),
    }
}

fn parse_yaml(path: &Path, text: &str) -> Result<Value> {
    serde_yaml::from_str(text).map_err(|source| SecretsError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn read_yaml(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| SecretsError::io(path, e))?;
    parse_yaml(path, &text)
}

fn to_yaml(path: &Path, value: &Value) -> Result<String> {
    serde_yaml::to_string(value).map_err(|source| SecretsError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}
