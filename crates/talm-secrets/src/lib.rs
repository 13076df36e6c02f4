//! talm Secrets - Incremental age encryption of YAML secrets
//!
//! String leaves are encrypted one by one, so re-encrypting an unchanged
//! file reproduces it byte for byte and a changed secret shows up as a
//! single-line diff.
//!
//! - [`key`]: the `talm.key` key file
//! - [`tree`]: encrypt, decrypt and merge-aware re-encrypt of YAML trees
//! - [`store`]: project-level files, transparent decryption, key rotation

pub mod error;
pub mod key;
pub mod store;
pub mod tree;

pub use error::{Result, SecretsError};
pub use key::{AgeKey, SECRET_KEY_PREFIX};
pub use store::{EncryptOutcome, KEY_FILE, ManagedFile, SecretsStore};
pub use tree::{
    decrypt_tree, decrypt_value, encrypt_tree, encrypt_value, is_encrypted, merge_and_encrypt,
};
