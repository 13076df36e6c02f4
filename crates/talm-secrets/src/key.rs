//! age key file
//!
//! ```text
//! # created: 2024-05-01T10:00:00Z
//! # public key: age1...
//! AGE-SECRET-KEY-1...
//! ```

use age::secrecy::ExposeSecret;
use age::x25519;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

use crate::error::{Result, SecretsError};

/// Prefix of the private key line
pub const SECRET_KEY_PREFIX: &str = "AGE-SECRET-KEY-";

const CREATED_PREFIX: &str = "# created:";
const PUBLIC_KEY_PREFIX: &str = "# public key:";

/// One x25519 keypair
#[derive(Clone)]
pub struct AgeKey {
    identity: x25519::Identity,
    created: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeKey")
            .field("public_key", &self.public_key())
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl AgeKey {
    pub fn generate() -> Self {
        Self {
            identity: x25519::Identity::generate(),
            created: Some(Utc::now()),
        }
    }

    /// Parse key file contents; the header lines are optional
    pub fn parse(text: &str) -> Result<Self> {
        let mut created = None;
        let mut identity = None;

        for line in text.lines().map(str::trim) {
            if let Some(stamp) = line.strip_prefix(CREATED_PREFIX) {
                created = DateTime::parse_from_rfc3339(stamp.trim())
                    .map(|t| t.with_timezone(&Utc))
                    .ok();
            } else if line.starts_with(SECRET_KEY_PREFIX) {
                let parsed = line
                    .parse::<x25519::Identity>()
                    .map_err(|e| SecretsError::InvalidKey {
                        message: e.to_string(),
                    })?;
                identity = Some(parsed);
            }
        }

        let identity = identity.ok_or_else(|| SecretsError::InvalidKey {
            message: format!("no line starting with {}", SECRET_KEY_PREFIX),
        })?;
        Ok(Self { identity, created })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecretsError::KeyNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(SecretsError::io(path, e)),
        };
        tracing::debug!(path = %path.display(), "loaded age key");
        Self::parse(&text)
    }

    /// Load the key at `path`, generating and saving one when absent
    ///
    /// The flag is true when a new key was written.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool)> {
        match Self::load(path) {
            Ok(key) => Ok((key, false)),
            Err(SecretsError::KeyNotFound { .. }) => {
                let key = Self::generate();
                key.save(path)?;
                tracing::info!(path = %path.display(), "generated new age key");
                Ok((key, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Write the key file, readable only by the owner
    pub fn save(&self, path: &Path) -> Result<()> {
        talm_core::fsutil::write_private(path, self.to_file_contents().as_bytes())?;
        Ok(())
    }

    pub fn to_file_contents(&self) -> String {
        let created = self.created.unwrap_or_else(Utc::now);
        format!(
            "{} {}\n{} {}\n{}\n",
            CREATED_PREFIX,
            created.to_rfc3339_opts(SecondsFormat::Secs, true),
            PUBLIC_KEY_PREFIX,
            self.public_key(),
            self.identity.to_string().expose_secret()
        )
    }

    pub fn identity(&self) -> &x25519::Identity {
        &self.identity
    }

    pub fn recipient(&self) -> x25519::Recipient {
        self.identity.to_public()
    }

    /// `age1...` recipient string
    pub fn public_key(&self) -> String {
        self.recipient().to_string()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}
