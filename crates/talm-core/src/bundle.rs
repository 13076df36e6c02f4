//! Cluster secrets bundle
//!
//! The bundle holds the cluster-wide PKI (OS, Kubernetes, etcd and aggregator
//! CAs, the service account key) and bootstrap tokens. It is produced once at
//! cluster creation by the node-management tooling; talm only reads named
//! fields from it and, when rotating a CA, replaces that field in place.
//!
//! On disk it uses the Talos `secrets.yaml` layout:
//!
//! ```yaml
//! cluster:
//!   id: ...
//!   secret: ...
//! secrets:
//!   bootstraptoken: abcdef.0123456789abcdef
//!   secretboxencryptionsecret: ...
//! trustdinfo:
//!   token: ...
//! certs:
//!   etcd: {crt: ..., key: ...}
//!   k8s: {crt: ..., key: ...}
//!   k8saggregator: {crt: ..., key: ...}
//!   k8sserviceaccount: {key: ...}
//!   os: {crt: ..., key: ...}
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::fsutil;
use crate::machine::VersionContract;

/// Base64-encoded PEM certificate and private key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAndKey {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crt: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

impl CertificateAndKey {
    pub fn new(crt: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            crt: crt.into(),
            key: key.into(),
        }
    }

    /// Certificate only, as handed to worker nodes
    pub fn public_only(&self) -> Self {
        Self {
            crt: self.crt.clone(),
            key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSecrets {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tokens {
    #[serde(rename = "bootstraptoken")]
    pub bootstrap_token: String,

    #[serde(rename = "secretboxencryptionsecret")]
    pub secretbox_encryption_secret: String,

    #[serde(
        rename = "aescbcencryptionsecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub aescbc_encryption_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustdInfo {
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Certs {
    pub etcd: CertificateAndKey,

    pub k8s: CertificateAndKey,

    #[serde(rename = "k8saggregator")]
    pub k8s_aggregator: CertificateAndKey,

    #[serde(rename = "k8sserviceaccount")]
    pub k8s_service_account: CertificateAndKey,

    pub os: CertificateAndKey,
}

/// Which CA a rotation replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaKind {
    Os,
    Kubernetes,
}

impl std::fmt::Display for CaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Os => f.write_str("os"),
            Self::Kubernetes => f.write_str("kubernetes"),
        }
    }
}

impl std::str::FromStr for CaKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "os" | "talos" => Ok(Self::Os),
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            other => Err(CoreError::SecretsBundle {
                message: format!("unknown CA '{}', expected os or kubernetes", other),
            }),
        }
    }
}

/// Cluster PKI and tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsBundle {
    pub cluster: ClusterSecrets,

    pub secrets: Tokens,

    #[serde(rename = "trustdinfo")]
    pub trustd_info: TrustdInfo,

    pub certs: Certs,
}

impl SecretsBundle {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let bundle: SecretsBundle = serde_yaml::from_str(yaml)?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::file(path, e))?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check that the fields the assembler relies on are present
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("certs.os.crt", &self.certs.os.crt),
            ("certs.os.key", &self.certs.os.key),
            ("certs.k8s.crt", &self.certs.k8s.crt),
            ("certs.k8s.key", &self.certs.k8s.key),
            ("secrets.bootstraptoken", &self.secrets.bootstrap_token),
            ("trustdinfo.token", &self.trustd_info.token),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::SecretsBundle {
                message: format!("missing required fields: {}", missing.join(", ")),
            })
        }
    }

    pub fn ca(&self, kind: CaKind) -> &CertificateAndKey {
        match kind {
            CaKind::Os => &self.certs.os,
            CaKind::Kubernetes => &self.certs.k8s,
        }
    }

    /// Replace one CA, leaving every other field untouched
    pub fn replace_ca(&mut self, kind: CaKind, pair: CertificateAndKey) -> Result<()> {
        if pair.crt.trim().is_empty() || pair.key.trim().is_empty() {
            return Err(CoreError::SecretsBundle {
                message: format!("replacement {} CA needs both crt and key", kind),
            });
        }

        match kind {
            CaKind::Os => self.certs.os = pair,
            CaKind::Kubernetes => self.certs.k8s = pair,
        }
        Ok(())
    }
}

/// Produces a fresh bundle; implemented by the node-management client
pub trait BundleGenerator {
    fn generate(&self, contract: Option<VersionContract>) -> Result<SecretsBundle>;
}

/// Where the engine obtains the secrets bundle from
pub trait SecretsBundleProvider {
    fn load_or_generate(&self, contract: Option<VersionContract>) -> Result<SecretsBundle>;

    fn save(&self, bundle: &SecretsBundle) -> Result<()>;
}

/// Bundle stored in a YAML file, generated on first use when a generator is set
pub struct FileBundleProvider {
    path: PathBuf,
    generator: Option<Box<dyn BundleGenerator>>,
}

impl FileBundleProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn BundleGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretsBundleProvider for FileBundleProvider {
    fn load_or_generate(&self, contract: Option<VersionContract>) -> Result<SecretsBundle> {
        if self.path.exists() {
            tracing::debug!(path = %self.path.display(), "loading secrets bundle");
            return SecretsBundle::from_file(&self.path);
        }

        let Some(generator) = &self.generator else {
            return Err(CoreError::SecretsBundle {
                message: format!(
                    "{} does not exist and no bundle generator is configured",
                    self.path.display()
                ),
            });
        };

        let bundle = generator.generate(contract)?;
        bundle.validate()?;
        self.save(&bundle)?;
        tracing::debug!(path = %self.path.display(), "generated secrets bundle");
        Ok(bundle)
    }

    fn save(&self, bundle: &SecretsBundle) -> Result<()> {
        fsutil::write_private(&self.path, bundle.to_yaml()?.as_bytes())
    }
}
