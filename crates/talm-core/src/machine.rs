//! Machine roles and Talos version contracts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineRole {
    #[serde(alias = "init")]
    ControlPlane,
    Worker,
}

impl MachineRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ControlPlane => "controlplane",
            Self::Worker => "worker",
        }
    }

    pub const fn is_control_plane(&self) -> bool {
        matches!(self, Self::ControlPlane)
    }
}

impl fmt::Display for MachineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineRole {
    type Err = CoreError;

    /// `init` is the legacy name of the first control plane node.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "controlplane" | "control-plane" | "init" => Ok(Self::ControlPlane),
            "worker" | "join" => Ok(Self::Worker),
            other => Err(CoreError::UnknownMachineType(other.to_string())),
        }
    }
}

/// Talos version contract (`v1.9`, `1.9`, `v1.9.3`)
///
/// Only major and minor matter: the contract selects which config
/// features a generated configuration may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionContract {
    pub major: u64,
    pub minor: u64,
}

impl VersionContract {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    pub fn parse(contract: &str) -> Result<Self, CoreError> {
        let trimmed = contract.trim().trim_start_matches('v');
        let invalid = |message: String| CoreError::InvalidContract {
            contract: contract.to_string(),
            message,
        };

        if trimmed.is_empty() {
            return Err(invalid("empty version".to_string()));
        }

        let normalized = match trimmed.matches('.').count() {
            0 => format!("{}.0.0", trimmed),
            1 => format!("{}.0", trimmed),
            _ => trimmed.to_string(),
        };

        let version =
            semver::Version::parse(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self::new(version.major, version.minor))
    }

    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        *self >= Self::new(major, minor)
    }

    pub fn stable_hostname(&self) -> bool {
        self.at_least(1, 5)
    }

    pub fn apid_check_ext_key_usage(&self) -> bool {
        self.at_least(1, 3)
    }

    pub fn disk_quota_support(&self) -> bool {
        self.at_least(1, 5)
    }

    pub fn kube_prism(&self) -> bool {
        self.at_least(1, 6)
    }

    pub fn host_dns(&self) -> bool {
        self.at_least(1, 7)
    }
}

impl fmt::Display for VersionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl FromStr for VersionContract {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_role_parse() {
        assert_eq!("controlplane".parse::<MachineRole>().unwrap(), MachineRole::ControlPlane);
        assert_eq!("init".parse::<MachineRole>().unwrap(), MachineRole::ControlPlane);
        assert_eq!("Worker".parse::<MachineRole>().unwrap(), MachineRole::Worker);
        assert!("master".parse::<MachineRole>().is_err());
    }

    #[test]
    fn test_machine_role_serde() {
        let role: MachineRole = serde_yaml::from_str("init").unwrap();
        assert_eq!(role, MachineRole::ControlPlane);
        assert_eq!(serde_yaml::to_string(&MachineRole::Worker).unwrap().trim(), "worker");
    }

    #[test]
    fn test_contract_parse() {
        assert_eq!(VersionContract::parse("v1.9").unwrap(), VersionContract::new(1, 9));
        assert_eq!(VersionContract::parse("1.7.4").unwrap(), VersionContract::new(1, 7));
        assert_eq!(VersionContract::parse("v2").unwrap(), VersionContract::new(2, 0));
        assert_eq!(VersionContract::new(1, 10).to_string(), "v1.10");
    }

    #[test]
    fn test_contract_parse_invalid() {
        assert!(VersionContract::parse("").is_err());
        assert!(VersionContract::parse("latest").is_err());
        assert!(VersionContract::parse("v1.x").is_err());
    }

    #[test]
    fn test_contract_features() {
        let old = VersionContract::new(1, 4);
        let new = VersionContract::new(1, 8);

        assert!(old.apid_check_ext_key_usage());
        assert!(!old.stable_hostname());
        assert!(!old.kube_prism());
        assert!(new.kube_prism());
        assert!(new.host_dns());
        assert!(VersionContract::new(2, 0).at_least(1, 9));
    }
}
