//! Machine configuration assembly
//!
//! The final configuration is built in three layers:
//!
//! 1. generated defaults: `version`, PKI and tokens from the secrets bundle,
//!    Kubernetes component images, contract-gated feature flags
//! 2. the rendered base document
//! 3. user patches, in command-line order
//!
//! Mappings merge recursively. Anything else at a path is replaced
//! wholesale by the later layer, so a patch can always override a generated
//! PKI field. A `$patch: delete` value removes the key.

use serde_yaml::{Mapping, Value};
use std::str::FromStr;

use talm_core::{CertificateAndKey, MachineRole, SecretsBundle, VersionContract};

use crate::classify::{ConfigPatch, ExtraDocument, classify};
use crate::error::{ConfigError, Result};
use crate::yamltools::diff::is_delete_marker;

/// Contract used when none is configured
pub const DEFAULT_TALOS_VERSION: &str = "v1.9";

/// Kubernetes version used when none is configured
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.31.1";

const KUBELET_IMAGE: &str = "ghcr.io/siderolabs/kubelet";
const K8S_REGISTRY: &str = "registry.k8s.io";

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Talos version contract, e.g. `v1.9`
    pub talos_version: Option<String>,
    /// Kubernetes version, with or without a leading `v`
    pub kubernetes_version: Option<String>,
}

impl AssembleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn talos_version(mut self, version: impl Into<String>) -> Self {
        self.talos_version = Some(version.into());
        self
    }

    pub fn kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = Some(version.into());
        self
    }
}

/// Final machine configuration for one node
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfiguration {
    pub role: MachineRole,
    pub config: Value,
    /// Non-machine documents carried along with the config
    pub extras: Vec<ExtraDocument>,
}

impl MachineConfiguration {
    /// The machine config document alone
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.config)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_yaml()?.into_bytes())
    }

    /// The machine config followed by every extra document, as one stream
    pub fn to_multi_document_yaml(&self) -> Result<String> {
        let mut out = self.to_yaml()?;
        for extra in &self.extras {
            out.push_str("---\n");
            out.push_str(extra.raw.trim_matches('\n'));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Assemble the rendered base, ordered patches and the secrets bundle
///
/// Fails when no layer sets a valid `machine.type` or when the version
/// contract cannot be parsed.
pub fn assemble(
    base: &str,
    patches: &[ConfigPatch],
    bundle: &SecretsBundle,
    options: &AssembleOptions,
) -> Result<MachineConfiguration> {
    let base = classify(&[base]);
    let layers: Vec<&Value> = base
        .patches
        .iter()
        .chain(patches)
        .map(|patch| &patch.tree)
        .collect();

    let role = machine_role(&layers)?;

    let contract_text = options
        .talos_version
        .as_deref()
        .unwrap_or(DEFAULT_TALOS_VERSION);
    let contract = VersionContract::parse(contract_text)
        .map_err(|e| ConfigError::assembly(e.to_string()))?;

    let kubernetes = options
        .kubernetes_version
        .as_deref()
        .unwrap_or(DEFAULT_KUBERNETES_VERSION)
        .trim()
        .trim_start_matches('v');
    if kubernetes.is_empty() {
        return Err(ConfigError::assembly("kubernetes version is empty"));
    }

    tracing::debug!(
        role = %role,
        contract = %contract,
        kubernetes,
        layers = layers.len(),
        "assembling machine config"
    );

    let mut config = defaults(role, contract, kubernetes, bundle);
    for layer in &layers {
        apply_patch(&mut config, layer);
    }

    Ok(MachineConfiguration {
        role,
        config,
        extras: base.extras,
    })
}

/// Role set by the last layer defining `machine.type`
fn machine_role(layers: &[&Value]) -> Result<MachineRole> {
    let mut merged = Value::Mapping(Mapping::new());
    for layer in layers {
        apply_patch(&mut merged, layer);
    }

    let role = merged
        .get("machine")
        .and_then(|machine| machine.get("type"))
        .ok_or_else(|| ConfigError::assembly("machine.type is not set"))?;
    let role = role
        .as_str()
        .ok_or_else(|| ConfigError::assembly("machine.type must be a string"))?;

    MachineRole::from_str(role).map_err(|e| ConfigError::assembly(e.to_string()))
}

/// Merge `patch` into `target`
///
/// Mappings merge key by key. Any other value replaces the target
/// wholesale. Keys whose patch value is `$patch: delete` are removed.
pub fn apply_patch(target: &mut Value, patch: &Value) {
    let (true, Some(patch_map)) = (target.is_mapping(), patch.as_mapping()) else {
        *target = without_directives(patch);
        return;
    };
    let Some(target_map) = target.as_mapping_mut() else {
        return;
    };

    for (key, value) in patch_map {
        if is_delete_marker(value) {
            target_map.remove(key);
            continue;
        }
        match target_map.get_mut(key) {
            Some(existing) => apply_patch(existing, value),
            None => {
                target_map.insert(key.clone(), without_directives(value));
            }
        }
    }
}

fn without_directives(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .filter(|(_, v)| !is_delete_marker(v))
                .map(|(k, v)| (k.clone(), without_directives(v)))
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.iter().map(without_directives).collect()),
        other => other.clone(),
    }
}

fn mapping<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Mapping(
        entries
            .into_iter()
            .map(|(key, value)| (Value::from(key), value))
            .collect(),
    )
}

fn pair(cert: &CertificateAndKey) -> Value {
    let mut map = Mapping::new();
    if !cert.crt.is_empty() {
        map.insert("crt".into(), cert.crt.clone().into());
    }
    if !cert.key.is_empty() {
        map.insert("key".into(), cert.key.clone().into());
    }
    Value::Mapping(map)
}

fn image(repository: &str, kubernetes: &str) -> Value {
    Value::from(format!("{}:v{}", repository, kubernetes))
}

fn features(contract: VersionContract) -> Value {
    let mut features = Mapping::new();
    features.insert("rbac".into(), true.into());
    if contract.stable_hostname() {
        features.insert("stableHostname".into(), true.into());
    }
    if contract.apid_check_ext_key_usage() {
        features.insert("apidCheckExtKeyUsage".into(), true.into());
    }
    if contract.disk_quota_support() {
        features.insert("diskQuotaSupport".into(), true.into());
    }
    if contract.kube_prism() {
        features.insert(
            "kubePrism".into(),
            mapping([("enabled", true.into()), ("port", 7445.into())]),
        );
    }
    if contract.host_dns() {
        let mut host_dns = Mapping::new();
        host_dns.insert("enabled".into(), true.into());
        if contract.at_least(1, 8) {
            host_dns.insert("forwardKubeDNSToHost".into(), true.into());
        }
        features.insert("hostDNS".into(), Value::Mapping(host_dns));
    }
    Value::Mapping(features)
}

/// Generated layer: PKI, tokens, images and feature flags
fn defaults(
    role: MachineRole,
    contract: VersionContract,
    kubernetes: &str,
    bundle: &SecretsBundle,
) -> Value {
    let control_plane = role.is_control_plane();
    let ca_for_role = |cert: &CertificateAndKey| {
        if control_plane {
            pair(cert)
        } else {
            pair(&cert.public_only())
        }
    };

    let machine = mapping([
        ("type", role.as_str().into()),
        ("token", bundle.trustd_info.token.clone().into()),
        ("ca", ca_for_role(&bundle.certs.os)),
        ("certSANs", Value::Sequence(Vec::new())),
        (
            "kubelet",
            mapping([
                ("image", image(KUBELET_IMAGE, kubernetes)),
                ("defaultRuntimeSeccompProfileEnabled", true.into()),
                ("disableManifestsDirectory", true.into()),
            ]),
        ),
        ("network", Value::Mapping(Mapping::new())),
        (
            "install",
            mapping([("disk", "/dev/sda".into()), ("wipe", false.into())]),
        ),
        ("features", features(contract)),
    ]);

    let mut cluster = Mapping::new();
    cluster.insert("id".into(), bundle.cluster.id.clone().into());
    cluster.insert("secret".into(), bundle.cluster.secret.clone().into());
    cluster.insert(
        "network".into(),
        mapping([
            ("dnsDomain", "cluster.local".into()),
            ("podSubnets", Value::Sequence(vec!["10.244.0.0/16".into()])),
            ("serviceSubnets", Value::Sequence(vec!["10.96.0.0/12".into()])),
        ]),
    );
    cluster.insert("token".into(), bundle.secrets.bootstrap_token.clone().into());
    cluster.insert("ca".into(), ca_for_role(&bundle.certs.k8s));

    if control_plane {
        cluster.insert(
            "secretboxEncryptionSecret".into(),
            bundle.secrets.secretbox_encryption_secret.clone().into(),
        );
        if let Some(aescbc) = &bundle.secrets.aescbc_encryption_secret {
            cluster.insert("aescbcEncryptionSecret".into(), aescbc.clone().into());
        }
        cluster.insert("aggregatorCA".into(), pair(&bundle.certs.k8s_aggregator));
        cluster.insert(
            "serviceAccount".into(),
            mapping([("key", bundle.certs.k8s_service_account.key.clone().into())]),
        );
        cluster.insert(
            "apiServer".into(),
            mapping([
                ("image", image(&format!("{}/kube-apiserver", K8S_REGISTRY), kubernetes)),
                ("certSANs", Value::Sequence(Vec::new())),
            ]),
        );
        cluster.insert(
            "controllerManager".into(),
            mapping([(
                "image",
                image(&format!("{}/kube-controller-manager", K8S_REGISTRY), kubernetes),
            )]),
        );
        cluster.insert(
            "proxy".into(),
            mapping([("image", image(&format!("{}/kube-proxy", K8S_REGISTRY), kubernetes))]),
        );
        cluster.insert(
            "scheduler".into(),
            mapping([("image", image(&format!("{}/kube-scheduler", K8S_REGISTRY), kubernetes))]),
        );
        cluster.insert("etcd".into(), mapping([("ca", pair(&bundle.certs.etcd))]));
    }

    mapping([
        ("version", "v1alpha1".into()),
        ("debug", false.into()),
        ("persist", true.into()),
        ("machine", machine),
        ("cluster", Value::Mapping(cluster)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> SecretsBundle {
        let mut bundle = SecretsBundle::default();
        bundle.cluster.id = "cluster-id".into();
        bundle.cluster.secret = "cluster-secret".into();
        bundle.secrets.bootstrap_token = "abcdef.0123456789abcdef".into();
        bundle.secrets.secretbox_encryption_secret = "secretbox".into();
        bundle.trustd_info.token = "trustd.token".into();
        bundle.certs.os = CertificateAndKey::new("os-crt", "os-key");
        bundle.certs.k8s = CertificateAndKey::new("k8s-crt", "k8s-key");
        bundle.certs.k8s_aggregator = CertificateAndKey::new("agg-crt", "agg-key");
        bundle.certs.k8s_service_account = CertificateAndKey::new("", "sa-key");
        bundle.certs.etcd = CertificateAndKey::new("etcd-crt", "etcd-key");
        bundle
    }

    fn patch(text: &str) -> ConfigPatch {
        ConfigPatch::parse("test", text).unwrap()
    }

    #[test]
    fn test_controlplane_defaults() {
        let base = "machine:\n  type: controlplane\ncluster:\n  clusterName: demo\n";
        let result = assemble(base, &[], &bundle(), &AssembleOptions::default()).unwrap();

        assert_eq!(result.role, MachineRole::ControlPlane);
        let config = &result.config;
        assert_eq!(config["version"], "v1alpha1");
        assert_eq!(config["machine"]["ca"]["key"], "os-key");
        assert_eq!(
            config["machine"]["kubelet"]["image"],
            "ghcr.io/siderolabs/kubelet:v1.31.1"
        );
        assert_eq!(
            config["cluster"]["apiServer"]["image"],
            "registry.k8s.io/kube-apiserver:v1.31.1"
        );
        assert_eq!(config["cluster"]["clusterName"], "demo");
        assert_eq!(config["cluster"]["serviceAccount"]["key"], "sa-key");
        assert_eq!(config["machine"]["features"]["hostDNS"]["enabled"], true);
    }

    #[test]
    fn test_worker_gets_certificates_only() {
        let result = assemble(
            "machine:\n  type: worker\n",
            &[],
            &bundle(),
            &AssembleOptions::default(),
        )
        .unwrap();

        let config = &result.config;
        assert_eq!(result.role, MachineRole::Worker);
        assert_eq!(config["machine"]["ca"]["crt"], "os-crt");
        assert!(config["machine"]["ca"].get("key").is_none());
        assert!(config["cluster"]["ca"].get("key").is_none());
        assert!(config["cluster"].get("aggregatorCA").is_none());
        assert!(config["cluster"].get("secretboxEncryptionSecret").is_none());
    }

    #[test]
    fn test_patches_apply_in_order() {
        let base = "machine:\n  type: worker\n  network:\n    hostname: base\n";
        let patches = [
            patch("machine:\n  network:\n    hostname: first\n    nameservers: [1.1.1.1]\n"),
            patch("machine:\n  network:\n    hostname: second\n"),
        ];
        let result = assemble(base, &patches, &bundle(), &AssembleOptions::default()).unwrap();

        let network = &result.config["machine"]["network"];
        assert_eq!(network["hostname"], "second");
        assert_eq!(network["nameservers"][0], "1.1.1.1");
    }

    #[test]
    fn test_shape_conflict_replaces_wholesale() {
        let base = "machine:\n  type: worker\n  certSANs: [a, b]\n";
        let patches = [patch("machine:\n  certSANs: [c]\n")];
        let result = assemble(base, &patches, &bundle(), &AssembleOptions::default()).unwrap();
        assert_eq!(
            result.config["machine"]["certSANs"],
            Value::Sequence(vec!["c".into()])
        );

        let patches = [patch("machine:\n  install: /dev/vda\n")];
        let result = assemble(base, &patches, &bundle(), &AssembleOptions::default()).unwrap();
        assert_eq!(result.config["machine"]["install"], "/dev/vda");
    }

    #[test]
    fn test_user_pki_override_wins() {
        let patches = [patch("machine:\n  ca:\n    crt: custom-crt\n    key: custom-key\n")];
        let result = assemble(
            "machine:\n  type: controlplane\n",
            &patches,
            &bundle(),
            &AssembleOptions::default(),
        )
        .unwrap();
        assert_eq!(result.config["machine"]["ca"]["crt"], "custom-crt");
        assert_eq!(result.config["machine"]["ca"]["key"], "custom-key");
    }

    #[test]
    fn test_delete_directive() {
        let patches = [patch("machine:\n  install:\n    $patch: delete\n  kubelet:\n    extraArgs:\n      a: b\n      c:\n        $patch: delete\n")];
        let result = assemble(
            "machine:\n  type: worker\n",
            &patches,
            &bundle(),
            &AssembleOptions::default(),
        )
        .unwrap();

        let machine = &result.config["machine"];
        assert!(machine.get("install").is_none());
        assert_eq!(machine["kubelet"]["extraArgs"]["a"], "b");
        assert!(machine["kubelet"]["extraArgs"].get("c").is_none());
    }

    #[test]
    fn test_role_from_patch() {
        let patches = [patch("machine:\n  type: controlplane\n")];
        let result = assemble("", &patches, &bundle(), &AssembleOptions::default()).unwrap();
        assert_eq!(result.role, MachineRole::ControlPlane);
    }

    #[test]
    fn test_missing_role() {
        let err = assemble(
            "cluster:\n  clusterName: x\n",
            &[],
            &bundle(),
            &AssembleOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Assembly { .. }));

        let err = assemble(
            "machine:\n  type: gateway\n",
            &[],
            &bundle(),
            &AssembleOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Assembly { .. }));
    }

    #[test]
    fn test_invalid_contract() {
        let options = AssembleOptions::new().talos_version("vnext");
        let err = assemble("machine:\n  type: worker\n", &[], &bundle(), &options).unwrap_err();
        assert!(matches!(err, ConfigError::Assembly { .. }));
    }

    #[test]
    fn test_contract_gates_features() {
        let options = AssembleOptions::new()
            .talos_version("v1.4")
            .kubernetes_version("v1.27.2");
        let result = assemble("machine:\n  type: worker\n", &[], &bundle(), &options).unwrap();

        let features = &result.config["machine"]["features"];
        assert_eq!(features["rbac"], true);
        assert_eq!(features["apidCheckExtKeyUsage"], true);
        assert!(features.get("stableHostname").is_none());
        assert!(features.get("kubePrism").is_none());
        assert!(features.get("hostDNS").is_none());
        assert_eq!(
            result.config["machine"]["kubelet"]["image"],
            "ghcr.io/siderolabs/kubelet:v1.27.2"
        );
    }

    #[test]
    fn test_serialization_is_reproducible() {
        let base = "machine:\n  type: controlplane\n  network:\n    hostname: cp-1\n";
        let patches = [patch("cluster:\n  clusterName: demo\n")];
        let first = assemble(base, &patches, &bundle(), &AssembleOptions::default())
            .unwrap()
            .to_bytes()
            .unwrap();
        let second = assemble(base, &patches, &bundle(), &AssembleOptions::default())
            .unwrap()
            .to_bytes()
            .unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with("version: v1alpha1\ndebug: false\npersist: true\nmachine:\n  type: controlplane\n"));
    }

    #[test]
    fn test_multi_document_output() {
        let base = "machine:\n  type: worker\n---\napiVersion: v1alpha1\nkind: UserVolumeConfig\nname: databig\n";
        let result = assemble(base, &[], &bundle(), &AssembleOptions::default()).unwrap();
        assert_eq!(result.extras.len(), 1);

        let stream = result.to_multi_document_yaml().unwrap();
        assert!(stream.ends_with("---\napiVersion: v1alpha1\nkind: UserVolumeConfig\nname: databig\n"));
        assert_eq!(crate::classify::split_documents(&stream).len(), 2);
    }

    #[test]
    fn test_apply_patch_replaces_non_mappings() {
        let mut target: Value = serde_yaml::from_str("a: {b: 1}\n").unwrap();
        apply_patch(&mut target, &serde_yaml::from_str("a: [1]\n").unwrap());
        assert_eq!(target["a"], Value::Sequence(vec![1.into()]));

        let mut target: Value = serde_yaml::from_str("a: 1\n").unwrap();
        apply_patch(
            &mut target,
            &serde_yaml::from_str("b:\n  c: 2\n  d:\n    $patch: delete\n").unwrap(),
        );
        assert_eq!(target["b"]["c"], 2);
        assert!(target["b"].get("d").is_none());
    }
}
