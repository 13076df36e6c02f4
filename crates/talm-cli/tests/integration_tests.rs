//! Integration tests for CLI commands

use std::path::Path;
use std::process::{Command, Output};

/// Helper to run talm inside a project directory
fn talm(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_talm"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("TALM_KEY")
        .env_remove("TALM_TALOS_VERSION")
        .env_remove("TALM_KUBERNETES_VERSION")
        .output()
        .expect("Failed to execute talm")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Minimal project: Chart.yaml, values.yaml and two templates
fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("Chart.yaml"), "name: demo\nversion: 0.1.0\n").unwrap();
    std::fs::write(
        root.join("values.yaml"),
        "endpoint: https://10.0.0.10:6443\ndisk: /dev/sda\n",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("templates")).unwrap();
    std::fs::write(
        root.join("templates/controlplane.yaml"),
        "machine:\n  type: {{ machineType }}\n  install:\n    disk: {{ values.disk }}\ncluster:\n  controlPlane:\n    endpoint: {{ values.endpoint }}\n",
    )
    .unwrap();
    std::fs::write(
        root.join("templates/worker.yaml"),
        "machine:\n  type: {{ machineType }}\n",
    )
    .unwrap();
    dir
}

const SECRETS: &str = "\
cluster:
  id: cluster-id
  secret: c2VjcmV0
secrets:
  bootstraptoken: abcdef.0123456789abcdef
trustdinfo:
  token: trustd.token
";

mod template_command {
    use super::*;

    #[test]
    fn test_template_to_stdout_with_modeline() {
        let dir = project();
        let output = talm(
            dir.path(),
            &[
                "template",
                "-t",
                "templates/controlplane.yaml",
                "-n",
                "10.0.0.1",
                "-e",
                "10.0.0.10",
            ],
        );

        assert!(output.status.success(), "{:?}", output);
        let out = stdout(&output);
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some(
                "# talm: nodes=[\"10.0.0.1\"], endpoints=[\"10.0.0.10\"], templates=[\"templates/controlplane.yaml\"]"
            )
        );
        assert!(lines.next().unwrap().contains("AUTOGENERATED"));
        assert!(out.contains("type: controlplane"));
        assert!(out.contains("disk: /dev/sda"));
    }

    #[test]
    fn test_template_set_overrides_values() {
        let dir = project();
        let output = talm(
            dir.path(),
            &[
                "template",
                "-t",
                "templates/controlplane.yaml",
                "--set",
                "disk=/dev/nvme0n1",
            ],
        );

        assert!(output.status.success(), "{:?}", output);
        assert!(stdout(&output).contains("disk: /dev/nvme0n1"));
    }

    #[test]
    fn test_machine_type_flag_wins() {
        let dir = project();
        let output = talm(
            dir.path(),
            &[
                "template",
                "-t",
                "templates/controlplane.yaml",
                "--machine-type",
                "worker",
            ],
        );

        assert!(output.status.success(), "{:?}", output);
        assert!(stdout(&output).contains("type: worker"));
    }

    #[test]
    fn test_in_place_keeps_comments_and_modeline() {
        let dir = project();
        let node = dir.path().join("nodes/cp-1.yaml");
        std::fs::create_dir_all(node.parent().unwrap()).unwrap();
        std::fs::write(
            &node,
            "# talm: nodes=[\"10.0.0.1\"], endpoints=[\"10.0.0.10\"], templates=[\"templates/controlplane.yaml\"]\n\
             # THIS FILE IS AUTOGENERATED. PREFER TEMPLATE EDITS OVER MANUAL ONES.\n\
             machine:\n  type: controlplane\n  install:\n    # boot disk\n    disk: /dev/old # keep me\n",
        )
        .unwrap();

        let output = talm(
            dir.path(),
            &["template", "-f", node.to_str().unwrap(), "--in-place"],
        );
        assert!(output.status.success(), "{:?}", output);

        let written = std::fs::read_to_string(&node).unwrap();
        assert!(written.starts_with("# talm: nodes=[\"10.0.0.1\"]"));
        assert!(written.contains("    # boot disk\n    disk: /dev/sda # keep me\n"));
        assert!(written.contains("endpoint: https://10.0.0.10:6443"));
    }

    #[test]
    fn test_missing_template_exit_code() {
        let dir = project();
        let output = talm(dir.path(), &["template", "-t", "templates/missing.yaml"]);

        assert_eq!(output.status.code(), Some(3));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("templates/missing.yaml"));
    }

    #[test]
    fn test_undefined_value_is_template_error() {
        let dir = project();
        std::fs::write(
            dir.path().join("templates/broken.yaml"),
            "machine:\n  hostname: {{ values.nothing.here }}\n",
        )
        .unwrap();

        let output = talm(dir.path(), &["template", "-t", "templates/broken.yaml"]);
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn test_malformed_modeline_is_input_error() {
        let dir = project();
        let node = dir.path().join("node.yaml");
        std::fs::write(&node, "# talm: nodes=[not json\nmachine: {}\n").unwrap();

        let output = talm(dir.path(), &["template", "-f", node.to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_no_templates_is_input_error() {
        let dir = project();
        let output = talm(dir.path(), &["template", "-n", "10.0.0.1"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_missing_chart_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = talm(dir.path(), &["template", "-t", "templates/worker.yaml"]);
        assert_eq!(output.status.code(), Some(4));
    }
}

mod secrets_commands {
    use super::*;

    fn parse(path: &Path) -> serde_yaml::Value {
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dir = project();
        let root = dir.path();
        std::fs::write(root.join("secrets.yaml"), SECRETS).unwrap();

        let output = talm(root, &["encrypt"]);
        assert!(output.status.success(), "{:?}", output);
        assert!(root.join("talm.key").exists());

        let encrypted = std::fs::read_to_string(root.join("secrets.encrypted.yaml")).unwrap();
        assert!(encrypted.contains("ENC[AGE,data:"));
        assert!(!encrypted.contains("c2VjcmV0"));

        std::fs::remove_file(root.join("secrets.yaml")).unwrap();
        let output = talm(root, &["decrypt"]);
        assert!(output.status.success(), "{:?}", output);

        let expected: serde_yaml::Value = serde_yaml::from_str(SECRETS).unwrap();
        assert_eq!(parse(&root.join("secrets.yaml")), expected);
    }

    #[test]
    fn test_encrypt_twice_is_unchanged() {
        let dir = project();
        let root = dir.path();
        std::fs::write(root.join("secrets.yaml"), SECRETS).unwrap();

        assert!(talm(root, &["encrypt"]).status.success());
        let first = std::fs::read_to_string(root.join("secrets.encrypted.yaml")).unwrap();

        let output = talm(root, &["encrypt"]);
        assert!(output.status.success());
        assert!(stdout(&output).contains("unchanged"));
        let second = std::fs::read_to_string(root.join("secrets.encrypted.yaml")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let owner = project();
        let stranger = project();
        std::fs::write(owner.path().join("secrets.yaml"), SECRETS).unwrap();
        std::fs::write(stranger.path().join("secrets.yaml"), SECRETS).unwrap();
        assert!(talm(owner.path(), &["encrypt"]).status.success());
        assert!(talm(stranger.path(), &["encrypt"]).status.success());

        std::fs::copy(
            stranger.path().join("talm.key"),
            owner.path().join("talm.key"),
        )
        .unwrap();

        let output = talm(owner.path(), &["decrypt"]);
        assert_eq!(output.status.code(), Some(6));
    }

    #[test]
    fn test_rotate_keys() {
        let dir = project();
        let root = dir.path();
        std::fs::write(root.join("secrets.yaml"), SECRETS).unwrap();
        assert!(talm(root, &["encrypt"]).status.success());
        let old_key = std::fs::read_to_string(root.join("talm.key")).unwrap();

        let output = talm(root, &["rotate-keys"]);
        assert!(output.status.success(), "{:?}", output);
        assert_ne!(std::fs::read_to_string(root.join("talm.key")).unwrap(), old_key);

        std::fs::remove_file(root.join("secrets.yaml")).unwrap();
        assert!(talm(root, &["decrypt"]).status.success());
        let expected: serde_yaml::Value = serde_yaml::from_str(SECRETS).unwrap();
        assert_eq!(parse(&root.join("secrets.yaml")), expected);
    }

    #[test]
    fn test_decrypt_without_key() {
        let dir = project();
        std::fs::write(
            dir.path().join("secrets.encrypted.yaml"),
            "cluster:\n  id: ENC[AGE,data:AAAA]\n",
        )
        .unwrap();

        let output = talm(dir.path(), &["decrypt"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("talm encrypt"));
    }

    #[test]
    fn test_encrypt_nothing() {
        let dir = project();
        let output = talm(dir.path(), &["encrypt"]);
        assert_eq!(output.status.code(), Some(2));
    }
}

mod rotate_ca_command {
    use super::*;

    const BUNDLE: &str = "\
cluster:
  id: cluster-id
  secret: c2VjcmV0
secrets:
  bootstraptoken: abcdef.0123456789abcdef
trustdinfo:
  token: trustd.token
certs:
  k8s:
    crt: azhzLWNydA==
    key: azhzLWtleQ==
  os:
    crt: b3MtY3J0
    key: b3Mta2V5
";

    #[test]
    fn test_rotate_os_ca_in_encrypted_project() {
        let dir = project();
        let root = dir.path();
        std::fs::write(root.join("secrets.yaml"), BUNDLE).unwrap();
        assert!(talm(root, &["encrypt"]).status.success());
        std::fs::remove_file(root.join("secrets.yaml")).unwrap();

        std::fs::write(root.join("ca.crt"), "-----BEGIN CERTIFICATE-----\nnew\n-----END CERTIFICATE-----\n").unwrap();
        std::fs::write(root.join("ca.key"), "bmV3LWtleQ==\n").unwrap();

        let output = talm(
            root,
            &[
                "rotate-ca",
                "--ca",
                "os",
                "--crt",
                root.join("ca.crt").to_str().unwrap(),
                "--ca-key",
                root.join("ca.key").to_str().unwrap(),
            ],
        );
        assert!(output.status.success(), "{:?}", output);
        assert!(!root.join("secrets.yaml").exists());

        assert!(talm(root, &["decrypt"]).status.success());
        let bundle: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(root.join("secrets.yaml")).unwrap())
                .unwrap();
        assert_eq!(
            bundle["certs"]["os"]["crt"],
            "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0tCm5ldwotLS0tLUVORCBDRVJUSUZJQ0FURS0tLS0tCg=="
        );
        assert_eq!(bundle["certs"]["os"]["key"], "bmV3LWtleQ==");
        assert_eq!(bundle["certs"]["k8s"]["crt"], "azhzLWNydA==");
    }

    #[test]
    fn test_rotate_ca_rejects_unknown_ca() {
        let dir = project();
        let output = talm(
            dir.path(),
            &["rotate-ca", "--ca", "etcd", "--crt", "a", "--ca-key", "b"],
        );
        assert_eq!(output.status.code(), Some(2));
    }
}

mod classify_command {
    use super::*;

    #[test]
    fn test_classify_patch_file() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("patch.yaml");
        std::fs::write(
            &patch,
            "machine:\n  network:\n    hostname: cp-1\n---\napiVersion: v1alpha1\nkind: UserVolumeConfig\nname: data\n",
        )
        .unwrap();

        let output = talm(dir.path(), &["classify", patch.to_str().unwrap()]);
        assert!(output.status.success(), "{:?}", output);
        let out = stdout(&output);
        assert!(out.contains("UserVolumeConfig"));
        assert!(out.contains("1 patch(es), 1 extra document(s)"));

        let output = talm(dir.path(), &["classify", "--extras", patch.to_str().unwrap()]);
        let out = stdout(&output);
        assert!(out.contains("kind: UserVolumeConfig"));
        assert!(!out.contains("hostname"));
    }

    #[test]
    fn test_classify_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = talm(dir.path(), &["classify", "absent.yaml"]);
        assert_eq!(output.status.code(), Some(5));
    }
}

mod diff_command {
    use super::*;

    #[test]
    fn test_diff_lines_and_patch() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.yaml");
        let new = dir.path().join("new.yaml");
        std::fs::write(&old, "machine:\n  install:\n    disk: /dev/sda\n  debug: true\n").unwrap();
        std::fs::write(&new, "machine:\n  install:\n    disk: /dev/nvme0n1\n").unwrap();

        let output = talm(dir.path(), &["diff", old.to_str().unwrap(), new.to_str().unwrap()]);
        assert!(output.status.success(), "{:?}", output);
        let out = stdout(&output);
        assert!(out.contains("-    disk: /dev/sda"));
        assert!(out.contains("+    disk: /dev/nvme0n1"));

        let output = talm(
            dir.path(),
            &["diff", "--patch", old.to_str().unwrap(), new.to_str().unwrap()],
        );
        assert!(output.status.success(), "{:?}", output);
        let patch: serde_yaml::Value = serde_yaml::from_str(&stdout(&output)).unwrap();
        assert_eq!(patch["machine"]["install"]["disk"], "/dev/nvme0n1");
        assert_eq!(patch["machine"]["debug"]["$patch"], "delete");
    }

    #[test]
    fn test_diff_identical() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.yaml");
        std::fs::write(&file, "machine: {}\n").unwrap();

        let output = talm(dir.path(), &["diff", file.to_str().unwrap(), file.to_str().unwrap()]);
        assert!(output.status.success());
        assert!(stdout(&output).is_empty());
    }
}
