//! Chart (project) definition and loading
//!
//! A talm project is a chart directory:
//!
//! ```text
//! Chart.yaml       # name, version, templateOptions
//! values.yaml      # default values
//! secrets.yaml     # cluster secrets bundle (or secrets.encrypted.yaml)
//! templates/       # controlplane.yaml, worker.yaml, _helpers.tpl
//! nodes/           # rendered per-node files carrying a modeline
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Chart.yaml contents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// API version (v2, Helm compatible)
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Chart name, exposed to templates as `chart.name`
    pub name: String,

    /// Chart version
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Defaults for the `template` command
    #[serde(default)]
    pub template_options: TemplateOptions,
}

/// Rendering defaults stored in Chart.yaml
///
/// Command-line flags override every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOptions {
    /// Render without contacting nodes (lookups return nothing)
    #[serde(default)]
    pub offline: bool,

    /// Talos version contract, e.g. `v1.9`
    #[serde(default)]
    pub talos_version: Option<String>,

    #[serde(default)]
    pub kubernetes_version: Option<String>,

    /// Extra values files merged after values.yaml
    #[serde(default)]
    pub value_files: Vec<PathBuf>,

    /// Secrets bundle path, relative to the chart root
    #[serde(default)]
    pub with_secrets: Option<PathBuf>,

    /// Emit the fully assembled machine config instead of the rendered patch
    #[serde(default)]
    pub full: bool,
}

fn default_api_version() -> String {
    "v2".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Loaded chart with resolved paths
#[derive(Debug, Clone)]
pub struct LoadedChart {
    pub metadata: ChartMetadata,

    /// Root directory of the chart
    pub root: PathBuf,

    pub templates_dir: PathBuf,

    pub values_path: PathBuf,
}

impl LoadedChart {
    /// Load a chart from a directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.exists() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join("Chart.yaml");
        if !chart_file.exists() {
            return Err(CoreError::InvalidChart {
                message: format!("Chart.yaml not found in {}", root.display()),
            });
        }

        let content =
            std::fs::read_to_string(&chart_file).map_err(|e| CoreError::file(&chart_file, e))?;
        let metadata: ChartMetadata = serde_yaml::from_str(&content)?;

        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart name must not be empty".to_string(),
            });
        }

        Ok(Self {
            metadata,
            templates_dir: root.join("templates"),
            values_path: root.join("values.yaml"),
            root,
        })
    }

    /// Resolve a path relative to the chart root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Template name for a file under `templates/`, with `/` separators
    pub fn template_name(&self, file: &Path) -> String {
        let rel = file.strip_prefix(&self.root).unwrap_or(file);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Get list of template files, sorted
    pub fn template_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        if !self.templates_dir.exists() {
            return Ok(files);
        }

        for entry in walkdir::WalkDir::new(&self.templates_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() {
                if let Some(ext) = path.extension() {
                    let ext = ext.to_string_lossy().to_lowercase();
                    if matches!(ext.as_str(), "yaml" | "yml" | "tpl" | "j2" | "jinja2") {
                        files.push(path.to_path_buf());
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }
}
