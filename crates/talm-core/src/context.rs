//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::machine::MachineRole;
use crate::values::Values;

/// Context available to all templates
///
/// Built fresh for every rendered file and never mutated during a render.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateContext {
    /// Declared role of the machine being rendered
    pub machine_type: MachineRole,

    /// User values (merged)
    pub values: JsonValue,

    /// Chart metadata
    pub chart: ChartInfo,

    /// Version information
    pub capabilities: Capabilities,
}

/// Chart information for templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.clone(),
        }
    }
}

/// Target versions the templates may branch on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Talos version contract (`v1.9`), empty when unspecified
    pub talos_version: String,

    pub kubernetes_version: String,
}

impl TemplateContext {
    /// Create a new template context
    pub fn new(machine_type: MachineRole, values: Values, chart_name: impl Into<String>) -> Self {
        Self {
            machine_type,
            values: values.into_inner(),
            chart: ChartInfo {
                name: chart_name.into(),
                version: String::new(),
            },
            capabilities: Capabilities::default(),
        }
    }

    /// Create a context from a loaded chart's metadata
    pub fn for_chart(machine_type: MachineRole, values: Values, chart: &ChartMetadata) -> Self {
        Self {
            chart: ChartInfo::from(chart),
            ..Self::new(machine_type, values, chart.name.clone())
        }
    }

    /// Set capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_context() {
        let values = Values::from_yaml("endpoint: https://10.0.0.1:6443").unwrap();
        let ctx = TemplateContext::new(MachineRole::Worker, values, "mycluster");

        assert_eq!(ctx.chart.name, "mycluster");
        assert_eq!(ctx.machine_type, MachineRole::Worker);
        assert_eq!(ctx.values["endpoint"], "https://10.0.0.1:6443");
    }

    #[test]
    fn test_context_for_chart() {
        let chart: ChartMetadata = serde_yaml::from_str("name: demo\nversion: 1.2.3").unwrap();
        let ctx = TemplateContext::for_chart(MachineRole::ControlPlane, Values::new(), &chart)
            .with_capabilities(Capabilities {
                talos_version: "v1.9".to_string(),
                kubernetes_version: "1.31.1".to_string(),
            });

        assert_eq!(ctx.chart.version, "1.2.3");
        assert_eq!(ctx.capabilities.talos_version, "v1.9");

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["machineType"], "controlplane");
    }
}
