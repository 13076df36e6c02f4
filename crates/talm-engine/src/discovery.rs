//! Discovery functions exposed to templates
//!
//! Every function here goes through the injected [`LookupProvider`]:
//!
//! ```jinja2
//! hostname: {{ discovered_hostname() | default("node", true) }}
//! install:
//!   disk: {{ discovered_system_disk() }}
//! {%- set link = lookup("links", "network", "eth0") %}
//! ```
//!
//! Absent resources produce empty values (`""`, `[]`, `{}` or `none`).
//! Provider failures and cancellation abort the render; the underlying
//! [`LookupError`] or [`Cancelled`] is attached as the error source so the
//! engine can surface it unchanged.

use minijinja::{Environment, Error, ErrorKind, Value};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;

use crate::cancel::{Cancellation, Cancelled};
use crate::lookup::{LookupError, LookupProvider, ResourceKind, resource_id};

/// Names of every function registered by [`Discovery::register`]
pub const DISCOVERY_FUNCTIONS: &[&str] = &[
    "lookup",
    "discovered_hostname",
    "discovered_machine_type",
    "discovered_system_disk",
    "discovered_disks",
    "discovered_physical_links",
    "discovered_default_gateway",
    "discovered_default_link",
    "discovered_default_addresses",
    "discovered_resolvers",
    "existing_config",
];

/// Lookup capability bound to one render
#[derive(Clone)]
pub struct Discovery {
    provider: Arc<dyn LookupProvider>,
    cancellation: Cancellation,
}

impl Discovery {
    pub fn new(provider: Arc<dyn LookupProvider>, cancellation: Cancellation) -> Self {
        Self {
            provider,
            cancellation,
        }
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        self.cancellation.check().map_err(cancelled_error)
    }

    /// Fetch one resource; the provider also sees the cancellation during the call
    pub fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, Error> {
        self.check_cancelled()?;
        tracing::debug!(%kind, namespace, id, "lookup");
        let found = self
            .provider
            .lookup(&self.cancellation, kind, namespace, id)
            .map_err(lookup_error)?;
        self.check_cancelled()?;
        Ok(found)
    }

    /// List resources of a kind
    pub fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<JsonValue>, Error> {
        self.check_cancelled()?;
        tracing::debug!(%kind, namespace, "lookup list");
        let items = self
            .provider
            .list(&self.cancellation, kind, namespace)
            .map_err(lookup_error)?;
        self.check_cancelled()?;
        Ok(items)
    }

    /// Resource by well-known id, or the first one listed
    fn singleton(&self, kind: ResourceKind, id: &str) -> Result<Option<JsonValue>, Error> {
        if let Some(found) = self.get(kind, "", id)? {
            return Ok(Some(found));
        }
        Ok(self.list(kind, "")?.into_iter().next())
    }

    /// Generic lookup: a single resource, or `{"items": [...]}` when `id` is empty
    pub fn lookup(&self, kind: &str, namespace: &str, id: &str) -> Result<JsonValue, Error> {
        let kind: ResourceKind = kind.parse().map_err(lookup_error)?;
        if id.is_empty() {
            let items = self.list(kind, namespace)?;
            return Ok(json!({ "items": items }));
        }
        Ok(self
            .get(kind, namespace, id)?
            .unwrap_or_else(|| JsonValue::Object(Map::new())))
    }

    pub fn hostname(&self) -> Result<String, Error> {
        let resource = self.singleton(ResourceKind::Hostname, "hostname")?;
        Ok(resource
            .as_ref()
            .and_then(|r| r.pointer("/spec/hostname"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub fn machine_type(&self) -> Result<String, Error> {
        let resource = self.singleton(ResourceKind::MachineType, "machine-type")?;
        let spec = resource.as_ref().and_then(|r| r.get("spec"));
        let value = match spec {
            Some(JsonValue::String(s)) => Some(s.as_str()),
            Some(spec) => spec
                .get("type")
                .or_else(|| spec.get("machineType"))
                .and_then(JsonValue::as_str),
            None => None,
        };
        Ok(value.unwrap_or_default().to_string())
    }

    /// Every disk as its spec plus `id`, in listing order
    pub fn disks(&self) -> Result<Vec<JsonValue>, Error> {
        Ok(self
            .list(ResourceKind::Disks, "")?
            .iter()
            .map(flatten_resource)
            .collect())
    }

    /// Device path of the first writable, non-optical, non-empty disk
    pub fn system_disk(&self) -> Result<String, Error> {
        let disk = self.disks()?.into_iter().find(|disk| {
            !flag(disk, "readonly")
                && !flag(disk, "cdrom")
                && disk.get("size").and_then(JsonValue::as_u64) != Some(0)
        });

        Ok(disk
            .map(|disk| {
                match disk.get("dev_path").and_then(JsonValue::as_str) {
                    Some(path) => path.to_string(),
                    None => format!("/dev/{}", str_field(&disk, "id")),
                }
            })
            .unwrap_or_default())
    }

    /// Ethernet links that are not virtual (bonds, bridges, vlans have a `kind`)
    pub fn physical_links(&self) -> Result<Vec<JsonValue>, Error> {
        Ok(self
            .list(ResourceKind::Links, "")?
            .iter()
            .map(flatten_resource)
            .filter(|link| {
                str_field(link, "kind").is_empty() && str_field(link, "type") == "ether"
            })
            .collect())
    }

    /// The default route: no destination, a gateway, IPv4 first, lowest priority
    fn default_route(&self) -> Result<Option<JsonValue>, Error> {
        let mut routes: Vec<JsonValue> = self
            .list(ResourceKind::Routes, "")?
            .iter()
            .map(flatten_resource)
            .filter(|route| {
                matches!(str_field(route, "dst"), "" | "0.0.0.0/0" | "::/0")
                    && !str_field(route, "gateway").is_empty()
            })
            .collect();

        // Stable sort keeps listing order between equal routes
        routes.sort_by_key(|route| {
            (
                str_field(route, "family") != "inet4",
                route
                    .get("priority")
                    .and_then(JsonValue::as_u64)
                    .unwrap_or(u64::MAX),
            )
        });
        Ok(routes.into_iter().next())
    }

    pub fn default_gateway(&self) -> Result<String, Error> {
        Ok(self
            .default_route()?
            .map(|route| str_field(&route, "gateway").to_string())
            .unwrap_or_default())
    }

    pub fn default_link(&self) -> Result<String, Error> {
        Ok(self
            .default_route()?
            .map(|route| str_field(&route, "outLinkName").to_string())
            .unwrap_or_default())
    }

    /// Global addresses (CIDR notation) assigned to the default link
    pub fn default_addresses(&self) -> Result<Vec<String>, Error> {
        let link = self.default_link()?;
        if link.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .list(ResourceKind::Addresses, "")?
            .iter()
            .map(flatten_resource)
            .filter(|addr| str_field(addr, "linkName") == link)
            .filter(|addr| matches!(str_field(addr, "scope"), "" | "global"))
            .map(|addr| str_field(&addr, "address").to_string())
            .filter(|addr| !addr.is_empty())
            .collect())
    }

    pub fn resolvers(&self) -> Result<Vec<String>, Error> {
        let resource = self.singleton(ResourceKind::Resolvers, "resolvers")?;
        Ok(resource
            .as_ref()
            .and_then(|r| r.pointer("/spec/dnsServers"))
            .and_then(JsonValue::as_array)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// The machine configuration currently applied to the node, if any
    ///
    /// The spec may be stored as a YAML string or as a structured mapping.
    pub fn existing_config(&self) -> Result<Option<JsonValue>, Error> {
        let Some(resource) = self.singleton(ResourceKind::MachineConfig, "v1alpha1")? else {
            return Ok(None);
        };

        match resource.get("spec") {
            Some(JsonValue::String(raw)) => {
                let first = raw
                    .replace("\r\n", "\n")
                    .split("\n---")
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let parsed: JsonValue = serde_yaml::from_str(&first).map_err(|e| {
                    lookup_error(LookupError::failed(
                        ResourceKind::MachineConfig,
                        resource_id(&resource).unwrap_or("v1alpha1"),
                        format!("existing config is not valid YAML: {}", e),
                    ))
                })?;
                Ok(Some(parsed).filter(|v| !v.is_null()))
            }
            Some(JsonValue::Null) | None => Ok(None),
            Some(spec) => Ok(Some(spec.clone())),
        }
    }

    /// Register the `lookup` and `discovered_*` functions on an environment
    pub fn register(&self, env: &mut Environment<'static>) {
        let this = self.clone();
        env.add_function(
            "lookup",
            move |kind: String, namespace: Option<String>, id: Option<String>| -> Result<Value, Error> {
                let found = this.lookup(
                    &kind,
                    namespace.as_deref().unwrap_or_default(),
                    id.as_deref().unwrap_or_default(),
                )?;
                Ok(Value::from_serialize(&found))
            },
        );

        let this = self.clone();
        env.add_function("discovered_hostname", move || this.hostname());

        let this = self.clone();
        env.add_function("discovered_machine_type", move || this.machine_type());

        let this = self.clone();
        env.add_function("discovered_system_disk", move || this.system_disk());

        let this = self.clone();
        env.add_function("discovered_disks", move || -> Result<Value, Error> {
            Ok(Value::from_serialize(this.disks()?))
        });

        let this = self.clone();
        env.add_function("discovered_physical_links", move || -> Result<Value, Error> {
            Ok(Value::from_serialize(this.physical_links()?))
        });

        let this = self.clone();
        env.add_function("discovered_default_gateway", move || this.default_gateway());

        let this = self.clone();
        env.add_function("discovered_default_link", move || this.default_link());

        let this = self.clone();
        env.add_function("discovered_default_addresses", move || this.default_addresses());

        let this = self.clone();
        env.add_function("discovered_resolvers", move || this.resolvers());

        let this = self.clone();
        env.add_function("existing_config", move || -> Result<Value, Error> {
            Ok(match this.existing_config()? {
                Some(config) => Value::from_serialize(&config),
                None => Value::from(()),
            })
        });
    }
}

fn cancelled_error(cancelled: Cancelled) -> Error {
    Error::new(ErrorKind::InvalidOperation, cancelled.to_string()).with_source(cancelled)
}

fn lookup_error(err: LookupError) -> Error {
    if let LookupError::Cancelled(cancelled) = err {
        return cancelled_error(cancelled);
    }
    Error::new(ErrorKind::InvalidOperation, err.to_string()).with_source(err)
}

/// `spec` fields with the resource id alongside
fn flatten_resource(resource: &JsonValue) -> JsonValue {
    let mut flat = match resource.get("spec") {
        Some(JsonValue::Object(spec)) => spec.clone(),
        _ => Map::new(),
    };
    if let Some(id) = resource_id(resource) {
        flat.insert("id".to_string(), JsonValue::String(id.to_string()));
    }
    JsonValue::Object(flat)
}

fn str_field<'a>(value: &'a JsonValue, key: &str) -> &'a str {
    value.get(key).and_then(JsonValue::as_str).unwrap_or_default()
}

fn flag(value: &JsonValue, key: &str) -> bool {
    value.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookup;

    const NODE_SNAPSHOT: &str = r#"
hostname:
  - metadata: { id: hostname }
    spec: { hostname: cp-1 }
machinetype:
  - metadata: { id: machine-type }
    spec: controlplane
disks:
  - metadata: { id: sr0 }
    spec: { dev_path: /dev/sr0, cdrom: true, size: 1024 }
  - metadata: { id: sda }
    spec: { dev_path: /dev/sda, size: 107374182400, transport: sata }
  - metadata: { id: sdb }
    spec: { dev_path: /dev/sdb, size: 53687091200, readonly: true }
links:
  - metadata: { id: bond0 }
    spec: { type: ether, kind: bond }
  - metadata: { id: eth0 }
    spec: { type: ether, hardwareAddr: "52:54:00:12:34:56" }
  - metadata: { id: lo }
    spec: { type: loopback }
routes:
  - metadata: { id: "inet6/fe80::1//1024" }
    spec: { dst: "", gateway: "fe80::1", outLinkName: eth0, family: inet6, priority: 1024 }
  - metadata: { id: inet4/10.0.0.1//1024 }
    spec: { dst: "", gateway: 10.0.0.1, outLinkName: eth0, family: inet4, priority: 1024 }
  - metadata: { id: inet4/10.0.0.0/24 }
    spec: { dst: 10.0.0.0/24, gateway: "", outLinkName: eth0, family: inet4 }
addresses:
  - metadata: { id: eth0/10.0.0.5/24 }
    spec: { address: 10.0.0.5/24, linkName: eth0, family: inet4, scope: global }
  - metadata: { id: "eth0/fe80::5054/64" }
    spec: { address: "fe80::5054/64", linkName: eth0, family: inet6, scope: link }
  - metadata: { id: lo/127.0.0.1/8 }
    spec: { address: 127.0.0.1/8, linkName: lo, family: inet4, scope: host }
resolvers:
  - metadata: { id: resolvers }
    spec: { dnsServers: [1.1.1.1, 8.8.8.8] }
machineconfig:
  - metadata: { id: v1alpha1 }
    spec: "machine:\n  type: controlplane\n"
"#;

    fn discovery(snapshot: &str) -> Discovery {
        Discovery::new(
            Arc::new(StaticLookup::from_yaml(snapshot).unwrap()),
            Cancellation::new(),
        )
    }

    #[test]
    fn test_node_facts() {
        let d = discovery(NODE_SNAPSHOT);
        assert_eq!(d.hostname().unwrap(), "cp-1");
        assert_eq!(d.machine_type().unwrap(), "controlplane");
        assert_eq!(d.system_disk().unwrap(), "/dev/sda");
        assert_eq!(d.default_gateway().unwrap(), "10.0.0.1");
        assert_eq!(d.default_link().unwrap(), "eth0");
        assert_eq!(d.default_addresses().unwrap(), vec!["10.0.0.5/24"]);
        assert_eq!(d.resolvers().unwrap(), vec!["1.1.1.1", "8.8.8.8"]);

        let links = d.physical_links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0]["id"], "eth0");

        let config = d.existing_config().unwrap().unwrap();
        assert_eq!(config["machine"]["type"], "controlplane");
    }

    #[test]
    fn test_empty_provider_yields_empty_values() {
        let d = discovery("");
        assert_eq!(d.hostname().unwrap(), "");
        assert_eq!(d.system_disk().unwrap(), "");
        assert!(d.disks().unwrap().is_empty());
        assert!(d.default_addresses().unwrap().is_empty());
        assert!(d.resolvers().unwrap().is_empty());
        assert!(d.existing_config().unwrap().is_none());
        assert_eq!(d.lookup("disks", "", "sda").unwrap(), json!({}));
        assert_eq!(d.lookup("disks", "", "").unwrap(), json!({"items": []}));
    }

    #[test]
    fn test_lookup_lists_items() {
        let d = discovery(NODE_SNAPSHOT);
        let all = d.lookup("disks", "", "").unwrap();
        let ids: Vec<_> = all["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(resource_id)
            .collect();
        assert_eq!(ids, vec!["sda", "sdb", "sr0"]);
    }

    #[test]
    fn test_cancelled_lookup_carries_source() {
        let d = discovery(NODE_SNAPSHOT);
        d.cancellation.cancel();

        let err = d.hostname().unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.downcast_ref::<Cancelled>(), Some(&Cancelled::Requested));
    }

    #[test]
    fn test_unknown_kind_is_lookup_error() {
        let d = discovery("");
        let err = d.lookup("pods", "", "x").unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert!(matches!(
            source.downcast_ref::<LookupError>(),
            Some(LookupError::UnknownKind(_))
        ));
    }
}
