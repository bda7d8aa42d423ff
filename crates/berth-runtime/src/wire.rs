//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Container runtime control-plane capability."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
//! Docker Engine API JSON shapes used by [`crate::EngineClient`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{
    AttachedNetwork, ContainerConfig, ContainerInspect, ContainerSummary, HostConfig,
    NetworkCreateOptions, NetworkInspect, PortBinding, PortMap,
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Empty {}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WirePortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireHostConfig {
    #[serde(default)]
    pub port_bindings: Option<HashMap<String, Option<Vec<WirePortBinding>>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerCreateRequest {
    pub image: String,
    pub exposed_ports: BTreeMap<String, Empty>,
    pub labels: BTreeMap<String, String>,
    pub host_config: WireHostConfig,
}

impl ContainerCreateRequest {
    pub fn new(config: &ContainerConfig, host_config: &HostConfig) -> Self {
        let port_bindings = host_config
            .port_bindings
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|binding| WirePortBinding {
                        host_ip: binding.host_ip.clone(),
                        host_port: binding.host_port.clone(),
                    })
                    .collect();
                (port.clone(), Some(bindings))
            })
            .collect();
        Self {
            image: config.image.clone(),
            exposed_ports: config
                .exposed_ports
                .iter()
                .map(|port| (port.clone(), Empty {}))
                .collect(),
            labels: config.labels.clone(),
            host_config: WireHostConfig {
                port_bindings: Some(port_bindings),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct IdResponse {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireEndpoint {
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireNetworkSettings {
    #[serde(default)]
    pub networks: Option<HashMap<String, WireEndpoint>>,
}

impl WireNetworkSettings {
    fn attached(self) -> Vec<AttachedNetwork> {
        let mut attached: Vec<AttachedNetwork> = self
            .networks
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoint)| AttachedNetwork {
                name,
                network_id: endpoint.network_id,
            })
            .collect();
        attached.sort_by(|a, b| a.name.cmp(&b.name));
        attached
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireContainerConfig {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerInspectResponse {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: Option<WireContainerConfig>,
    #[serde(default)]
    pub host_config: Option<WireHostConfig>,
    #[serde(default)]
    pub network_settings: Option<WireNetworkSettings>,
}

impl From<ContainerInspectResponse> for ContainerInspect {
    fn from(raw: ContainerInspectResponse) -> Self {
        let port_bindings: PortMap = raw
            .host_config
            .and_then(|host| host.port_bindings)
            .unwrap_or_default()
            .into_iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .map(|binding| PortBinding {
                        host_ip: binding.host_ip,
                        host_port: binding.host_port,
                    })
                    .collect();
                (port, bindings)
            })
            .collect();
        Self {
            id: raw.id,
            name: raw.name,
            image: raw.config.map(|config| config.image).unwrap_or_default(),
            port_bindings,
            networks: raw
                .network_settings
                .map(WireNetworkSettings::attached)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerListEntry {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub network_settings: Option<WireNetworkSettings>,
}

impl From<ContainerListEntry> for ContainerSummary {
    fn from(raw: ContainerListEntry) -> Self {
        Self {
            id: raw.id,
            names: raw.names,
            networks: raw
                .network_settings
                .map(WireNetworkSettings::attached)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NetworkCreateRequest {
    pub name: String,
    pub driver: String,
    pub labels: BTreeMap<String, String>,
    /// Pre-1.44 engines only refuse a duplicate name when asked to.
    #[serde(rename = "CheckDuplicate")]
    pub check_duplicate: bool,
}

impl NetworkCreateRequest {
    pub fn new(name: &str, options: &NetworkCreateOptions) -> Self {
        Self {
            name: name.to_owned(),
            driver: options.driver.clone(),
            labels: options.labels.clone(),
            check_duplicate: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NetworkInspectResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub driver: String,
}

impl From<NetworkInspectResponse> for NetworkInspect {
    fn from(raw: NetworkInspectResponse) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            driver: raw.driver,
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireEndpointConfig {
    pub aliases: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NetworkConnectRequest {
    pub container: String,
    pub endpoint_config: WireEndpointConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NetworkDisconnectRequest {
    pub container: String,
    pub force: bool,
}

/// Error body returned by the engine on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub message: String,
}

/// One line of the image pull progress stream.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PullProgress {
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_container_inspect() {
        let raw = serde_json::json!({
            "Id": "4fa6e0f0c678",
            "Name": "/web1",
            "Config": { "Image": "nginx:1.25" },
            "HostConfig": {
                "PortBindings": {
                    "80/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "8080" }],
                    "443/tcp": null
                }
            },
            "NetworkSettings": {
                "Networks": {
                    "frontend": { "NetworkID": "net-1" },
                    "bridge": { "NetworkID": "net-0" }
                }
            }
        });
        let parsed: ContainerInspectResponse = serde_json::from_value(raw).unwrap();
        let inspect = ContainerInspect::from(parsed);
        assert_eq!(inspect.name, "/web1");
        assert_eq!(inspect.image, "nginx:1.25");
        assert_eq!(
            inspect.port_bindings.get("80/tcp"),
            Some(&vec![PortBinding {
                host_ip: "0.0.0.0".into(),
                host_port: "8080".into()
            }])
        );
        assert_eq!(inspect.port_bindings.get("443/tcp"), Some(&Vec::new()));
        assert_eq!(inspect.networks.len(), 2);
        assert_eq!(inspect.networks[0].name, "bridge");
        assert_eq!(inspect.networks[1].network_id, "net-1");
    }

    #[test]
    fn encodes_create_request_in_engine_casing() {
        let mut config = ContainerConfig {
            image: "nginx:1.25".into(),
            ..ContainerConfig::default()
        };
        config.exposed_ports.insert("80/tcp".into());
        let mut host = HostConfig::default();
        host.port_bindings.insert(
            "80/tcp".into(),
            vec![PortBinding {
                host_ip: "0.0.0.0".into(),
                host_port: "8080".into(),
            }],
        );
        let body = serde_json::to_value(ContainerCreateRequest::new(&config, &host)).unwrap();
        assert_eq!(body["Image"], "nginx:1.25");
        assert_eq!(body["ExposedPorts"]["80/tcp"], serde_json::json!({}));
        assert_eq!(
            body["HostConfig"]["PortBindings"]["80/tcp"][0]["HostIp"],
            "0.0.0.0"
        );
        assert_eq!(
            body["HostConfig"]["PortBindings"]["80/tcp"][0]["HostPort"],
            "8080"
        );
    }

    #[test]
    fn network_create_asks_engine_to_refuse_duplicate_names() {
        let options = NetworkCreateOptions {
            driver: "bridge".into(),
            ..NetworkCreateOptions::default()
        };
        let body = serde_json::to_value(NetworkCreateRequest::new("frontend", &options)).unwrap();
        assert_eq!(body["Name"], "frontend");
        assert_eq!(body["Driver"], "bridge");
        assert_eq!(body["CheckDuplicate"], true);
    }

    #[test]
    fn list_entry_without_network_settings_has_no_networks() {
        let raw = serde_json::json!({ "Id": "c1", "Names": ["/c1"] });
        let entry: ContainerListEntry = serde_json::from_value(raw).unwrap();
        let summary = ContainerSummary::from(entry);
        assert!(summary.networks.is_empty());
        assert_eq!(summary.names, vec!["/c1".to_string()]);
    }
}
