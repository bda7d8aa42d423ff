//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Reconcilers driving the container runtime towards declared state."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
//! Declared state accepted by the reconcilers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use berth_runtime::ResourceKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver used when a network spec does not name one.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

const PORT_RANGE: std::ops::RangeInclusive<u32> = 1..=65535;

fn default_driver() -> String {
    DEFAULT_NETWORK_DRIVER.to_owned()
}

/// Validation failures for declared specs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("{kind} name cannot be empty")]
    EmptyName { kind: ResourceKind },
    #[error("container image cannot be empty")]
    EmptyImage,
    #[error("container {name} must publish at least one port")]
    NoPorts { name: String },
    #[error("port {port} is outside 1..=65535")]
    PortOutOfRange { port: u32 },
    #[error("internal port {port} is published more than once")]
    DuplicateInternalPort { port: u32 },
    #[error("network driver cannot be empty")]
    EmptyDriver,
    #[error("invalid port mapping '{0}', expected INTERNAL:EXTERNAL")]
    MalformedPort(String),
}

/// One published port: container port `internal` reachable on host port `external`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u32,
    pub external: u32,
}

impl PortMapping {
    pub fn new(internal: u32, external: u32) -> Self {
        Self { internal, external }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.internal, self.external)
    }
}

impl FromStr for PortMapping {
    type Err = SpecError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || SpecError::MalformedPort(raw.to_owned());
        let (internal, external) = raw.split_once(':').ok_or_else(malformed)?;
        let internal = internal.trim().parse().map_err(|_| malformed())?;
        let external = external.trim().parse().map_err(|_| malformed())?;
        Ok(Self { internal, external })
    }
}

/// Desired state of a single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    /// Any change forces replacement.
    pub image: String,
    /// Any change forces replacement.
    pub ports: Vec<PortMapping>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, ports: Vec<PortMapping>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ports,
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName {
                kind: ResourceKind::Container,
            });
        }
        if self.image.trim().is_empty() {
            return Err(SpecError::EmptyImage);
        }
        if self.ports.is_empty() {
            return Err(SpecError::NoPorts {
                name: self.name.clone(),
            });
        }
        let mut seen = BTreeSet::new();
        for port in &self.ports {
            for value in [port.internal, port.external] {
                if !PORT_RANGE.contains(&value) {
                    return Err(SpecError::PortOutOfRange { port: value });
                }
            }
            if !seen.insert(port.internal) {
                return Err(SpecError::DuplicateInternalPort {
                    port: port.internal,
                });
            }
        }
        Ok(())
    }
}

/// Desired state of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    /// Not mutable in place; a change triggers a migration.
    #[serde(default = "default_driver")]
    pub driver: String,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: default_driver(),
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName {
                kind: ResourceKind::Network,
            });
        }
        if self.driver.trim().is_empty() {
            return Err(SpecError::EmptyDriver);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web(ports: Vec<PortMapping>) -> ContainerSpec {
        ContainerSpec::new("web1", "nginx:1.25", ports)
    }

    #[test]
    fn accepts_well_formed_container() {
        assert!(web(vec![PortMapping::new(80, 8080), PortMapping::new(443, 8443)])
            .validate()
            .is_ok());
    }

    #[test]
    fn rejects_invalid_containers() {
        assert_eq!(web(vec![]).validate(), Err(SpecError::NoPorts { name: "web1".into() }));
        assert_eq!(
            web(vec![PortMapping::new(0, 8080)]).validate(),
            Err(SpecError::PortOutOfRange { port: 0 })
        );
        assert_eq!(
            web(vec![PortMapping::new(80, 70000)]).validate(),
            Err(SpecError::PortOutOfRange { port: 70000 })
        );
        assert_eq!(
            web(vec![PortMapping::new(80, 8080), PortMapping::new(80, 9090)]).validate(),
            Err(SpecError::DuplicateInternalPort { port: 80 })
        );
        assert_eq!(
            ContainerSpec::new("web1", " ", vec![PortMapping::new(80, 8080)]).validate(),
            Err(SpecError::EmptyImage)
        );
    }

    #[test]
    fn network_driver_defaults_to_bridge() {
        let spec: NetworkSpec = serde_json::from_str(r#"{ "name": "frontend" }"#).unwrap();
        assert_eq!(spec.driver, DEFAULT_NETWORK_DRIVER);
        assert!(spec.validate().is_ok());
        assert_eq!(
            NetworkSpec::new("frontend").with_driver("").validate(),
            Err(SpecError::EmptyDriver)
        );
    }

    #[test]
    fn parses_port_mapping() {
        assert_eq!("80:8080".parse::<PortMapping>(), Ok(PortMapping::new(80, 8080)));
        assert!(matches!(
            "80".parse::<PortMapping>(),
            Err(SpecError::MalformedPort(_))
        ));
        assert!("http:8080".parse::<PortMapping>().is_err());
    }
}
