use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

static SERVICE_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("valid service id regex"));

/// Identifier of a service inside an enclave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        SERVICE_ID_REGEX.is_match(&self.0)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Transport protocol of a port exposed by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortProtocol {
    Tcp,
    Sctp,
    Udp,
}

impl PortProtocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TCP" => Some(Self::Tcp),
            "SCTP" => Some(Self::Sctp),
            "UDP" => Some(Self::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Sctp => "SCTP",
            Self::Udp => "UDP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub protocol: PortProtocol,
}

/// Container configuration for a service added by a script.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub container_image_name: String,
    pub private_ports: BTreeMap<String, Port>,
    pub entry_point_args: Vec<String>,
    pub cmd_args: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
}

/// Information returned by the service network once a service is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_id: ServiceId,
    pub private_ip_address: String,
}

/// Result of running a command inside a service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub output: String,
}

pub type PartitionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionConnection {
    Allowed,
    Blocked,
}

impl PartitionConnection {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ALLOWED" => Some(Self::Allowed),
            "BLOCKED" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Blocked => "BLOCKED",
        }
    }
}

/// Desired partition layout of the service network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionTopology {
    pub partitions: BTreeMap<PartitionId, BTreeSet<ServiceId>>,
    pub connections: BTreeMap<(PartitionId, PartitionId), PartitionConnection>,
    pub default_connection: Option<PartitionConnection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_validation() {
        assert!(ServiceId::new("example-datastore-server-0").is_valid());
        assert!(ServiceId::new("svc.1_a").is_valid());
        assert!(!ServiceId::new("").is_valid());
        assert!(!ServiceId::new("-leading-dash").is_valid());
        assert!(!ServiceId::new("has space").is_valid());
    }

    #[test]
    fn test_port_protocol_parse() {
        assert_eq!(PortProtocol::parse("TCP"), Some(PortProtocol::Tcp));
        assert_eq!(PortProtocol::parse("UDP"), Some(PortProtocol::Udp));
        assert_eq!(PortProtocol::parse("TCPK"), None);
        assert_eq!(PortProtocol::Sctp.as_str(), "SCTP");
    }
}
