//! Relay configuration.
//!
//! Process settings are env-driven. The listener set lives in a TOML file
//! whose path is one of those settings:
//!
//! ```toml
//! [[proxy_servers]]
//! port = 8080
//! destination = { address = "127.0.0.1", port = 9090 }
//!
//! [[proxy_servers]]
//! domain = "ipv6"
//! interface = "::1"
//! port = 8443
//! destination = { address = "backend.internal", port = 443 }
//! ```

use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Listener file used when `RELAY_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/splice-relay/config.toml";

/// Process configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the listener file.
    pub config_path: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config_path = std::env::var_os("RELAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let log_level = std::env::var("RELAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match std::env::var("RELAY_LOG_FORMAT") {
            Err(_) => LogFormat::Json,
            Ok(v) => match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                other => bail!("RELAY_LOG_FORMAT must be json or compact, got {other:?}."),
            },
        };

        Ok(Self {
            config_path,
            log_level,
            log_format,
        })
    }
}

/// Address family of a listener and its destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    #[default]
    Ipv4,
    Ipv6,
}

impl Domain {
    /// The wildcard address of this family.
    pub fn any(self) -> IpAddr {
        match self {
            Domain::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Domain::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// Whether `ip` belongs to this family.
    pub fn contains(self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (Domain::Ipv4, IpAddr::V4(_)) | (Domain::Ipv6, IpAddr::V6(_))
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Ipv4 => "ipv4",
            Domain::Ipv6 => "ipv6",
        }
    }
}

/// Socket type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    #[default]
    Stream,
    Datagram,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Stream => "stream",
            Service::Datagram => "datagram",
        }
    }
}

/// Transport protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Fixed destination of a listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Destination {
    /// Host name or IP literal.
    pub address: String,
    /// Destination port.
    pub port: u16,
}

/// One configured proxy entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Address family.
    #[serde(default)]
    pub domain: Domain,
    /// Socket type.
    #[serde(default)]
    pub service: Service,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Bind address; the family's wildcard when absent.
    #[serde(default)]
    pub interface: Option<IpAddr>,
    /// Bind port.
    pub port: u16,
    /// Where accepted connections are forwarded.
    pub destination: Destination,
}

impl ListenerConfig {
    /// Create an IPv4 TCP listener config bound to all interfaces.
    pub fn new(port: u16, destination_address: impl Into<String>, destination_port: u16) -> Self {
        Self {
            domain: Domain::default(),
            service: Service::default(),
            protocol: Protocol::default(),
            interface: None,
            port,
            destination: Destination {
                address: destination_address.into(),
                port: destination_port,
            },
        }
    }

    /// Set the bind interface.
    pub fn with_interface(mut self, interface: IpAddr) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Socket address the listener binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.interface.unwrap_or_else(|| self.domain.any()), self.port)
    }

    /// Whether the transport supports `listen`/`accept`.
    pub fn is_connection_oriented(&self) -> bool {
        self.service == Service::Stream && self.protocol == Protocol::Tcp
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be nonzero");
        }
        if self.destination.port == 0 {
            bail!("destination.port must be nonzero");
        }
        if self.destination.address.trim().is_empty() {
            bail!("destination.address must not be empty");
        }
        if let Some(interface) = &self.interface {
            if !self.domain.contains(interface) {
                bail!(
                    "interface {} is not an {} address",
                    interface,
                    self.domain.as_str()
                );
            }
        }
        Ok(())
    }
}

impl fmt::Display for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{}",
            self.bind_addr(),
            self.destination.address,
            self.destination.port
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListenerFile {
    proxy_servers: Vec<ListenerConfig>,
}

/// Parse and validate a listener file's contents.
pub fn parse_listeners(contents: &str) -> Result<Vec<ListenerConfig>> {
    let file: ListenerFile = toml::from_str(contents).context("Invalid listener file")?;

    for (index, listener) in file.proxy_servers.iter().enumerate() {
        listener
            .validate()
            .with_context(|| format!("proxy_servers[{}] is invalid", index))?;
    }

    Ok(file.proxy_servers)
}

/// Read, parse and validate the listener file at `path`.
pub fn load_listeners(path: &Path) -> Result<Vec<ListenerConfig>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read listener file {:?}", path))?;

    parse_listeners(&contents).with_context(|| format!("Failed to load {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_applied() {
        let listeners = parse_listeners(
            r#"
            [[proxy_servers]]
            port = 8080
            destination = { address = "127.0.0.1", port = 9090 }
            "#,
        )
        .unwrap();

        assert_eq!(listeners.len(), 1);
        let listener = &listeners[0];
        assert_eq!(listener.domain, Domain::Ipv4);
        assert_eq!(listener.service, Service::Stream);
        assert_eq!(listener.protocol, Protocol::Tcp);
        assert_eq!(listener.bind_addr(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(listener, &ListenerConfig::new(8080, "127.0.0.1", 9090));
    }

    #[test]
    fn test_full_entry() {
        let listeners = parse_listeners(
            r#"
            [[proxy_servers]]
            domain = "ipv6"
            service = "stream"
            protocol = "tcp"
            interface = "::1"
            port = 8443

            [proxy_servers.destination]
            address = "backend.internal"
            port = 443
            "#,
        )
        .unwrap();

        let listener = &listeners[0];
        assert_eq!(listener.domain, Domain::Ipv6);
        assert_eq!(listener.bind_addr(), "[::1]:8443".parse().unwrap());
        assert_eq!(listener.destination.address, "backend.internal");
        assert!(listener.is_connection_oriented());
    }

    #[test]
    fn test_order_preserved() {
        let listeners = parse_listeners(
            r#"
            [[proxy_servers]]
            port = 1
            destination = { address = "a", port = 10 }

            [[proxy_servers]]
            port = 2
            destination = { address = "b", port = 20 }
            "#,
        )
        .unwrap();

        let ports: Vec<u16> = listeners.iter().map(|l| l.port).collect();
        assert_eq!(ports, vec![1, 2]);
    }

    #[test]
    fn test_empty_list_is_valid() {
        let listeners = parse_listeners("proxy_servers = []").unwrap();
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_missing_array_rejected() {
        assert!(parse_listeners("").is_err());
        assert!(parse_listeners("other = 1").is_err());
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let no_port = r#"
            [[proxy_servers]]
            destination = { address = "127.0.0.1", port = 9090 }
        "#;
        assert!(parse_listeners(no_port).is_err());

        let no_destination_port = r#"
            [[proxy_servers]]
            port = 8080
            destination = { address = "127.0.0.1" }
        "#;
        assert!(parse_listeners(no_destination_port).is_err());
    }

    #[test]
    fn test_validation() {
        let zero_port = r#"
            [[proxy_servers]]
            port = 0
            destination = { address = "127.0.0.1", port = 9090 }
        "#;
        let err = parse_listeners(zero_port).unwrap_err();
        assert!(format!("{:#}", err).contains("proxy_servers[0]"));

        let family_mismatch = r#"
            [[proxy_servers]]
            interface = "::1"
            port = 8080
            destination = { address = "127.0.0.1", port = 9090 }
        "#;
        assert!(parse_listeners(family_mismatch).is_err());

        let blank_destination = r#"
            [[proxy_servers]]
            port = 8080
            destination = { address = " ", port = 9090 }
        "#;
        assert!(parse_listeners(blank_destination).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let typo = r#"
            [[proxy_servers]]
            prot = 8080
            port = 8080
            destination = { address = "127.0.0.1", port = 9090 }
        "#;
        assert!(parse_listeners(typo).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[proxy_servers]]\nport = 8080\ndestination = {{ address = \"localhost\", port = 9090 }}"
        )
        .unwrap();

        let listeners = load_listeners(file.path()).unwrap();
        assert_eq!(listeners[0].to_string(), "0.0.0.0:8080 -> localhost:9090");
    }

    #[test]
    fn test_example_file_parses() {
        let listeners = parse_listeners(include_str!("../config.example.toml")).unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[1].domain, Domain::Ipv6);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_listeners(&dir.path().join("absent.toml")).is_err());
    }
}
