//! Router configuration.
//!
//! Everything the router needs at startup: where to listen, how the CD
//! space is divided among rendezvous points, and which links, FIB entries
//! and RPs to set up before the console takes over.

use core::time::Duration;
use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{name::ContentName, platform::DEFAULT_POLL_INTERVAL, tables::rendezvous::RpMappingTable};

pub const DEFAULT_PORT: u16 = 9696;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Names of the rendezvous points this router hosts.
    #[serde(default)]
    pub rps: Vec<String>,

    #[serde(default)]
    pub router: ListenConfig,

    /// CD prefix to RP mappings. When empty everything maps to `/RP`.
    #[serde(default)]
    pub rp_mappings: Vec<RpMappingConfig>,

    /// Links to establish at startup.
    #[serde(default)]
    pub links: Vec<LinkConfig>,

    /// FIB entries to add at startup; each must name a configured link.
    #[serde(default)]
    pub fibs: Vec<FibConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// How often receive loops check for a stop request.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpMappingConfig {
    pub prefix: String,
    pub rp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub address: String,
    #[serde(default)]
    pub is_router: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibConfig {
    pub prefix: String,
    pub address: String,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: DEFAULT_PORT,
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rps: Vec::new(),
            router: ListenConfig::default(),
            rp_mappings: Vec::new(),
            links: Vec::new(),
            fibs: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A configuration showing every section.
    pub fn example() -> Self {
        Self {
            rps: vec!["/RP2".to_string()],
            router: ListenConfig::default(),
            rp_mappings: vec![
                RpMappingConfig {
                    prefix: "/sports".to_string(),
                    rp: "/RP1".to_string(),
                },
                RpMappingConfig {
                    prefix: "/news".to_string(),
                    rp: "/RP2".to_string(),
                },
            ],
            links: vec![LinkConfig {
                address: "10.0.0.2:9696".to_string(),
                is_router: true,
            }],
            fibs: vec![FibConfig {
                prefix: "/RP1".to_string(),
                address: "10.0.0.2:9696".to_string(),
            }],
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.router.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".into(),
            ));
        }

        let mut prefixes = HashSet::new();
        for (i, mapping) in self.rp_mappings.iter().enumerate() {
            let prefix = parse_name(&mapping.prefix, &format!("rp_mappings[{i}].prefix"))?;
            parse_name(&mapping.rp, &format!("rp_mappings[{i}].rp"))?;
            if !prefixes.insert(prefix) {
                return Err(ConfigError::Invalid(format!(
                    "Prefix {} is mapped more than once",
                    mapping.prefix
                )));
            }
        }

        let mut linked = HashSet::new();
        for (i, link) in self.links.iter().enumerate() {
            linked.insert(parse_addr(&link.address, &format!("links[{i}].address"))?);
        }

        for (i, fib) in self.fibs.iter().enumerate() {
            parse_name(&fib.prefix, &format!("fibs[{i}].prefix"))?;
            let addr = parse_addr(&fib.address, &format!("fibs[{i}].address"))?;
            if !linked.contains(&addr) {
                return Err(ConfigError::Invalid(format!(
                    "FIB entry {} uses {}, which is not a configured link",
                    fib.prefix, fib.address
                )));
            }
        }

        for (i, rp) in self.rps.iter().enumerate() {
            parse_name(rp, &format!("rps[{i}]"))?;
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.router.listen_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "listen_address {:?} is not an IP address",
                self.router.listen_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.router.listen_port))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.router.poll_interval_ms.max(1))
    }

    pub fn rp_mapping_table(&self) -> Result<RpMappingTable, ConfigError> {
        if self.rp_mappings.is_empty() {
            return Ok(RpMappingTable::default());
        }
        let mut table = RpMappingTable::empty();
        for (i, mapping) in self.rp_mappings.iter().enumerate() {
            table.insert(
                parse_name(&mapping.prefix, &format!("rp_mappings[{i}].prefix"))?,
                parse_name(&mapping.rp, &format!("rp_mappings[{i}].rp"))?,
            );
        }
        Ok(table)
    }

    pub fn links(&self) -> Result<Vec<(SocketAddr, bool)>, ConfigError> {
        self.links
            .iter()
            .enumerate()
            .map(|(i, link)| {
                Ok((
                    parse_addr(&link.address, &format!("links[{i}].address"))?,
                    link.is_router,
                ))
            })
            .collect()
    }

    pub fn fibs(&self) -> Result<Vec<(ContentName, SocketAddr)>, ConfigError> {
        self.fibs
            .iter()
            .enumerate()
            .map(|(i, fib)| {
                Ok((
                    parse_name(&fib.prefix, &format!("fibs[{i}].prefix"))?,
                    parse_addr(&fib.address, &format!("fibs[{i}].address"))?,
                ))
            })
            .collect()
    }

    pub fn rp_names(&self) -> Result<Vec<ContentName>, ConfigError> {
        self.rps
            .iter()
            .enumerate()
            .map(|(i, rp)| parse_name(rp, &format!("rps[{i}]")))
            .collect()
    }
}

fn parse_name(uri: &str, field: &str) -> Result<ContentName, ConfigError> {
    if uri.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} is empty")));
    }
    uri.trim()
        .parse()
        .map_err(|err| ConfigError::Invalid(format!("{field}: {err}")))
}

fn parse_addr(addr: &str, field: &str) -> Result<SocketAddr, ConfigError> {
    addr.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{field}: {addr:?} is not a socket address")))
}
