//! # Configuration de la pile UPnP
//!
//! La configuration est une valeur explicite, passée à chaque composant lors
//! de sa construction. Elle est chargée en trois couches :
//!
//! - la configuration par défaut intégrée (`upnpcore.yaml`)
//! - un fichier YAML optionnel, fusionné par-dessus
//! - des surcharges `PMOUPNP_CONFIG__SECTION__CLE=valeur`
//!
//! ```no_run
//! use pmoupnpcore::config::UpnpConfig;
//!
//! let config = UpnpConfig::load(None, std::env::vars())?;
//! println!("max-age = {}", config.ssdp.max_age);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use url::Url;

use crate::message::ServerInfo;

const DEFAULT_CONFIG: &str = include_str!("upnpcore.yaml");
const ENV_PREFIX: &str = "PMOUPNP_CONFIG__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub local_address: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsdpConfig {
    pub max_age: u32,
    pub search_mx: u32,
    pub exact_device_type_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub maintenance_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenaConfig {
    pub min_subscription_secs: u32,
    pub max_subscription_secs: u32,
    pub default_subscription_secs: u32,
    pub renewal_margin_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub os_name: String,
    pub os_version: String,
    pub product_name: String,
    pub product_version: String,
    pub path_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpnpConfig {
    pub network: NetworkConfig,
    pub ssdp: SsdpConfig,
    pub registry: RegistryConfig,
    pub gena: GenaConfig,
    pub control: ControlConfig,
    pub server: ServerConfig,
}

impl Default for UpnpConfig {
    /// Configuration intégrée, sans fichier ni environnement.
    fn default() -> Self {
        serde_yaml::from_str(DEFAULT_CONFIG).expect("embedded upnpcore.yaml is valid")
    }
}

impl UpnpConfig {
    /// Charge la configuration.
    ///
    /// # Arguments
    ///
    /// * `file` - Fichier YAML optionnel fusionné par-dessus les valeurs intégrées
    /// * `env` - Paires (clé, valeur), typiquement `std::env::vars()`
    pub fn load<I>(file: Option<&Path>, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Some(path) = file {
            let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let external: Value = serde_yaml::from_slice(&data)?;
            merge_yaml(&mut value, &lower_keys(external));
            info!(config_file=%path.display(), "Loaded UPnP config file");
        }

        apply_env_overrides(&mut value, env);

        let config: UpnpConfig = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let g = &self.gena;
        if g.min_subscription_secs == 0 || g.min_subscription_secs > g.max_subscription_secs {
            return Err(anyhow!(
                "gena: invalid subscription bounds [{}, {}]",
                g.min_subscription_secs,
                g.max_subscription_secs
            ));
        }
        if self.ssdp.max_age < 4 {
            return Err(anyhow!("ssdp.max_age must be at least 4 seconds"));
        }
        if self.registry.maintenance_interval_ms == 0 {
            return Err(anyhow!("registry.maintenance_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Adresse annoncée : celle configurée, sinon celle de l'interface par défaut.
    pub fn local_ip(&self) -> IpAddr {
        self.network
            .local_address
            .parse()
            .unwrap_or_else(|_| guess_local_ip())
    }

    /// URL de base des ressources HTTP locales.
    pub fn base_url(&self) -> Result<Url> {
        let ip = self.local_ip();
        let host = match ip {
            IpAddr::V6(v6) => format!("[{}]", v6),
            IpAddr::V4(v4) => v4.to_string(),
        };
        Ok(Url::parse(&format!("http://{}:{}/", host, self.network.http_port))?)
    }

    pub fn server_info(&self) -> ServerInfo {
        let s = &self.server;
        let or = |v: &str, d: &str| if v.is_empty() { d.to_string() } else { v.to_string() };
        ServerInfo::new(
            &or(&s.os_name, std::env::consts::OS),
            &or(&s.os_version, "1.0"),
            &or(&s.product_name, "PMOMusic"),
            &or(&s.product_version, "0.1"),
        )
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.registry.maintenance_interval_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control.timeout_secs)
    }
}

/// Devine l'adresse IP locale via l'interface de la route par défaut.
///
/// Aucun paquet n'est émis : `connect` sur un socket UDP ne fait que choisir
/// l'interface. Retourne `127.0.0.1` en cas d'échec.
pub fn guess_local_ip() -> IpAddr {
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip();
                }
            }
            loopback
        }
        Err(_) => loopback,
    }
}

fn apply_env_overrides<I>(config: &mut Value, env: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in env {
        if let Some(path) = key.strip_prefix(ENV_PREFIX) {
            let key_path: Vec<String> = path.split("__").map(|k| k.to_lowercase()).collect();
            debug!("Config override {} from environment", key_path.join("."));
            let yaml_value = convert_env_value(&value);
            if let Err(e) = set_value(config, &key_path, yaml_value) {
                debug!("Ignoring override {}: {}", key, e);
            }
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn set_value(data: &mut Value, path: &[String], value: Value) -> Result<()> {
    let Some((key, rest)) = path.split_first() else {
        *data = value;
        return Ok(());
    };
    match data {
        Value::Mapping(map) => {
            let entry = map
                .entry(Value::String(key.clone()))
                .or_insert(Value::Mapping(Mapping::new()));
            set_value(entry, rest, value)
        }
        _ => Err(anyhow!("Current node is not a map")),
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| match k {
                    Value::String(s) => (Value::String(s.to_lowercase()), lower_keys(v)),
                    other => (other, lower_keys(v)),
                })
                .collect(),
        ),
        other => other,
    }
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
