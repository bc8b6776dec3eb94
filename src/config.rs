// src/config.rs

use std::{collections::HashMap, env, path::PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use flow_store::{FlowDocument, RuntimeSettings};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    bridge::BridgePorts,
    error::{BridgeError, Result},
};

/// Where the component reads its attributes from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
}

/// The platform dictionary: attribute name → value.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    map: DashMap<String, String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }
}

impl From<HashMap<String, String>> for MapConfigSource {
    fn from(values: HashMap<String, String>) -> Self {
        Self {
            map: values.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ConfigSource for MapConfigSource {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }
}

/// Attributes from the process environment, `userDir` → `NODERED_USER_DIR`.
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
}

impl EnvConfigSource {
    pub const PREFIX: &'static str = "NODERED_";

    /// Read the environment, loading `env_file` into it first when it exists.
    pub fn new(env_file: Option<PathBuf>) -> Self {
        if let Some(path) = env_file {
            if path.exists() {
                match dotenvy::from_path(&path) {
                    Ok(()) => info!("Loaded .env from {}", path.display()),
                    Err(err) => warn!("could not load .env from {}: {err}", path.display()),
                }
            } else {
                warn!("no .env at {}", path.display());
            }
        }
        Self {
            prefix: Self::PREFIX.to_string(),
        }
    }

    /// Environment variable name for an attribute key.
    pub fn var_name(&self, key: &str) -> String {
        let mut name = self.prefix.clone();
        for c in key.chars() {
            if c.is_ascii_uppercase() {
                name.push('_');
            }
            name.push(c.to_ascii_uppercase());
        }
        name
    }
}

#[async_trait]
impl ConfigSource for EnvConfigSource {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(self.var_name(key)).ok()
    }
}

/// Attributes of the Node-RED component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Port of the HTTP server hosting the editor.
    pub port: u16,
    /// Directory the flow runtime keeps its files in. Required.
    pub user_dir: Option<String>,
    pub http_admin_root: String,
    pub http_node_root: String,
    /// JSON flow document to deploy.
    pub flows: Option<String>,
    /// Interface the HTTP server binds to.
    pub host: String,
    /// Local port of the input bridge endpoint.
    pub in_port: u16,
    /// Local port of the output bridge endpoint.
    pub out_port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            user_dir: None,
            http_admin_root: "/".into(),
            http_node_root: "/red".into(),
            flows: None,
            host: "0.0.0.0".into(),
            in_port: 9091,
            out_port: 9092,
        }
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value.trim().parse().map_err(|_| {
        BridgeError::Configuration(format!("attribute \"{key}\" must be a port number, got {value:?}"))
    })
}

impl BridgeConfig {
    /// Build a config from `source`, keeping defaults for absent attributes.
    pub async fn load(source: &dyn ConfigSource) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = source.get("port").await {
            config.port = parse_port("port", &v)?;
        }
        if let Some(v) = source.get("inPort").await {
            config.in_port = parse_port("inPort", &v)?;
        }
        if let Some(v) = source.get("outPort").await {
            config.out_port = parse_port("outPort", &v)?;
        }
        config.user_dir = source.get("userDir").await;
        if let Some(v) = source.get("httpAdminRoot").await {
            config.http_admin_root = v;
        }
        if let Some(v) = source.get("httpNodeRoot").await {
            config.http_node_root = v;
        }
        if let Some(v) = source.get("host").await {
            config.host = v;
        }
        config.flows = source.get("flows").await.filter(|f| !f.trim().is_empty());
        Ok(config)
    }

    /// Check the mandatory attributes of component `name` and derive the
    /// runtime settings from them.
    pub fn validate(&self, name: &str) -> Result<RuntimeSettings> {
        let user_dir = self
            .user_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .ok_or_else(|| {
                BridgeError::Configuration(format!("\"{name}\" attribute \"userDir\" must be set"))
            })?;
        if self.port == 0 {
            return Err(BridgeError::Configuration(format!(
                "\"{name}\" attribute \"port\" must be set"
            )));
        }
        if self.in_port == 0 || self.out_port == 0 || self.in_port == self.out_port {
            return Err(BridgeError::Configuration(format!(
                "\"{name}\" attributes \"inPort\" and \"outPort\" must be two distinct ports"
            )));
        }
        Ok(RuntimeSettings {
            user_dir: PathBuf::from(user_dir),
            http_admin_root: self.http_admin_root.clone(),
            http_node_root: self.http_node_root.clone(),
        })
    }

    pub fn ports(&self) -> BridgePorts {
        BridgePorts::new(self.in_port, self.out_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `flows` attribute as a document, `None` when unset.
    pub fn parse_flows(&self) -> Result<Option<FlowDocument>> {
        match self.flows.as_deref() {
            None => Ok(None),
            Some(text) => Ok(Some(FlowDocument::from_json(text)?)),
        }
    }
}

/// What changed between two configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Changed attributes that only take effect after a restart.
    pub restart: Vec<&'static str>,
    /// `flows` changed and can be deployed live.
    pub flows_changed: bool,
}

impl ConfigDiff {
    pub fn between(old: &BridgeConfig, new: &BridgeConfig) -> Self {
        let mut restart = Vec::new();
        if old.port != new.port {
            restart.push("port");
        }
        if old.user_dir != new.user_dir {
            restart.push("userDir");
        }
        if old.http_admin_root != new.http_admin_root {
            restart.push("httpAdminRoot");
        }
        if old.http_node_root != new.http_node_root {
            restart.push("httpNodeRoot");
        }
        if old.host != new.host {
            restart.push("host");
        }
        if old.in_port != new.in_port {
            restart.push("inPort");
        }
        if old.out_port != new.out_port {
            restart.push("outPort");
        }
        Self {
            restart,
            flows_changed: old.flows != new.flows,
        }
    }

    pub fn needs_restart(&self) -> bool {
        !self.restart.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.restart.is_empty() && !self.flows_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn defaults_apply_for_missing_attributes() {
        let src = MapConfigSource::new();
        src.set("userDir", "/tmp/red");
        let config = BridgeConfig::load(&src).await.unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.http_admin_root, "/");
        assert_eq!(config.http_node_root, "/red");
        assert_eq!(config.ports(), BridgePorts::new(9091, 9092));
        assert!(config.validate("red").is_ok());
    }

    #[tokio::test]
    async fn platform_dictionary_overrides_defaults() {
        let src = MapConfigSource::from(HashMap::from([
            ("userDir".to_string(), "/tmp/red".to_string()),
            ("inPort".to_string(), "7001".to_string()),
            ("flows".to_string(), "  ".to_string()),
        ]));
        let config = BridgeConfig::load(&src).await.unwrap();
        assert_eq!(config.user_dir.as_deref(), Some("/tmp/red"));
        assert_eq!(config.ports(), BridgePorts::new(7001, 9092));
        assert!(config.flows.is_none());
    }

    #[tokio::test]
    async fn bad_port_is_a_configuration_error() {
        let src = MapConfigSource::new();
        src.set("port", "eighty");
        assert!(matches!(
            BridgeConfig::load(&src).await,
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn missing_user_dir_names_the_component() {
        let err = BridgeConfig::default().validate("red0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: \"red0\" attribute \"userDir\" must be set"
        );
    }

    #[test]
    fn zero_port_is_rejected() {
        let config = BridgeConfig {
            port: 0,
            user_dir: Some("/tmp/red".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate("red"), Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn invalid_flows_are_a_validation_error() {
        let config = BridgeConfig {
            flows: Some("[{".into()),
            ..Default::default()
        };
        assert!(matches!(config.parse_flows(), Err(BridgeError::Validation(_))));
    }

    #[test]
    fn diff_separates_live_and_restart_changes() {
        let old = BridgeConfig::default();
        let new = BridgeConfig {
            port: 8080,
            http_node_root: "/api".into(),
            flows: Some("[]".into()),
            ..Default::default()
        };
        let diff = ConfigDiff::between(&old, &new);
        assert_eq!(diff.restart, vec!["port", "httpNodeRoot"]);
        assert!(diff.flows_changed);

        let flows_only = BridgeConfig {
            flows: Some("[]".into()),
            ..Default::default()
        };
        let diff = ConfigDiff::between(&old, &flows_only);
        assert!(!diff.needs_restart());
        assert!(ConfigDiff::between(&old, &old).is_empty());
    }

    #[test]
    fn env_var_names_follow_attribute_keys() {
        let src = EnvConfigSource::new(None);
        assert_eq!(src.var_name("userDir"), "NODERED_USER_DIR");
        assert_eq!(src.var_name("httpAdminRoot"), "NODERED_HTTP_ADMIN_ROOT");
        assert_eq!(src.var_name("port"), "NODERED_PORT");
    }

    #[tokio::test]
    async fn env_source_reads_dotenv_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        write(&env_path, "NODERED_HTTP_NODE_ROOT=/from-env-file\n").unwrap();

        let src = EnvConfigSource::new(Some(env_path));
        assert_eq!(src.get("httpNodeRoot").await, Some("/from-env-file".to_string()));
    }
}
