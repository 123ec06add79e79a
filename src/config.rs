//! Cluster configuration file.
//!
//! A single TOML document describes the desired cluster: its metadata, the
//! nodegroups and addons it should carry, engine settings and the behaviour
//! of the local provisioning backend.
//!
//! ```toml
//! [metadata]
//! name = "dev"
//! region = "us-west-2"
//!
//! [[nodegroups]]
//! name = "ng-1"
//! desired_capacity = 2
//!
//! [[managed_nodegroups]]
//! name = "mng-1"
//! propagate_asg_tags = true
//! tags = { team = "platform" }
//!
//! [[addons]]
//! name = "vpc-cni"
//! version = "v1.18.0"
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][-a-zA-Z0-9]*$").expect("valid name pattern"));

/// Upper bound on resource names; stack names embed them
const MAX_NAME_LENGTH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no configuration file found; searched {}", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("nodegroup {0:?} is not defined in the config")]
    UnknownNodeGroup(String),

    #[error("addon {0:?} is not defined in the config")]
    UnknownAddon(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("{:?}", p))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    pub metadata: ClusterMeta,
    #[serde(default)]
    pub nodegroups: Vec<NodeGroupSpec>,
    #[serde(default)]
    pub managed_nodegroups: Vec<NodeGroupSpec>,
    #[serde(default)]
    pub addons: Vec<AddonSpec>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterMeta {
    pub name: String,
    pub region: String,
    #[serde(default = "default_kubernetes_version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeGroupSpec {
    pub name: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_desired_capacity")]
    pub desired_capacity: u32,
    /// Nodes that must report Ready before the nodegroup counts as joined;
    /// defaults to `desired_capacity`
    #[serde(default)]
    pub min_ready: Option<u32>,
    #[serde(default)]
    pub instance_role_arn: Option<String>,
    /// Managed nodegroups only: copy `tags` to the backing autoscaling group
    #[serde(default)]
    pub propagate_asg_tags: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl NodeGroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_type: default_instance_type(),
            desired_capacity: default_desired_capacity(),
            min_ready: None,
            instance_role_arn: None,
            propagate_asg_tags: false,
            tags: BTreeMap::new(),
        }
    }

    pub fn min_ready_nodes(&self) -> u32 {
        self.min_ready.unwrap_or(self.desired_capacity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddonSpec {
    pub name: String,
    pub version: String,
}

/// Engine and collaborator timing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Upper bound for a single stack or readiness wait
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    /// Reconcile the node authorization map after nodegroup changes
    pub update_auth_map: bool,
    /// Wait for nodes to report Ready after nodegroup creation
    pub wait_for_nodes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 1500,
            poll_interval_ms: 2000,
            max_poll_interval_ms: 30_000,
            update_auth_map: true,
            wait_for_nodes: true,
        }
    }
}

impl Settings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

/// Behaviour of the local provisioning backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time a stack operation stays in progress
    pub latency_ms: u64,
    /// Resource names (cluster, nodegroup or addon) whose stack operations fail
    pub fail_resources: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 500,
            fail_resources: Vec::new(),
        }
    }
}

fn default_kubernetes_version() -> String {
    "1.30".to_string()
}

fn default_instance_type() -> String {
    "m5.large".to_string()
}

fn default_desired_capacity() -> u32 {
    2
}

impl ClusterConfig {
    /// Minimal config with no nodegroups or addons
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            metadata: ClusterMeta {
                name: name.into(),
                region: region.into(),
                version: default_kubernetes_version(),
            },
            nodegroups: Vec::new(),
            managed_nodegroups: Vec::new(),
            addons: Vec::new(),
            settings: Settings::default(),
            simulation: SimulationConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn region(&self) -> &str {
        &self.metadata.region
    }

    /// Check names, uniqueness and capacities
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("cluster", &self.metadata.name)?;
        if self.metadata.region.trim().is_empty() {
            return Err(ConfigError::Invalid("metadata.region must be set".to_string()));
        }

        let mut seen = HashSet::new();
        for ng in self.nodegroups.iter().chain(&self.managed_nodegroups) {
            validate_name("nodegroup", &ng.name)?;
            if !seen.insert(ng.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "nodegroup {:?} is defined more than once",
                    ng.name
                )));
            }
            if ng.min_ready_nodes() > ng.desired_capacity {
                return Err(ConfigError::Invalid(format!(
                    "nodegroup {:?}: min_ready ({}) exceeds desired_capacity ({})",
                    ng.name,
                    ng.min_ready_nodes(),
                    ng.desired_capacity
                )));
            }
        }
        for ng in &self.nodegroups {
            if ng.propagate_asg_tags {
                return Err(ConfigError::Invalid(format!(
                    "nodegroup {:?}: propagate_asg_tags is only supported for managed nodegroups",
                    ng.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for addon in &self.addons {
            validate_name("addon", &addon.name)?;
            if addon.version.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "addon {:?} has an empty version",
                    addon.name
                )));
            }
            if !seen.insert(addon.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "addon {:?} is defined more than once",
                    addon.name
                )));
            }
        }

        if self.settings.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "settings.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Names of every nodegroup, unmanaged first
    pub fn nodegroup_names(&self) -> Vec<&str> {
        self.nodegroups
            .iter()
            .chain(&self.managed_nodegroups)
            .map(|ng| ng.name.as_str())
            .collect()
    }

    /// Split the nodegroups selected by `only` (all when empty) into
    /// unmanaged and managed sets
    pub fn select_nodegroups(
        &self,
        only: &[String],
    ) -> Result<(Vec<NodeGroupSpec>, Vec<NodeGroupSpec>), ConfigError> {
        for name in only {
            if !self.nodegroup_names().contains(&name.as_str()) {
                return Err(ConfigError::UnknownNodeGroup(name.clone()));
            }
        }
        let selected = |ng: &&NodeGroupSpec| only.is_empty() || only.contains(&ng.name);
        Ok((
            self.nodegroups.iter().filter(selected).cloned().collect(),
            self.managed_nodegroups.iter().filter(selected).cloned().collect(),
        ))
    }

    pub fn select_addons(&self, only: &[String]) -> Result<Vec<AddonSpec>, ConfigError> {
        for name in only {
            if !self.addons.iter().any(|addon| &addon.name == name) {
                return Err(ConfigError::UnknownAddon(name.clone()));
            }
        }
        Ok(self
            .addons
            .iter()
            .filter(|addon| only.is_empty() || only.contains(&addon.name))
            .cloned()
            .collect())
    }
}

fn validate_name(kind: &str, name: &str) -> Result<(), ConfigError> {
    if !NAME_PATTERN.is_match(name) || name.len() > MAX_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!(
            "{} name {:?} must start with a letter, contain only letters, digits and '-', and be at most {} characters",
            kind, name, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[metadata]
name = "dev"
region = "us-west-2"

[[nodegroups]]
name = "ng-1"
desired_capacity = 3
min_ready = 2

[[managed_nodegroups]]
name = "mng-1"
propagate_asg_tags = true
tags = { team = "platform" }

[[addons]]
name = "vpc-cni"
version = "v1.18.0"

[settings]
wait_timeout_secs = 60
"#;

    #[test]
    fn test_parse_sample() {
        let config = ClusterConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.name(), "dev");
        assert_eq!(config.metadata.version, "1.30");
        assert_eq!(config.nodegroups[0].min_ready_nodes(), 2);
        assert_eq!(config.managed_nodegroups[0].desired_capacity, 2);
        assert_eq!(config.managed_nodegroups[0].tags["team"], "platform");
        assert_eq!(config.settings.wait_timeout(), Duration::from_secs(60));
        assert_eq!(config.settings.poll_interval_ms, 2000);
        assert_eq!(config.simulation.latency_ms, 500);
    }

    #[test]
    fn test_rejects_invalid_names() {
        let mut config = ClusterConfig::new("dev", "us-west-2");
        config.nodegroups.push(NodeGroupSpec::new("1bad_name"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicate_nodegroups() {
        let mut config = ClusterConfig::new("dev", "us-west-2");
        config.nodegroups.push(NodeGroupSpec::new("ng-1"));
        config.managed_nodegroups.push(NodeGroupSpec::new("ng-1"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn test_rejects_tag_propagation_on_unmanaged() {
        let mut config = ClusterConfig::new("dev", "us-west-2");
        let mut ng = NodeGroupSpec::new("ng-1");
        ng.propagate_asg_tags = true;
        config.nodegroups.push(ng);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select_nodegroups() {
        let config = ClusterConfig::from_toml_str(SAMPLE).unwrap();

        let (unmanaged, managed) = config.select_nodegroups(&[]).unwrap();
        assert_eq!(unmanaged.len(), 1);
        assert_eq!(managed.len(), 1);

        let (unmanaged, managed) = config.select_nodegroups(&["mng-1".to_string()]).unwrap();
        assert!(unmanaged.is_empty());
        assert_eq!(managed[0].name, "mng-1");

        assert!(matches!(
            config.select_nodegroups(&["missing".to_string()]),
            Err(ConfigError::UnknownNodeGroup(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_select_addons() {
        let config = ClusterConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.select_addons(&[]).unwrap().len(), 1);
        assert!(config.select_addons(&["coredns".to_string()]).is_err());
    }
}
