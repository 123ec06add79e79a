//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Explicit path: --config-file
//! 2. Current directory: ./stackctl.toml or ./.stackctl/config.toml
//! 3. User config: ~/.stackctl/config.toml
//! 4. System config: /etc/stackctl/config.toml

use crate::config::{ClusterConfig, ConfigError};
use crate::env;
use std::env as std_env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration, searching from the current directory
    pub fn discover_config(
        config_override: Option<&Path>,
    ) -> Result<(ClusterConfig, PathBuf), ConfigError> {
        let current_dir = std_env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::discover_config_in(&current_dir, config_override)
    }

    /// Discover and load configuration, searching from `workspace`
    pub fn discover_config_in(
        workspace: &Path,
        config_override: Option<&Path>,
    ) -> Result<(ClusterConfig, PathBuf), ConfigError> {
        if let Some(path) = config_override {
            info!("Loading configuration override from: {:?}", path);
            return Ok((ClusterConfig::from_toml_file(path)?, path.to_path_buf()));
        }

        let candidates = Self::config_candidates(workspace);
        match Self::find_config_file(&candidates) {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                Ok((ClusterConfig::from_toml_file(&path)?, path))
            }
            None => Err(ConfigError::NotFound {
                searched: candidates,
            }),
        }
    }

    /// First existing file among `candidates`
    pub fn find_config_file(candidates: &[PathBuf]) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate.clone());
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    pub fn config_candidates(workspace: &Path) -> Vec<PathBuf> {
        let mut candidates = vec![
            workspace.join(env::LOCAL_CONFIG_FILE_NAME),
            env::local_config_file_path(workspace),
        ];

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/stackctl/config.toml"));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(PathBuf::from(program_data).join("stackctl").join("config.toml"));
        }

        candidates
    }

    /// Get home directory path
    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info(config_override: Option<&Path>) {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let current_dir = std_env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut candidates = Self::config_candidates(&current_dir);
        if let Some(path) = config_override {
            candidates.insert(0, path.to_path_buf());
        }

        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file(&candidates) {
            Some(found) => match ClusterConfig::from_toml_file(&found) {
                Ok(config) => println!(
                    "Active configuration: {:?} (cluster {:?} in {})",
                    found,
                    config.name(),
                    config.region()
                ),
                Err(err) => println!("Active configuration: {:?} (invalid: {})", found, err),
            },
            None => println!("Active configuration: none"),
        }
    }
}
