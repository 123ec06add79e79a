use serial_test::serial;
use stackctl::ConfigError;
use stackctl::cli::ConfigDiscovery;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const CLUSTER: &str = r#"
[metadata]
name = "dev"
region = "us-west-2"

[[nodegroups]]
name = "ng-1"
"#;

/// RAII guard that restores the original directory when dropped
struct DirectoryGuard {
    original_dir: PathBuf,
}

impl DirectoryGuard {
    fn new(workspace: &std::path::Path) -> Result<Self, std::io::Error> {
        let original_dir = std::env::current_dir()?;
        std::env::set_current_dir(workspace)?;
        Ok(Self { original_dir })
    }
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        // Restore original directory - ignore errors as we might be in a deleted directory
        let _ = std::env::set_current_dir(&self.original_dir);
    }
}

#[test]
#[serial]
fn test_discovers_config_in_current_directory() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("stackctl.toml"), CLUSTER).unwrap();
    let _guard = DirectoryGuard::new(temp_dir.path()).unwrap();

    let (config, path) = ConfigDiscovery::discover_config(None).unwrap();
    assert_eq!(config.name(), "dev");
    assert_eq!(config.nodegroups.len(), 1);
    assert!(path.ends_with("stackctl.toml"));
}

#[test]
#[serial]
fn test_discovers_hidden_config_directory() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join(".stackctl")).unwrap();
    fs::write(temp_dir.path().join(".stackctl/config.toml"), CLUSTER).unwrap();
    let _guard = DirectoryGuard::new(temp_dir.path()).unwrap();

    let (_, path) = ConfigDiscovery::discover_config(None).unwrap();
    assert!(path.ends_with(".stackctl/config.toml"));
}

#[test]
#[serial]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("stackctl.toml"),
        CLUSTER.replace("ng-1", "ng_1"),
    )
    .unwrap();
    let _guard = DirectoryGuard::new(temp_dir.path()).unwrap();

    let err = ConfigDiscovery::discover_config(None).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
