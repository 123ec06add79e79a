//! Environment constants and path utilities for stackctl.
//!
//! This module centralizes hardcoded paths, directory names and stack naming
//! conventions used throughout the application.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git)
pub const STACKCTL_DIR_NAME: &str = ".stackctl";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "stackctl.toml";

/// Directory holding the local backend's stack snapshots
pub const STATE_DIR_NAME: &str = "state";

/// Default tracing filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "stackctl=info";

/// Tracing filter used with `--verbose`
pub const VERBOSE_LOG_FILTER: &str = "stackctl=debug";

/// Stack naming conventions
pub mod stack {
    /// Prefix shared by every stack the tool owns
    pub const STACK_PREFIX: &str = "stackctl";

    /// Template version written into every stack; older stacks are upgraded
    /// by the cluster compatibility task
    pub const TEMPLATE_VERSION: u32 = 3;

    /// Parameter key carrying the template version
    pub const TEMPLATE_VERSION_KEY: &str = "TemplateVersion";

    /// Parameter key carrying the desired node count of a nodegroup
    pub const DESIRED_CAPACITY_KEY: &str = "DesiredCapacity";

    /// Parameter key carrying the Kubernetes version of a cluster or nodegroup
    pub const KUBERNETES_VERSION_KEY: &str = "KubernetesVersion";

    /// Parameter key carrying the version of an addon
    pub const ADDON_VERSION_KEY: &str = "AddonVersion";

    /// Output key carrying the instance role of a nodegroup
    pub const INSTANCE_ROLE_OUTPUT: &str = "InstanceRoleARN";

    /// Tag naming the cluster a stack belongs to
    pub const CLUSTER_NAME_TAG: &str = "stackctl.io/cluster-name";

    /// Tag naming the nodegroup a stack belongs to
    pub const NODEGROUP_NAME_TAG: &str = "stackctl.io/nodegroup-name";
}

/// Build the main .stackctl directory path from a workspace root
pub fn stackctl_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STACKCTL_DIR_NAME)
}

/// Build the local config file path (.stackctl/config.toml) from a workspace root
pub fn local_config_file_path(workspace_root: &Path) -> PathBuf {
    stackctl_dir_path(workspace_root).join(CONFIG_FILE_NAME)
}

/// Build the user config file path (~/.stackctl/config.toml) from a home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    home_dir.join(STACKCTL_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build the snapshot file path of the local backend for one cluster
pub fn state_file_path(workspace_root: &Path, cluster: &str) -> PathBuf {
    stackctl_dir_path(workspace_root)
        .join(STATE_DIR_NAME)
        .join(format!("{}.json", cluster))
}

/// Build the authorization map file path of the local workload for one cluster
pub fn auth_map_file_path(workspace_root: &Path, cluster: &str) -> PathBuf {
    stackctl_dir_path(workspace_root)
        .join(STATE_DIR_NAME)
        .join(format!("{}-auth-map.json", cluster))
}

/// Stack name of the cluster control plane
pub fn cluster_stack_name(cluster: &str) -> String {
    format!("{}-{}-cluster", stack::STACK_PREFIX, cluster)
}

/// Stack name of a nodegroup (managed or unmanaged)
pub fn nodegroup_stack_name(cluster: &str, nodegroup: &str) -> String {
    format!("{}-{}-nodegroup-{}", stack::STACK_PREFIX, cluster, nodegroup)
}

/// Stack name of an addon's IAM resources
pub fn addon_stack_name(cluster: &str, addon: &str) -> String {
    format!("{}-{}-addon-{}", stack::STACK_PREFIX, cluster, addon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_names() {
        assert_eq!(cluster_stack_name("dev"), "stackctl-dev-cluster");
        assert_eq!(nodegroup_stack_name("dev", "ng-1"), "stackctl-dev-nodegroup-ng-1");
        assert_eq!(addon_stack_name("dev", "vpc-cni"), "stackctl-dev-addon-vpc-cni");
    }

    #[test]
    fn test_paths() {
        let root = Path::new("/work");
        assert_eq!(
            local_config_file_path(root),
            PathBuf::from("/work/.stackctl/config.toml")
        );
        assert_eq!(
            state_file_path(root, "dev"),
            PathBuf::from("/work/.stackctl/state/dev.json")
        );
        assert_eq!(
            auth_map_file_path(root, "dev"),
            PathBuf::from("/work/.stackctl/state/dev-auth-map.json")
        );
        assert_eq!(
            user_config_file_path(Path::new("/home/me")),
            PathBuf::from("/home/me/.stackctl/config.toml")
        );
    }
}
