//! Stack requests for each resource kind.
//!
//! The templates carried here are a compact declaration of the resources a
//! stack owns; rendering them into the backend's full template language is
//! the backend's concern.

use crate::config::{AddonSpec, ClusterConfig, NodeGroupSpec};
use crate::env::{self, stack as keys};
use crate::stack::{StackKind, StackRequest};
use serde_json::json;
use std::collections::BTreeMap;

fn base_parameters() -> BTreeMap<String, String> {
    BTreeMap::from([(
        keys::TEMPLATE_VERSION_KEY.to_string(),
        keys::TEMPLATE_VERSION.to_string(),
    )])
}

fn base_tags(config: &ClusterConfig) -> BTreeMap<String, String> {
    BTreeMap::from([(keys::CLUSTER_NAME_TAG.to_string(), config.name().to_string())])
}

pub fn cluster_request(config: &ClusterConfig) -> StackRequest {
    let mut parameters = base_parameters();
    parameters.insert(
        keys::KUBERNETES_VERSION_KEY.to_string(),
        config.metadata.version.clone(),
    );

    StackRequest {
        name: env::cluster_stack_name(config.name()),
        kind: StackKind::Cluster {
            name: config.name().to_string(),
        },
        parameters,
        tags: base_tags(config),
        template: json!({
            "resources": {
                "ControlPlane": {
                    "type": "cluster",
                    "name": config.name(),
                    "region": config.region(),
                    "version": config.metadata.version,
                },
                "SharedNodeSecurityGroup": { "type": "security-group" },
            }
        }),
    }
}

/// Request for a nodegroup stack; `version` overrides the cluster version on upgrades
pub fn nodegroup_request(
    config: &ClusterConfig,
    nodegroup: &NodeGroupSpec,
    managed: bool,
    version: Option<&str>,
) -> StackRequest {
    let version = version.unwrap_or(&config.metadata.version);
    let mut parameters = base_parameters();
    parameters.insert(
        keys::DESIRED_CAPACITY_KEY.to_string(),
        nodegroup.desired_capacity.to_string(),
    );
    parameters.insert(keys::KUBERNETES_VERSION_KEY.to_string(), version.to_string());
    if let Some(role) = &nodegroup.instance_role_arn {
        parameters.insert(keys::INSTANCE_ROLE_OUTPUT.to_string(), role.clone());
    }

    let mut tags = base_tags(config);
    tags.insert(keys::NODEGROUP_NAME_TAG.to_string(), nodegroup.name.clone());
    tags.extend(nodegroup.tags.clone());

    let name = nodegroup.name.clone();
    let kind = if managed {
        StackKind::ManagedNodeGroup { name }
    } else {
        StackKind::NodeGroup { name }
    };

    StackRequest {
        name: env::nodegroup_stack_name(config.name(), &nodegroup.name),
        kind,
        parameters,
        tags,
        template: json!({
            "resources": {
                "NodeGroup": {
                    "type": if managed { "managed-nodegroup" } else { "autoscaling-group" },
                    "instanceType": nodegroup.instance_type,
                    "desiredCapacity": nodegroup.desired_capacity,
                    "version": version,
                },
                "NodeInstanceRole": { "type": "iam-role", "arn": nodegroup.instance_role_arn },
            }
        }),
    }
}

pub fn addon_request(config: &ClusterConfig, addon: &AddonSpec) -> StackRequest {
    let mut parameters = base_parameters();
    parameters.insert(keys::ADDON_VERSION_KEY.to_string(), addon.version.clone());

    StackRequest {
        name: env::addon_stack_name(config.name(), &addon.name),
        kind: StackKind::Addon {
            name: addon.name.clone(),
        },
        parameters,
        tags: base_tags(config),
        template: json!({
            "resources": {
                "AddonRole": { "type": "iam-role", "addon": addon.name, "version": addon.version },
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodegroup_request() {
        let config = ClusterConfig::new("dev", "us-west-2");
        let mut ng = NodeGroupSpec::new("ng-1");
        ng.tags.insert("team".to_string(), "platform".to_string());

        let request = nodegroup_request(&config, &ng, true, Some("1.31"));

        assert_eq!(request.name, "stackctl-dev-nodegroup-ng-1");
        assert_eq!(
            request.kind,
            StackKind::ManagedNodeGroup {
                name: "ng-1".to_string()
            }
        );
        assert_eq!(request.parameters[keys::KUBERNETES_VERSION_KEY], "1.31");
        assert_eq!(request.parameters[keys::DESIRED_CAPACITY_KEY], "2");
        assert_eq!(request.tags["team"], "platform");
        assert_eq!(request.tags[keys::CLUSTER_NAME_TAG], "dev");
    }

    #[test]
    fn test_cluster_request_carries_template_version() {
        let config = ClusterConfig::new("dev", "us-west-2");
        let request = cluster_request(&config);
        assert_eq!(request.name, "stackctl-dev-cluster");
        assert_eq!(
            request.parameters[keys::TEMPLATE_VERSION_KEY],
            keys::TEMPLATE_VERSION.to_string()
        );
    }
}
