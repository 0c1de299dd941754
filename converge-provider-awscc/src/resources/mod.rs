//! Resource and data source kinds backed by AWS Cloud Control API
//!
//! This module defines:
//! - One module per kind with its field table and payload transforms
//! - Mapping between kind names and AWS CloudFormation type names

use converge_core::registry::Registry;

pub mod docdb_global_cluster;
pub mod elasticache_user_group;
pub mod lightsail_instance;
pub mod outposts_assets;
pub mod secretsmanager_secret_rotation;
pub mod vpclattice_auth_policy;

pub use docdb_global_cluster::DocdbGlobalCluster;
pub use elasticache_user_group::ElasticacheUserGroup;
pub use lightsail_instance::LightsailInstance;
pub use outposts_assets::OutpostsAssets;
pub use secretsmanager_secret_rotation::SecretsmanagerSecretRotation;
pub use vpclattice_auth_policy::VpclatticeAuthPolicy;

/// Kind configuration
pub struct ResourceConfig {
    /// Kind name used in manifests (e.g., "lightsail_instance")
    pub type_name: &'static str,
    /// AWS CloudFormation type name (e.g., "AWS::Lightsail::Instance")
    pub aws_type_name: &'static str,
}

pub const CONFIGS: &[ResourceConfig] = &[
    ResourceConfig {
        type_name: "docdb_global_cluster",
        aws_type_name: docdb_global_cluster::AWS_TYPE_NAME,
    },
    ResourceConfig {
        type_name: "elasticache_user_group",
        aws_type_name: elasticache_user_group::AWS_TYPE_NAME,
    },
    ResourceConfig {
        type_name: "lightsail_instance",
        aws_type_name: lightsail_instance::AWS_TYPE_NAME,
    },
    ResourceConfig {
        type_name: "vpclattice_auth_policy",
        aws_type_name: vpclattice_auth_policy::AWS_TYPE_NAME,
    },
    ResourceConfig {
        type_name: "outposts_assets",
        aws_type_name: outposts_assets::AWS_TYPE_NAME,
    },
    ResourceConfig {
        type_name: "secretsmanager_secret_rotation",
        aws_type_name: secretsmanager_secret_rotation::AWS_TYPE_NAME,
    },
];

/// AWS type name for a kind name
pub fn aws_type_name(type_name: &str) -> Option<&'static str> {
    CONFIGS
        .iter()
        .find(|c| c.type_name == type_name)
        .map(|c| c.aws_type_name)
}

/// Every kind supported by this provider
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_resource::<DocdbGlobalCluster>()
        .register_resource::<ElasticacheUserGroup>()
        .register_resource::<LightsailInstance>()
        .register_resource::<VpclatticeAuthPolicy>()
        .register_data_source::<OutpostsAssets>()
        .register_data_source::<SecretsmanagerSecretRotation>();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_kind_has_an_aws_type() {
        let registry = registry();
        for name in registry.resource_types().chain(registry.data_source_types()) {
            assert!(aws_type_name(name).is_some(), "{} has no AWS type", name);
        }
        assert_eq!(registry.resource_types().count(), 4);
        assert_eq!(registry.data_source_types().count(), 2);
    }

    #[test]
    fn lookup() {
        assert_eq!(aws_type_name("lightsail_instance"), Some("AWS::Lightsail::Instance"));
        assert_eq!(aws_type_name("ec2_vpc"), None);
    }
}
