//! # Provider Config Client
//!
//! Resolves a provider `(name, type)` to its canonical configuration, the
//! way `clusterctl`'s `providers().get(name, type)` does. Only providers the
//! operator knows about can be installed.

use crate::provider::ProviderType;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigClientError {
    #[error("failed to get configuration for the {provider_type} provider {name}: provider is not known")]
    ProviderUnknown {
        name: String,
        provider_type: ProviderType,
    },
}

/// Canonical configuration of a known provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub provider_type: ProviderType,
    /// Upstream release location of the provider components
    pub url: String,
}

#[cfg_attr(test, automock)]
pub trait ConfigClient: Send + Sync {
    fn provider(
        &self,
        name: &str,
        provider_type: ProviderType,
    ) -> Result<ProviderConfig, ConfigClientError>;
}

const KNOWN_PROVIDERS: &[(&str, ProviderType, &str)] = &[
    (
        "cluster-api",
        ProviderType::Core,
        "https://github.com/kubernetes-sigs/cluster-api/releases/latest/core-components.yaml",
    ),
    (
        "aws",
        ProviderType::Infrastructure,
        "https://github.com/kubernetes-sigs/cluster-api-provider-aws/releases/latest/infrastructure-components.yaml",
    ),
    (
        "azure",
        ProviderType::Infrastructure,
        "https://github.com/kubernetes-sigs/cluster-api-provider-azure/releases/latest/infrastructure-components.yaml",
    ),
    (
        "gcp",
        ProviderType::Infrastructure,
        "https://github.com/kubernetes-sigs/cluster-api-provider-gcp/releases/latest/infrastructure-components.yaml",
    ),
    (
        "ibmcloud",
        ProviderType::Infrastructure,
        "https://github.com/kubernetes-sigs/cluster-api-provider-ibmcloud/releases/latest/infrastructure-components.yaml",
    ),
    (
        "openstack",
        ProviderType::Infrastructure,
        "https://github.com/kubernetes-sigs/cluster-api-provider-openstack/releases/latest/infrastructure-components.yaml",
    ),
    (
        "vsphere",
        ProviderType::Infrastructure,
        "https://github.com/kubernetes-sigs/cluster-api-provider-vsphere/releases/latest/infrastructure-components.yaml",
    ),
    (
        "metal3",
        ProviderType::Infrastructure,
        "https://github.com/metal3-io/cluster-api-provider-metal3/releases/latest/infrastructure-components.yaml",
    ),
    (
        "kubeadm",
        ProviderType::Bootstrap,
        "https://github.com/kubernetes-sigs/cluster-api/releases/latest/bootstrap-components.yaml",
    ),
    (
        "kubeadm",
        ProviderType::ControlPlane,
        "https://github.com/kubernetes-sigs/cluster-api/releases/latest/control-plane-components.yaml",
    ),
];

/// [`ConfigClient`] over the built-in provider table
#[derive(Debug, Clone, Default)]
pub struct BuiltinProviders;

impl ConfigClient for BuiltinProviders {
    fn provider(
        &self,
        name: &str,
        provider_type: ProviderType,
    ) -> Result<ProviderConfig, ConfigClientError> {
        KNOWN_PROVIDERS
            .iter()
            .find(|(n, t, _)| *n == name && *t == provider_type)
            .map(|(n, t, url)| ProviderConfig {
                name: (*n).to_string(),
                provider_type: *t,
                url: (*url).to_string(),
            })
            .ok_or_else(|| ConfigClientError::ProviderUnknown {
                name: name.to_string(),
                provider_type,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_provider_resolves() {
        let config = BuiltinProviders
            .provider("aws", ProviderType::Infrastructure)
            .unwrap();
        assert_eq!(config.name, "aws");
        assert!(config.url.contains("cluster-api-provider-aws"));
    }

    #[test]
    fn test_type_is_part_of_identity() {
        assert!(BuiltinProviders.provider("aws", ProviderType::Core).is_err());
        assert!(BuiltinProviders
            .provider("kubeadm", ProviderType::ControlPlane)
            .is_ok());
    }

    #[test]
    fn test_unknown_provider_message() {
        let err = BuiltinProviders
            .provider("nutanix", ProviderType::Infrastructure)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to get configuration for the infrastructure provider nutanix: provider is not known"
        );
    }
}
