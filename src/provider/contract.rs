//! # Contract Validator
//!
//! Checks that the Cluster API contract a provider version declares is one
//! this operator can install. The declaration lives in the provider's
//! clusterctl `Metadata` document as a list of release series.

use crate::constants::{METADATA_FILE, SUPPORTED_CONTRACTS};
use crate::provider::repository::{parse_version, Repository, RepositoryError};
use crate::provider::Provider;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("invalid provider metadata for {provider}: {reason}")]
    InvalidMetadata { provider: String, reason: String },

    #[error("invalid provider metadata: version {version} for provider {provider} matches no release series")]
    NoReleaseSeries { provider: String, version: String },

    #[error(
        "provider {provider} version {version} declares contract {declared}, supported contracts are [{}]",
        .supported.join(", ")
    )]
    Incompatible {
        provider: String,
        version: String,
        declared: String,
        supported: Vec<String>,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// clusterctl `Metadata` document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub release_series: Vec<ReleaseSeries>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseSeries {
    pub major: u64,
    pub minor: u64,
    pub contract: String,
}

impl Metadata {
    /// Release series covering `major.minor`
    #[must_use]
    pub fn release_series_for(&self, major: u64, minor: u64) -> Option<&ReleaseSeries> {
        self.release_series
            .iter()
            .find(|s| s.major == major && s.minor == minor)
    }
}

/// Validate the contract of `provider.version` against [`SUPPORTED_CONTRACTS`]
///
/// Returns the declared contract on success.
pub fn validate_contract(
    provider: &Provider,
    repository: &dyn Repository,
) -> Result<String, ContractError> {
    validate_contract_against(provider, repository, SUPPORTED_CONTRACTS)
}

pub fn validate_contract_against(
    provider: &Provider,
    repository: &dyn Repository,
    supported: &[&str],
) -> Result<String, ContractError> {
    let invalid = |reason: String| ContractError::InvalidMetadata {
        provider: provider.name.clone(),
        reason,
    };

    let raw = repository.get_file(&provider.version, METADATA_FILE)?;
    let metadata: Metadata = serde_yaml::from_slice(&raw).map_err(|e| invalid(e.to_string()))?;
    let version = parse_version(&provider.version).map_err(|e| invalid(e.to_string()))?;

    let series = metadata
        .release_series_for(version.major, version.minor)
        .ok_or_else(|| ContractError::NoReleaseSeries {
            provider: provider.name.clone(),
            version: provider.version.clone(),
        })?;

    if !supported.contains(&series.contract.as_str()) {
        return Err(ContractError::Incompatible {
            provider: provider.name.clone(),
            version: provider.version.clone(),
            declared: series.contract.clone(),
            supported: supported.iter().map(|s| (*s).to_string()).collect(),
        });
    }

    debug!(provider = %provider.name, contract = %series.contract, "provider contract supported");
    Ok(series.contract.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderType;

    struct StaticRepo(&'static str);

    impl Repository for StaticRepo {
        fn get_file(&self, _version: &str, filename: &str) -> Result<Vec<u8>, RepositoryError> {
            assert_eq!(filename, METADATA_FILE);
            Ok(self.0.as_bytes().to_vec())
        }

        fn components_path(&self) -> String {
            "core-components.yaml".to_string()
        }
    }

    const METADATA: &str = r"
apiVersion: clusterctl.cluster.x-k8s.io/v1alpha3
kind: Metadata
releaseSeries:
  - major: 1
    minor: 7
    contract: v1beta1
  - major: 1
    minor: 8
    contract: v1beta1
  - major: 0
    minor: 4
    contract: v1alpha4
";

    fn provider(version: &str) -> Provider {
        Provider {
            name: "cluster-api".to_string(),
            namespace: "ns".to_string(),
            version: version.to_string(),
            provider_type: ProviderType::Core,
            install_order: 10,
        }
    }

    #[test]
    fn test_matching_series_supported() {
        let contract = validate_contract(&provider("v1.8.3"), &StaticRepo(METADATA)).unwrap();
        assert_eq!(contract, "v1beta1");
    }

    #[test]
    fn test_no_release_series() {
        let err = validate_contract(&provider("v1.9.0"), &StaticRepo(METADATA)).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("invalid provider metadata: version v1.9.0"));
        assert!(err.to_string().contains("matches no release series"));
    }

    #[test]
    fn test_unsupported_contract_reports_declared_and_supported() {
        let err = validate_contract(&provider("v0.4.2"), &StaticRepo(METADATA)).unwrap_err();
        match &err {
            ContractError::Incompatible {
                declared,
                supported,
                ..
            } => {
                assert_eq!(declared, "v1alpha4");
                assert_eq!(supported, &vec!["v1beta1".to_string(), "v1beta2".to_string()]);
            }
            other => panic!("expected Incompatible, got {other:?}"),
        }
        assert!(err.to_string().contains("v1alpha4"));
        assert!(err.to_string().contains("[v1beta1, v1beta2]"));
    }

    #[test]
    fn test_garbage_metadata() {
        let err =
            validate_contract(&provider("v1.8.0"), &StaticRepo("releaseSeries: 7")).unwrap_err();
        assert!(matches!(err, ContractError::InvalidMetadata { .. }));
    }
}
