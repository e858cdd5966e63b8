//! # Provider Repository
//!
//! A clusterctl-style repository view over provider ConfigMaps.
//!
//! Each ConfigMap of a provider contributes one version holding a
//! `metadata.yaml` and a `<type>-components.yaml` file. The repository is
//! rebuilt from the cluster on every reconcile and never cached.

use crate::constants::METADATA_FILE;
use crate::provider::source::{ConfigSource, ProviderPayload, SourceError};
use crate::provider::ProviderType;
use semver::Version;
use std::collections::{btree_map, BTreeMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no provider configmaps found for {provider_type} provider {name}")]
    NoSources {
        name: String,
        provider_type: ProviderType,
    },

    #[error("provider configmap {configmap} has invalid version {version:?}: {source}")]
    InvalidVersion {
        configmap: String,
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("provider configmap {configmap} has no metadata")]
    MissingMetadata { configmap: String },

    #[error("provider configmaps {first} and {second} both hold version {version}")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    #[error("version {0} not found in provider repository")]
    VersionNotFound(String),

    #[error("file {file} not found for version {version}")]
    FileNotFound { version: String, file: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Read access to a provider's versioned files
pub trait Repository: Send + Sync {
    /// Contents of `filename` for `version`
    fn get_file(&self, version: &str, filename: &str) -> Result<Vec<u8>, RepositoryError>;

    /// Name of the components file
    fn components_path(&self) -> String;
}

/// Parse a provider version, tolerating a leading `v`
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    Version::parse(raw.trim().trim_start_matches('v'))
}

#[derive(Debug, Clone)]
struct Entry {
    configmap: String,
    label: String,
    metadata: String,
    components: ProviderPayload,
}

/// [`Repository`] built from the ConfigMap sources of one provider
#[derive(Debug, Clone)]
pub struct ConfigMapRepository {
    provider_type: ProviderType,
    versions: BTreeMap<Version, Entry>,
}

impl ConfigMapRepository {
    /// Build from every source matching `(name, provider_type)`
    ///
    /// Every matching source must carry a semver version and a metadata
    /// document, and no two sources may hold the same version.
    pub fn from_sources(
        name: &str,
        provider_type: ProviderType,
        sources: &[ConfigSource],
    ) -> Result<Self, RepositoryError> {
        let mut versions = BTreeMap::new();
        for source in sources.iter().filter(|s| s.is_for(name, provider_type)) {
            let version = parse_version(&source.provider.version).map_err(|e| {
                RepositoryError::InvalidVersion {
                    configmap: source.name.clone(),
                    version: source.provider.version.clone(),
                    source: e,
                }
            })?;
            let metadata =
                source
                    .metadata
                    .clone()
                    .ok_or_else(|| RepositoryError::MissingMetadata {
                        configmap: source.name.clone(),
                    })?;
            match versions.entry(version) {
                btree_map::Entry::Occupied(held) => {
                    let held: &Entry = held.get();
                    return Err(RepositoryError::DuplicateVersion {
                        version: source.provider.version.clone(),
                        first: held.configmap.clone(),
                        second: source.name.clone(),
                    });
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(Entry {
                        configmap: source.name.clone(),
                        label: source.provider.version.clone(),
                        metadata,
                        components: source.payload.clone(),
                    });
                }
            }
        }

        if versions.is_empty() {
            return Err(RepositoryError::NoSources {
                name: name.to_string(),
                provider_type,
            });
        }
        Ok(Self {
            provider_type,
            versions,
        })
    }

    /// Highest version held, as written in its ConfigMap label
    #[must_use]
    pub fn latest_version(&self) -> Option<&str> {
        self.versions
            .last_key_value()
            .map(|(_, entry)| entry.label.as_str())
    }

    /// All versions, ascending
    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.keys()
    }

    fn entry(&self, version: &str) -> Result<&Entry, RepositoryError> {
        parse_version(version)
            .ok()
            .and_then(|parsed| self.versions.get(&parsed))
            .ok_or_else(|| RepositoryError::VersionNotFound(version.to_string()))
    }
}

impl Repository for ConfigMapRepository {
    fn get_file(&self, version: &str, filename: &str) -> Result<Vec<u8>, RepositoryError> {
        let entry = self.entry(version)?;
        if filename == METADATA_FILE {
            return Ok(entry.metadata.clone().into_bytes());
        }
        if filename == self.components_path() {
            return Ok(entry.components.decode()?.into_bytes());
        }
        Err(RepositoryError::FileNotFound {
            version: version.to_string(),
            file: filename.to_string(),
        })
    }

    fn components_path(&self) -> String {
        self.provider_type.components_file()
    }
}
