//! # Config Source Reader
//!
//! Reads provider ConfigMaps produced by the asset generator.
//!
//! A provider ConfigMap carries three labels (name, type, version) and either a
//! plain `components` entry or a zstd-framed `components-zstd` binary entry,
//! plus an optional `metadata` document. The payload is resolved once into a
//! [`ProviderPayload`] and turned into text with [`ProviderPayload::decode`].

use crate::cluster::{from_dynamic, ClusterStore, StoreError, TypeRef};
use crate::constants::{
    COMPONENTS_KEY, COMPONENTS_ZSTD_KEY, METADATA_KEY, PROVIDER_INSTALL_ORDER_LABEL,
    PROVIDER_NAME_LABEL, PROVIDER_TYPE_LABEL, PROVIDER_VERSION_LABEL,
};
use crate::provider::{Provider, ProviderType};
use k8s_openapi::api::core::v1::ConfigMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unable to read provider {configmap}: missing label {label}")]
    MissingLabel { configmap: String, label: &'static str },

    #[error("unable to read provider {configmap}: {reason}")]
    InvalidLabel { configmap: String, reason: String },

    #[error("unable to read provider {configmap}: install order {value:?} is not an integer")]
    InvalidInstallOrder {
        configmap: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("provider configmap has no components data")]
    NoComponents,

    #[error("failed to decompress provider components: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("provider components are not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("failed to list provider configmaps: {0}")]
    Store(#[from] StoreError),
}

/// Components payload of a provider ConfigMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderPayload {
    Plain(String),
    /// zstd frame
    Compressed(Vec<u8>),
}

impl ProviderPayload {
    /// Extract the payload from a ConfigMap; the compressed entry wins when both exist
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self, SourceError> {
        if let Some(bytes) = cm
            .binary_data
            .as_ref()
            .and_then(|b| b.get(COMPONENTS_ZSTD_KEY))
        {
            return Ok(Self::Compressed(bytes.0.clone()));
        }
        cm.data
            .as_ref()
            .and_then(|d| d.get(COMPONENTS_KEY))
            .map(|text| Self::Plain(text.clone()))
            .ok_or(SourceError::NoComponents)
    }

    /// Manifest text of the payload
    pub fn decode(&self) -> Result<String, SourceError> {
        match self {
            Self::Plain(text) => Ok(text.clone()),
            Self::Compressed(bytes) => {
                let raw = zstd::decode_all(bytes.as_slice()).map_err(SourceError::Decompress)?;
                Ok(String::from_utf8(raw)?)
            }
        }
    }
}

/// One provider ConfigMap, fully read
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// ConfigMap name
    pub name: String,
    pub provider: Provider,
    pub payload: ProviderPayload,
    pub metadata: Option<String>,
}

impl ConfigSource {
    /// Read labels, payload and metadata from a provider ConfigMap
    ///
    /// Label problems are reported before the payload is looked at.
    pub fn from_config_map(cm: &ConfigMap, target_namespace: &str) -> Result<Self, SourceError> {
        let provider = provider_from_config_map(cm, target_namespace)?;
        let payload = ProviderPayload::from_config_map(cm)?;
        let metadata = cm
            .data
            .as_ref()
            .and_then(|d| d.get(METADATA_KEY))
            .cloned();
        Ok(Self {
            name: cm.metadata.name.clone().unwrap_or_default(),
            provider,
            payload,
            metadata,
        })
    }

    /// Does this source belong to the given provider?
    #[must_use]
    pub fn is_for(&self, name: &str, provider_type: ProviderType) -> bool {
        self.provider.name == name && self.provider.provider_type == provider_type
    }
}

/// Resolve a [`Provider`] from the labels of a ConfigMap
pub fn provider_from_config_map(
    cm: &ConfigMap,
    target_namespace: &str,
) -> Result<Provider, SourceError> {
    let configmap = cm.metadata.name.clone().unwrap_or_default();
    let labels = cm.metadata.labels.as_ref();
    let label = |key: &'static str| {
        labels
            .and_then(|l| l.get(key))
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| SourceError::MissingLabel {
                configmap: configmap.clone(),
                label: key,
            })
    };

    let version = label(PROVIDER_VERSION_LABEL)?;
    let raw_type = label(PROVIDER_TYPE_LABEL)?;
    let name = label(PROVIDER_NAME_LABEL)?;

    let provider_type: ProviderType =
        raw_type
            .parse()
            .map_err(|reason| SourceError::InvalidLabel {
                configmap: configmap.clone(),
                reason,
            })?;

    let install_order = match labels.and_then(|l| l.get(PROVIDER_INSTALL_ORDER_LABEL)) {
        Some(raw) => raw
            .parse()
            .map_err(|source| SourceError::InvalidInstallOrder {
                configmap: configmap.clone(),
                value: raw.clone(),
                source,
            })?,
        None => provider_type.default_install_order(),
    };

    Ok(Provider {
        name,
        namespace: target_namespace.to_string(),
        version,
        provider_type,
        install_order,
    })
}

/// List every provider ConfigMap (those carrying the version label) in a namespace
pub async fn list_provider_config_maps(
    store: &dyn ClusterStore,
    namespace: &str,
) -> Result<Vec<ConfigMap>, SourceError> {
    let objects = store
        .list(
            &TypeRef::of::<ConfigMap>(),
            Some(namespace),
            Some(PROVIDER_VERSION_LABEL),
        )
        .await?;
    let config_maps = objects
        .iter()
        .map(from_dynamic::<ConfigMap>)
        .collect::<Result<Vec<_>, _>>()?;
    debug!(namespace, count = config_maps.len(), "listed provider configmaps");
    Ok(config_maps)
}
