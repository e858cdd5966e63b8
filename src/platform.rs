//! # Platform
//!
//! Resolves the platform the cluster runs on and what that means for the
//! providers the operator installs.
//!
//! The platform is read once at startup, either from the `PLATFORM`
//! environment override or from `status.platformStatus.type` of the
//! `config.openshift.io/v1` `Infrastructure` object named `cluster`. The
//! result is passed by value into the reconciler.
//!
//! Each platform maps to exactly one infrastructure provider. Provider images
//! come from a JSON map of image keys to image references mounted into the
//! operator pod.

use crate::cluster::{ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::provider::{Provider, ProviderType};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const INFRASTRUCTURE_API_VERSION: &str = "config.openshift.io/v1";
const INFRASTRUCTURE_KIND: &str = "Infrastructure";
const INFRASTRUCTURE_NAME: &str = "cluster";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to read Infrastructure cluster: {0}")]
    Infrastructure(#[from] StoreError),

    #[error("Infrastructure cluster reports no platform type")]
    MissingPlatform,

    #[error("failed to read images file {path}: {source}")]
    ImagesFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid images file {path}: {source}")]
    ImagesJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no image configured for {0}")]
    MissingImage(String),
}

/// Platform types reported by the `Infrastructure` object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformType {
    Aws,
    Azure,
    Gcp,
    PowerVs,
    OpenStack,
    VSphere,
    BareMetal,
    None,
    Other(String),
}

impl PlatformType {
    /// Name of the infrastructure provider installed on this platform
    ///
    /// `None` for platforms without Cluster API support.
    #[must_use]
    pub fn infrastructure_provider(&self) -> Option<&'static str> {
        match self {
            Self::Aws => Some("aws"),
            Self::Azure => Some("azure"),
            Self::Gcp => Some("gcp"),
            Self::PowerVs => Some("ibmcloud"),
            Self::OpenStack => Some("openstack"),
            Self::VSphere => Some("vsphere"),
            Self::BareMetal => Some("metal3"),
            Self::None | Self::Other(_) => None,
        }
    }
}

impl From<&str> for PlatformType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            "gcp" => Self::Gcp,
            "powervs" => Self::PowerVs,
            "openstack" => Self::OpenStack,
            "vsphere" => Self::VSphere,
            "baremetal" => Self::BareMetal,
            "none" | "" => Self::None,
            _ => Self::Other(s.trim().to_string()),
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aws => "AWS",
            Self::Azure => "Azure",
            Self::Gcp => "GCP",
            Self::PowerVs => "PowerVS",
            Self::OpenStack => "OpenStack",
            Self::VSphere => "VSphere",
            Self::BareMetal => "BareMetal",
            Self::None => "None",
            Self::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// Resolve the platform, preferring `platform_override` over the cluster
pub async fn resolve_platform(
    store: &dyn ClusterStore,
    platform_override: Option<&str>,
) -> Result<PlatformType, PlatformError> {
    if let Some(raw) = platform_override {
        let platform = PlatformType::from(raw);
        info!(%platform, "using platform override");
        return Ok(platform);
    }

    let key = ObjectKey::new(
        TypeRef::new(INFRASTRUCTURE_API_VERSION, INFRASTRUCTURE_KIND),
        None,
        INFRASTRUCTURE_NAME,
    );
    let infrastructure = store.get(&key).await?;
    let status = &infrastructure.data["status"];
    let raw = status
        .pointer("/platformStatus/type")
        .or_else(|| status.get("platform"))
        .and_then(serde_json::Value::as_str)
        .ok_or(PlatformError::MissingPlatform)?;

    let platform = PlatformType::from(raw);
    info!(%platform, "resolved platform from Infrastructure");
    Ok(platform)
}

/// Key of a provider's image in the images file
#[must_use]
pub fn image_key(provider: &Provider) -> String {
    match provider.provider_type {
        ProviderType::Core => "cluster-capi-controllers".to_string(),
        _ => format!("{}-cluster-api-controllers", provider.name),
    }
}

/// Manager binary of a provider inside its image
#[must_use]
pub fn manager_command(provider: &Provider) -> String {
    match provider.provider_type {
        ProviderType::Core => "./bin/cluster-api-controller-manager".to_string(),
        _ => format!("./bin/cluster-api-provider-{}-controller-manager", provider.name),
    }
}

/// Image references keyed by [`image_key`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Images(BTreeMap<String, String>);

impl Images {
    #[must_use]
    pub fn new(images: BTreeMap<String, String>) -> Self {
        Self(images)
    }

    /// Load the JSON images file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| PlatformError::ImagesFile {
            path: path.display().to_string(),
            source,
        })?;
        let images = serde_json::from_slice(&raw).map_err(|source| PlatformError::ImagesJson {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self(images))
    }

    /// Image reference for `provider`
    pub fn image_for(&self, provider: &Provider) -> Result<&str, PlatformError> {
        let key = image_key(provider);
        self.0
            .get(&key)
            .map(String::as_str)
            .ok_or(PlatformError::MissingImage(key))
    }
}
