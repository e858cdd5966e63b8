//! # Providers
//!
//! Cluster API providers and the pipeline that turns their ConfigMap sources
//! into installable objects:
//!
//! - [`source`] - reads labelled provider ConfigMaps (plain or zstd payloads)
//! - [`transform`] - `${VAR}` substitution, document splitting, image/command rewrite
//! - [`repository`] - in-memory, version-keyed store of metadata and components
//! - [`contract`] - release-series lookup and supported-contract check
//! - [`components`] - decodes fragments and rewrites them for the target namespace
//! - [`order`] - deterministic install ordering

pub mod components;
pub mod contract;
pub mod order;
pub mod repository;
pub mod source;
pub mod transform;

use std::fmt;
use std::str::FromStr;

/// Kind of Cluster API provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderType {
    Core,
    Infrastructure,
    Bootstrap,
    ControlPlane,
}

impl ProviderType {
    /// Value used in the `provider.cluster.x-k8s.io/type` label
    #[must_use]
    pub fn label_value(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Infrastructure => "infrastructure",
            Self::Bootstrap => "bootstrap",
            Self::ControlPlane => "control-plane",
        }
    }

    /// clusterctl provider type name recorded in the inventory
    #[must_use]
    pub fn clusterctl_type(self) -> &'static str {
        match self {
            Self::Core => "CoreProvider",
            Self::Infrastructure => "InfrastructureProvider",
            Self::Bootstrap => "BootstrapProvider",
            Self::ControlPlane => "ControlPlaneProvider",
        }
    }

    /// Components file name inside a provider repository
    #[must_use]
    pub fn components_file(self) -> String {
        format!("{}-components.yaml", self.label_value())
    }

    /// Install order used when the ConfigMap carries no explicit order label
    ///
    /// Core installs first because every other provider depends on its CRDs.
    #[must_use]
    pub fn default_install_order(self) -> i32 {
        match self {
            Self::Core => 10,
            Self::Infrastructure => 20,
            Self::Bootstrap | Self::ControlPlane => 30,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" | "coreprovider" => Ok(Self::Core),
            "infrastructure" | "infrastructureprovider" => Ok(Self::Infrastructure),
            "bootstrap" | "bootstrapprovider" => Ok(Self::Bootstrap),
            "control-plane" | "controlplane" | "controlplaneprovider" => Ok(Self::ControlPlane),
            other => Err(format!("unknown provider type {other:?}")),
        }
    }
}

/// A provider resolved from the labels of one of its ConfigMap sources
///
/// Re-derived on every reconcile; nothing about it is persisted by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    /// Namespace the provider components are installed into
    pub namespace: String,
    pub version: String,
    pub provider_type: ProviderType,
    pub install_order: i32,
}

impl Provider {
    /// clusterctl instance name, e.g. `cluster-api` or `infrastructure-aws`
    #[must_use]
    pub fn manifest_label(&self) -> String {
        match self.provider_type {
            ProviderType::Core => self.name.clone(),
            other => format!("{}-{}", other.label_value(), self.name),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.provider_type, self.name, self.version)
    }
}
