//! Enrichment configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cloud provider whose metadata is attached to records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Detect from the host.
    #[default]
    Auto,
    /// Amazon Web Services.
    Aws,
    /// Google Cloud Platform.
    Gcp,
    /// Microsoft Azure.
    Azure,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Aws => write!(f, "aws"),
            Self::Gcp => write!(f, "gcp"),
            Self::Azure => write!(f, "azure"),
        }
    }
}

/// Cloud metadata settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Whether cloud metadata is attached.
    pub enabled: bool,
    /// Which provider to report.
    pub provider: CloudProvider,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: CloudProvider::Auto,
        }
    }
}

/// Kubernetes metadata settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Whether orchestration metadata is attached.
    pub enabled: bool,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Metadata merged into every outgoing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Attach the host name as `host`.
    pub add_hostname: bool,
    /// Host name override. Detected when unset.
    pub hostname: Option<String>,
    /// Deployment environment (e.g. "production").
    pub environment: Option<String>,
    /// Tags attached to every record.
    pub static_tags: HashMap<String, String>,
    /// Cloud provider metadata.
    pub cloud: CloudConfig,
    /// Kubernetes metadata.
    pub kubernetes: KubernetesConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            add_hostname: true,
            hostname: None,
            environment: None,
            static_tags: HashMap::new(),
            cloud: CloudConfig::default(),
            kubernetes: KubernetesConfig::default(),
        }
    }
}
