//! Metadata enrichment.
//!
//! Adds host, environment, static, cloud and Kubernetes metadata to
//! outgoing records. Keys a record already carries are never overwritten,
//! so per-record values always win over agent-wide defaults. Sources that
//! cannot be detected contribute nothing.

use crate::config::{CloudProvider, EnrichmentConfig};
use crate::models::{LogRecord, Metric, Span};
use std::collections::HashMap;
use std::env;
use std::fs;

/// Attribute key for the host name.
pub const HOST_KEY: &str = "host";
/// Attribute key for the environment on metrics and logs.
pub const ENVIRONMENT_KEY: &str = "environment";
/// Attribute key for the environment on spans.
pub const SPAN_ENVIRONMENT_KEY: &str = "deployment.environment";
/// Attribute key for the detected cloud provider.
pub const CLOUD_PROVIDER_KEY: &str = "cloud.provider";

const K8S_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Merges agent-wide metadata into records.
///
/// # Example
///
/// ```
/// use pipeline::enrichment::Enricher;
/// use pipeline::models::Metric;
///
/// let enricher = Enricher::new()
///     .with_environment("production")
///     .with_tag("region", "eu-west-1");
///
/// let mut metric = Metric::gauge("cpu", 0.5).with_label("region", "us-east-1");
/// enricher.enrich_metric(&mut metric);
///
/// assert_eq!(metric.labels["environment"], "production");
/// assert_eq!(metric.labels["region"], "us-east-1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enricher {
    environment: Option<String>,
    tags: Vec<(String, String)>,
}

impl Enricher {
    /// Creates an enricher that adds nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deployment environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Adds a tag. The first tag registered for a key wins.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if !self.tags.iter().any(|(k, _)| *k == key) {
            self.tags.push((key, value.into()));
        }
        self
    }

    /// Builds an enricher from configuration, probing the host for the
    /// sources that are enabled.
    #[must_use]
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        let mut enricher = Self::new();

        if let Some(environment) = config.environment.as_deref().filter(|e| !e.is_empty()) {
            enricher = enricher.with_environment(environment);
        }

        if config.add_hostname {
            let hostname = config
                .hostname
                .clone()
                .filter(|h| !h.is_empty())
                .or_else(detect_hostname);
            if let Some(hostname) = hostname {
                enricher = enricher.with_tag(HOST_KEY, hostname);
            }
        }

        let mut static_tags: Vec<_> = config.static_tags.iter().collect();
        static_tags.sort();
        for (key, value) in static_tags {
            enricher = enricher.with_tag(key, value);
        }

        if config.cloud.enabled {
            let provider = match config.cloud.provider {
                CloudProvider::Auto => detect_cloud_provider(),
                explicit => Some(explicit),
            };
            if let Some(provider) = provider {
                enricher = enricher.with_tag(CLOUD_PROVIDER_KEY, provider.to_string());
            }
        }

        if config.kubernetes.enabled {
            for (key, value) in detect_kubernetes() {
                enricher = enricher.with_tag(key, value);
            }
        }

        tracing::info!(
            environment = enricher.environment.as_deref().unwrap_or("none"),
            tags = enricher.tags.len(),
            "Enrichment configured"
        );

        enricher
    }

    /// Returns the tags merged into every record.
    #[must_use]
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn merge(&self, target: &mut HashMap<String, String>, environment_key: &str) {
        if let Some(environment) = &self.environment {
            target
                .entry(environment_key.to_string())
                .or_insert_with(|| environment.clone());
        }
        for (key, value) in &self.tags {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Adds metadata to a metric's labels.
    pub fn enrich_metric(&self, metric: &mut Metric) {
        self.merge(&mut metric.labels, ENVIRONMENT_KEY);
    }

    /// Adds metadata to a log record's attributes.
    pub fn enrich_log(&self, record: &mut LogRecord) {
        self.merge(&mut record.attributes, ENVIRONMENT_KEY);
    }

    /// Adds metadata to a span's attributes.
    pub fn enrich_span(&self, span: &mut Span) {
        self.merge(&mut span.attributes, SPAN_ENVIRONMENT_KEY);
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_trimmed(path: &str) -> Option<String> {
    fs::read_to_string(path).ok().and_then(non_empty)
}

/// Detects the host name from `HOSTNAME`, then the kernel.
#[must_use]
pub fn detect_hostname() -> Option<String> {
    let hostname = env::var("HOSTNAME")
        .ok()
        .and_then(non_empty)
        .or_else(|| read_trimmed("/proc/sys/kernel/hostname"));

    if hostname.is_none() {
        tracing::warn!("Could not determine hostname");
    }
    hostname
}

/// Reads hypervisor and DMI identifiers for a known cloud provider.
#[must_use]
pub fn detect_cloud_provider() -> Option<CloudProvider> {
    if read_trimmed("/sys/hypervisor/uuid")
        .is_some_and(|uuid| uuid.to_ascii_lowercase().starts_with("ec2"))
    {
        return Some(CloudProvider::Aws);
    }
    if read_trimmed("/sys/class/dmi/id/product_name").is_some_and(|p| p == "Google Compute Engine")
    {
        return Some(CloudProvider::Gcp);
    }
    if read_trimmed("/sys/class/dmi/id/sys_vendor").is_some_and(|v| v == "Microsoft Corporation")
    {
        return Some(CloudProvider::Azure);
    }
    None
}

/// Returns Kubernetes metadata when running inside a pod.
#[must_use]
pub fn detect_kubernetes() -> Vec<(String, String)> {
    if env::var_os("KUBERNETES_SERVICE_HOST").is_none() {
        return Vec::new();
    }

    let mut tags = Vec::new();
    if let Some(namespace) = read_trimmed(K8S_NAMESPACE_FILE) {
        tags.push(("k8s.namespace".to_string(), namespace));
    }
    if let Some(pod) = env::var("HOSTNAME").ok().and_then(non_empty) {
        tags.push(("k8s.pod.name".to_string(), pod));
    }
    if let Some(node) = env::var("NODE_NAME").ok().and_then(non_empty) {
        tags.push(("k8s.node.name".to_string(), node));
    }
    tags
}
