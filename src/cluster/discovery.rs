//! Peer discovery strategies.

use super::net::usable_peer;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Certificate, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{fmt, fs, net::IpAddr, sync::Arc, time::Duration};
use tracing::{Instrument, debug, info_span, instrument, warn};
use url::Url;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Orchestration platform that can list instances of this service.
#[async_trait]
pub trait PlatformQuery: Send + Sync {
    async fn colocated_instance_ips(&self, namespace: &str) -> Result<Vec<String>>;
}

/// How the peer set is populated.
#[derive(Clone)]
pub enum Discovery {
    /// Peers taken verbatim from configuration.
    Static(Vec<String>),
    /// Peers listed by the platform after waiting `grace`, since a freshly
    /// started instance is not visible right away.
    Platform {
        query: Arc<dyn PlatformQuery>,
        namespace: String,
        grace: Duration,
    },
}

impl fmt::Debug for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(peers) => f.debug_tuple("Static").field(peers).finish(),
            Self::Platform {
                namespace, grace, ..
            } => f
                .debug_struct("Platform")
                .field("namespace", namespace)
                .field("grace", grace)
                .finish_non_exhaustive(),
        }
    }
}

impl Discovery {
    /// Upper bound on how long discovery may take before startup stops waiting.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        match self {
            Self::Static(_) => Duration::from_secs(1),
            Self::Platform { grace, .. } => *grace + Duration::from_secs(10),
        }
    }

    /// Raw candidates, unfiltered.
    ///
    /// # Errors
    /// Returns an error if the platform query fails.
    pub async fn candidates(&self) -> Result<Vec<String>> {
        match self {
            Self::Static(peers) => Ok(peers.clone()),
            Self::Platform {
                query,
                namespace,
                grace,
            } => {
                debug!(?grace, "waiting before querying platform for peers");
                tokio::time::sleep(*grace).await;
                query.colocated_instance_ips(namespace).await
            }
        }
    }
}

/// Deduplicate, drop self and anything loopback or unparsable. Order is kept.
#[must_use]
pub fn filter_peers(candidates: &[String], local_ip: IpAddr) -> Vec<String> {
    let mut peers: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(ip) = usable_peer(candidate) else {
            debug!(%candidate, "skipping unusable peer address");
            continue;
        };
        if ip == local_ip {
            continue;
        }
        let ip = ip.to_string();
        if !peers.contains(&ip) {
            peers.push(ip);
        }
    }
    peers
}

/// Lists running pods through the in-cluster Kubernetes API.
pub struct KubernetesQuery {
    client: Client,
    api_url: Url,
    token: SecretString,
    label_selector: String,
}

impl fmt::Debug for KubernetesQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubernetesQuery")
            .field("api_url", &self.api_url.as_str())
            .field("label_selector", &self.label_selector)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

fn running_ips(pods: PodList) -> Vec<String> {
    pods.items
        .into_iter()
        .filter(|pod| pod.status.phase == "Running")
        .filter_map(|pod| pod.status.pod_ip)
        .collect()
}

impl KubernetesQuery {
    /// Build from the pod's service account and the `KUBERNETES_SERVICE_*`
    /// environment.
    ///
    /// # Errors
    /// Returns an error if not running inside a cluster or the service account
    /// files cannot be read.
    pub fn in_cluster(label_selector: String) -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .context("KUBERNETES_SERVICE_HOST is not set; not running in a cluster?")?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let api_url = Url::parse(&format!("https://{host}:{port}"))
            .with_context(|| format!("invalid Kubernetes API address {host}:{port}"))?;

        let token = fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/token"))
            .context("failed to read service account token")?;
        let ca = fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt"))
            .context("failed to read service account CA")?;

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .add_root_certificate(Certificate::from_pem(&ca)?)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build Kubernetes HTTP client")?;

        Ok(Self {
            client,
            api_url,
            token: SecretString::from(token.trim().to_string()),
            label_selector,
        })
    }
}

#[async_trait]
impl PlatformQuery for KubernetesQuery {
    #[instrument(skip(self))]
    async fn colocated_instance_ips(&self, namespace: &str) -> Result<Vec<String>> {
        let url = self
            .api_url
            .join(&format!("/api/v1/namespaces/{namespace}/pods"))?;
        let span = info_span!("k8s.list_pods", namespace, selector = %self.label_selector);

        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .query(&[("labelSelector", self.label_selector.as_str())])
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("pod listing failed with status {}", response.status()));
        }

        let ips = running_ips(response.json().await?);
        if ips.is_empty() {
            warn!(namespace, "platform query returned no running instances");
        }
        Ok(ips)
    }
}
