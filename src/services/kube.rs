use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Directory, Provisioner};
use crate::config::WorkloadConfig;
use crate::kubeconfig::ClusterConnection;
use crate::kernel::event::TargetRecord;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimal Kubernetes REST client: lists nodes, creates node-pinned pods.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    workload: WorkloadConfig,
}

#[derive(Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Deserialize)]
struct Node {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
}

impl KubeClient {
    /// `request_timeout` bounds every exchange end to end, so a stalled
    /// server cannot hold a call past it.
    pub fn new(cluster: &ClusterConnection, workload: WorkloadConfig, request_timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .danger_accept_invalid_certs(cluster.insecure_skip_tls_verify);

        if let Some(pem) = &cluster.ca_pem {
            let cert = Certificate::from_pem(pem).context("parsing cluster CA")?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &cluster.identity_pem {
            let identity = Identity::from_pem(pem).context("parsing client certificate and key")?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder.build().context("building HTTP client")?,
            base_url: cluster.server.trim_end_matches('/').to_string(),
            token: cluster.token.clone(),
            workload,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Object name for one request. The request id keeps repeated
    /// placements on the same node from colliding.
    pub fn workload_name(&self, request_id: &str) -> String {
        format!("{}-{}", self.workload.name_prefix, request_id)
    }

    pub fn pod_manifest(&self, target_id: &str, request_id: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": self.workload_name(request_id),
                "namespace": self.workload.namespace,
            },
            "spec": {
                "restartPolicy": self.workload.restart_policy,
                "nodeName": target_id,
                "containers": [{
                    "name": self.workload.container_name,
                    "image": self.workload.image,
                }],
            },
        })
    }
}

#[async_trait]
impl Directory for KubeClient {
    async fn list_targets(&self) -> Result<Vec<TargetRecord>> {
        let url = format!("{}/api/v1/nodes", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("node list failed: {}", response.status()));
        }

        let nodes: NodeList = response.json().await.context("decoding node list")?;
        Ok(nodes
            .items
            .into_iter()
            .map(|n| TargetRecord::new(n.metadata.name))
            .collect())
    }
}

#[async_trait]
impl Provisioner for KubeClient {
    async fn create_workload(&self, target_id: &str, request_id: &str) -> Result<()> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods",
            self.base_url, self.workload.namespace
        );
        let body = self.pod_manifest(target_id, request_id);
        let response = self.authorize(self.client.post(&url)).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("pod create on {} failed: {} {}", target_id, status, detail));
        }
        Ok(())
    }
}
