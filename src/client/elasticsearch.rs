//! Elasticsearch REST implementation of the cluster control client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{
    ClusterHealth, FlushResponse, Node, NodesInfoResponse, SettingScope, SettingsResponse,
};
use super::ClusterControlClient;
use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 9200;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Client for the Elasticsearch HTTP API
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    http_client: Client,
    base_url: String,
}

impl ElasticsearchClient {
    /// Build a client without contacting the cluster
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("es-maintenance-hook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            http_client,
            base_url: normalize_endpoint(endpoint)?,
        })
    }

    /// Build a client and block until the cluster answers a health request
    ///
    /// Any health status (red, yellow or green) means the cluster is up. The
    /// request is retried every second until `connect_timeout` elapses.
    pub async fn connect(
        endpoint: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Self::new(endpoint, request_timeout)?;
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match client.wait_for_any_status().await {
                Ok(health) => {
                    info!(
                        "Connected to cluster {} ({}) after {} attempt(s)",
                        health.cluster_name, health.status, attempt
                    );
                    return Ok(client);
                }
                Err(e) => {
                    debug!("Cluster not reachable yet (attempt {}): {}", attempt, e);
                }
            }

            if started.elapsed() + CONNECT_RETRY_INTERVAL > connect_timeout {
                warn!(
                    "Giving up on {} after {} attempt(s)",
                    client.base_url, attempt
                );
                return Err(Error::ConnectTimeout {
                    endpoint: client.base_url.clone(),
                    timeout: connect_timeout,
                });
            }
            tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn wait_for_any_status(&self) -> Result<ClusterHealth> {
        let request = self
            .http_client
            .get(self.url("_cluster/health"))
            .query(&[("wait_for_status", "red")]);
        self.send_json(request).await
    }

    /// Send a request and decode a successful JSON body
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Send a request and decode the JSON body whatever the status code
    ///
    /// Settings updates and synced flushes report partial failures in the
    /// body of 4xx responses, which the caller needs to inspect.
    async fn send_for_body(&self, request: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) => json!({ "status": status.as_u16(), "body": body }),
        };
        Ok((status, value))
    }
}

#[async_trait]
impl ClusterControlClient for ElasticsearchClient {
    async fn health(&self) -> Result<ClusterHealth> {
        self.send_json(self.http_client.get(self.url("_cluster/health")))
            .await
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        let info: NodesInfoResponse = self
            .send_json(self.http_client.get(self.url("_nodes")))
            .await?;
        Ok(info.into_nodes())
    }

    async fn put_cluster_setting(
        &self,
        scope: SettingScope,
        key: &str,
        value: Option<&Value>,
    ) -> Result<SettingsResponse> {
        let body = json!({ scope.as_str(): { key: value.cloned().unwrap_or(Value::Null) } });
        debug!("PUT _cluster/settings {}", body);

        let raw = self
            .send_for_body(self.http_client.put(self.url("_cluster/settings")).json(&body))
            .await?
            .1;
        Ok(SettingsResponse::from_value(raw))
    }

    async fn put_index_setting(
        &self,
        index_pattern: &str,
        key: &str,
        value: Option<&Value>,
        preserve_existing: bool,
    ) -> Result<SettingsResponse> {
        let body = json!({ key: value.cloned().unwrap_or(Value::Null) });
        let path = format!("{index_pattern}/_settings");
        debug!(
            "PUT {} (preserve_existing={}) {}",
            path, preserve_existing, body
        );

        let request = self
            .http_client
            .put(self.url(&path))
            .query(&[("preserve_existing", preserve_existing.to_string())])
            .json(&body);
        let (_, raw) = self.send_for_body(request).await?;
        Ok(SettingsResponse::from_value(raw))
    }

    async fn flush_synced(&self, index_pattern: &str) -> Result<FlushResponse> {
        let path = format!("{index_pattern}/_flush/synced");
        // A 409 still carries the shard summary; other failures do not
        let (status, raw) = self
            .send_for_body(self.http_client.post(self.url(&path)))
            .await?;
        if !status.is_success() && raw.get("_shards").is_none() {
            return Err(Error::FlushFailed {
                target: path,
                status: status.as_u16(),
                raw: raw.to_string(),
            });
        }
        Ok(serde_json::from_value(raw)?)
    }

    async fn cluster_settings(&self) -> Result<Value> {
        self.send_json(self.http_client.get(self.url("_cluster/settings")))
            .await
    }
}

/// Turn a discovery service address into a base URL
///
/// `es-discovery` becomes `http://es-discovery:9200`; explicit schemes and
/// ports are kept.
pub fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::ConfigError(
            "Elasticsearch endpoint (DISCOVERY_SERVICE) is empty".to_string(),
        ));
    }

    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", endpoint),
    };
    let rest = rest.trim_end_matches('/');
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{path}")),
        None => (rest, String::new()),
    };

    // A bracketed IPv6 literal without a port ends in `]`
    let explicit_port = authority
        .rsplit_once(':')
        .filter(|_| !authority.ends_with(']'));
    let (host, port) = match explicit_port {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                Error::ConfigError(format!(
                    "Elasticsearch endpoint has an invalid port: {endpoint}"
                ))
            })?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };
    if scheme.is_empty() || host.is_empty() {
        return Err(Error::ConfigError(format!(
            "Elasticsearch endpoint has no host: {endpoint}"
        )));
    }

    Ok(format!("{scheme}://{host}:{port}{path}"))
}
