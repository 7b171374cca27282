use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::common::{PodWithStats, PodsResponse, StatsResponse, TelemetryMethod, VersionResponse};
use crate::config::{AppConfig, ConfigError};

use super::envelope::{RequestIds, RpcRequest, RpcResponse};
use super::error::RpcError;

/// Where and how long to talk to peers.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub default_endpoint: Url,
    pub peer_port: u16,
    pub peer_path: String,
    pub timeout: Duration,
}

impl RpcSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let default_endpoint = Url::parse(&config.rpc_endpoint)
            .map_err(|_| ConfigError::InvalidEndpoint(config.rpc_endpoint.clone()))?;
        let peer_path = if config.peer_rpc_path.starts_with('/') {
            config.peer_rpc_path.clone()
        } else {
            format!("/{}", config.peer_rpc_path)
        };

        Ok(Self {
            default_endpoint,
            peer_port: config.peer_rpc_port,
            peer_path,
            timeout: config.request_timeout(),
        })
    }
}

/// pRPC client: one POST per call, no retries, no state between calls.
#[derive(Debug)]
pub struct TelemetryClient {
    http: reqwest::Client,
    settings: RpcSettings,
    ids: RequestIds,
}

impl TelemetryClient {
    pub fn new(settings: RpcSettings) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .no_proxy()
            .build()?;

        Ok(Self {
            http,
            settings,
            ids: RequestIds::new(),
        })
    }

    pub async fn get_stats(&self, address: Option<&str>) -> Result<StatsResponse, RpcError> {
        self.call(TelemetryMethod::GetStats, address, json!({})).await
    }

    pub async fn get_version(&self, address: Option<&str>) -> Result<VersionResponse, RpcError> {
        self.call(TelemetryMethod::GetVersion, address, json!({})).await
    }

    pub async fn get_pods_with_stats(
        &self,
        address: Option<&str>,
    ) -> Result<Vec<PodWithStats>, RpcError> {
        let pods: PodsResponse = self
            .call(TelemetryMethod::GetPodsWithStats, address, json!({}))
            .await?;
        Ok(pods.into_pods())
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: TelemetryMethod,
        address: Option<&str>,
        params: Value,
    ) -> Result<T, RpcError> {
        let url = self.resolve_endpoint(address)?;
        log::debug!("Calling {method} at {url}");

        let request = RpcRequest::new(self.ids.next_id(), method, params);
        let result = self.exchange(&url, &request).await;

        match &result {
            Ok(_) => log::debug!("{method} success ({url})"),
            Err(err) => {
                log::debug!("{method} failed at {url}: {err}");
                if err.is_connection_error() && is_loopback(&url) {
                    log::warn!(
                        "Nothing answered on {url}. Is the SSH tunnel running? \
                         Try: ssh -L 6000:localhost:6000 root@<your-pnode-ip>"
                    );
                }
            }
        }

        result
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        url: &Url,
        request: &RpcRequest,
    ) -> Result<T, RpcError> {
        let response = self.http.post(url.clone()).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope = match RpcResponse::from_body(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(RpcError::protocol(format!("peer answered HTTP {status}")));
            }
            Err(err) => return Err(err),
        };

        envelope.into_result()
    }

    /// Port a call to `address` goes to.
    pub fn peer_port(&self, address: &str) -> u16 {
        split_host_port(address)
            .ok()
            .and_then(|(_, port)| port)
            .unwrap_or(self.settings.peer_port)
    }

    pub fn resolve_endpoint(&self, address: Option<&str>) -> Result<Url, RpcError> {
        let Some(address) = address else {
            return Ok(self.settings.default_endpoint.clone());
        };

        let (host, port) = split_host_port(address)?;
        let port = port.unwrap_or(self.settings.peer_port);
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        Url::parse(&format!("http://{host}:{port}{}", self.settings.peer_path))
            .map_err(|err| RpcError::protocol(format!("invalid peer address `{address}`: {err}")))
    }
}

/// Splits `host` or `host:port`; bare IPv6 addresses have no port.
fn split_host_port(address: &str) -> Result<(String, Option<u16>), RpcError> {
    let address = address.trim();
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok((ip.to_string(), None));
    }
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return Ok((socket.ip().to_string(), Some(socket.port())));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => port
            .parse::<u16>()
            .map(|port| (host.to_string(), Some(port)))
            .map_err(|_| RpcError::protocol(format!("invalid port in peer address `{address}`"))),
        Some(_) => Err(RpcError::protocol(format!("invalid peer address `{address}`"))),
        None if address.is_empty() => Err(RpcError::protocol("empty peer address")),
        None => Ok((address.to_string(), None)),
    }
}

fn is_loopback(url: &Url) -> bool {
    matches!(url.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"))
}
