//! The dashboard's REST endpoints that mint terminal and file manager sessions.

use std::future::Future;

use dashterm_protocol::{ApiResponse, CreateFmResponse, CreateTerminalRequest, CreateTerminalResponse};

use crate::transport::TransportSession;
use crate::{Error, Result};

/// The collaborator the controllers depend on: session creation plus
/// WebSocket connection to the dashboard.
pub trait Dashboard {
    /// `POST /api/v1/terminal`.
    fn create_terminal(
        &self,
        server_id: u64,
    ) -> impl Future<Output = Result<CreateTerminalResponse>> + Send;

    /// `GET /api/v1/file?id=`.
    fn create_fm(&self, server_id: u64) -> impl Future<Output = Result<CreateFmResponse>> + Send;

    /// Open a WebSocket on `path` relative to the dashboard root.
    fn connect(&self, path: &str) -> impl Future<Output = Result<TransportSession>> + Send;
}

/// [`Dashboard`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDashboard {
    client: reqwest::Client,
    base: url::Url,
    token: Option<String>,
}

impl HttpDashboard {
    pub fn new(base: &str, token: Option<String>) -> Result<Self> {
        let mut base = url::Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token,
        })
    }

    /// Dashboard at `dashboard.url`, authenticated with the effective token.
    pub fn from_config(config: &dashterm_config::Config) -> Result<Self> {
        Self::new(&config.dashboard.url, dashterm_config::get_token(config))
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    /// WebSocket URL for `path`: `http` becomes `ws`, `https` becomes `wss`.
    pub fn ws_url(&self, path: &str) -> Result<url::Url> {
        let mut url = self.endpoint(path)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::Connection(format!(
                    "unsupported dashboard scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::Connection(format!("cannot derive WebSocket URL from {url}")))?;
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn unwrap_envelope<T>(response: reqwest::Response) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        let body = response.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&body).map_err(|e| {
            if status.is_success() {
                Error::Json(e)
            } else {
                Error::Api(format!("HTTP {status}"))
            }
        })?;

        if !envelope.success {
            let message = if envelope.error.is_empty() {
                format!("HTTP {status}")
            } else {
                envelope.error
            };
            return Err(Error::Api(message));
        }
        envelope
            .data
            .ok_or_else(|| Error::Api("response carried no data".to_string()))
    }
}

impl Dashboard for HttpDashboard {
    async fn create_terminal(&self, server_id: u64) -> Result<CreateTerminalResponse> {
        let url = self.endpoint("api/v1/terminal")?;
        tracing::debug!("creating terminal session for server {server_id}");
        let response = self
            .authorize(self.client.post(url))
            .json(&CreateTerminalRequest { server_id })
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }

    async fn create_fm(&self, server_id: u64) -> Result<CreateFmResponse> {
        let url = self.endpoint("api/v1/file")?;
        tracing::debug!("creating file manager session for server {server_id}");
        let response = self
            .authorize(self.client.get(url))
            .query(&[("id", server_id)])
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }

    async fn connect(&self, path: &str) -> Result<TransportSession> {
        let url = self.ws_url(path)?;
        Ok(TransportSession::open(url, self.token.clone()))
    }
}
