//! ---
//! chroma_section: "05-networking-external-interfaces"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Backend REST client and endpoint layout."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chroma_msg::topic::Topic;
use chroma_msg::{
    log_payload, ColourSubmission, ImageKind, ParameterSnapshot, PayloadDirection, RunConfig,
    SliderUpdate, StopRequest,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Errors raised while talking to the backend over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Base URL or a derived endpoint could not be parsed.
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    /// Base URL uses a scheme other than http or https.
    #[error("unsupported backend scheme '{0}'")]
    Scheme(String),
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request never produced a response.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Path of the endpoint.
        endpoint: &'static str,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The backend answered with a non-success status.
    #[error("{endpoint} answered with status {status}")]
    Status {
        /// Path of the endpoint.
        endpoint: &'static str,
        /// HTTP status code.
        status: u16,
    },
    /// The response body did not match the expected shape.
    #[error("unexpected response body from {endpoint}: {source}")]
    Decode {
        /// Path of the endpoint.
        endpoint: &'static str,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

const SLIDER: &str = "/api/slider";
const SUBMIT_COLOUR: &str = "/api/submitColour";
const SCRIPTS: &str = "/api/scripts";
const RUN_CONFIG: &str = "/api/runConfig";
const STOP: &str = "/api/stop";

/// HTTP and WebSocket roots of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    http: Url,
    ws: Url,
}

impl Endpoints {
    /// Derive both roots from the HTTP base. `http` maps to `ws`, `https` to `wss`.
    pub fn new(base: &str) -> Result<Self, BackendError> {
        let http = Url::parse(base)?;
        let ws_scheme = match http.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(BackendError::Scheme(other.to_owned())),
        };
        let mut ws = http.clone();
        ws.set_scheme(ws_scheme)
            .map_err(|_| BackendError::Scheme(ws_scheme.to_owned()))?;
        Ok(Self { http, ws })
    }

    /// HTTP root.
    pub fn http_base(&self) -> &Url {
        &self.http
    }

    /// WebSocket root.
    pub fn ws_base(&self) -> &Url {
        &self.ws
    }

    /// Absolute URL of an `/api` endpoint.
    pub fn api(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.http.join(path)?)
    }

    /// Absolute URL of a push stream.
    pub fn stream(&self, topic: Topic) -> Result<Url, BackendError> {
        Ok(self.ws.join(&topic.path())?)
    }

    /// Preview image URL carrying a cache-busting timestamp.
    pub fn image(&self, kind: ImageKind, cache_buster: i64) -> Result<Url, BackendError> {
        let mut url = self.api(kind.path())?;
        url.query_pairs_mut()
            .append_pair("t", &cache_buster.to_string());
        Ok(url)
    }
}

/// Request/response operations of the bot backend.
#[async_trait]
pub trait ControlBackend: Send + Sync + 'static {
    /// `POST /api/slider`.
    async fn update_parameter(&self, update: &SliderUpdate) -> Result<(), BackendError>;
    /// `GET /api/slider`.
    async fn parameters(&self) -> Result<ParameterSnapshot, BackendError>;
    /// `POST /api/submitColour`.
    async fn submit_colour(&self, colour: &ColourSubmission) -> Result<(), BackendError>;
    /// `GET /api/scripts`.
    async fn scripts(&self) -> Result<Vec<String>, BackendError>;
    /// `POST /api/runConfig`.
    async fn start_script(&self, config: &RunConfig) -> Result<(), BackendError>;
    /// `POST /api/stop`.
    async fn stop_script(&self) -> Result<(), BackendError>;
}

/// [`ControlBackend`] over HTTP using reqwest.
#[derive(Debug, Clone)]
pub struct HttpControlBackend {
    client: Client,
    endpoints: Endpoints,
}

impl HttpControlBackend {
    /// Construct a backend client with a per-request timeout.
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Client)?;
        Ok(Self { client, endpoints })
    }

    /// Endpoint layout used by this client.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn post_json<T: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        body: &T,
    ) -> Result<RequestBuilder, BackendError> {
        Ok(self.client.post(self.endpoints.api(endpoint)?).json(body))
    }

    async fn execute(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, BackendError> {
        let request = request
            .build()
            .map_err(|source| BackendError::Transport { endpoint, source })?;
        let bytes = request
            .body()
            .and_then(|body| body.as_bytes())
            .map_or(0, <[u8]>::len);
        log_payload(PayloadDirection::Outbound, None, bytes);
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| BackendError::Transport { endpoint, source })?;
        let status = response.status();
        debug!(endpoint, status = status.as_u16(), "backend responded");
        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlBackend for HttpControlBackend {
    async fn update_parameter(&self, update: &SliderUpdate) -> Result<(), BackendError> {
        let request = self.post_json(SLIDER, update)?;
        self.execute(SLIDER, request).await.map(drop)
    }

    async fn parameters(&self) -> Result<ParameterSnapshot, BackendError> {
        let request = self.client.get(self.endpoints.api(SLIDER)?);
        self.execute(SLIDER, request)
            .await?
            .json()
            .await
            .map_err(|source| BackendError::Decode {
                endpoint: SLIDER,
                source,
            })
    }

    async fn submit_colour(&self, colour: &ColourSubmission) -> Result<(), BackendError> {
        let request = self.post_json(SUBMIT_COLOUR, colour)?;
        self.execute(SUBMIT_COLOUR, request).await.map(drop)
    }

    async fn scripts(&self) -> Result<Vec<String>, BackendError> {
        let request = self.client.get(self.endpoints.api(SCRIPTS)?);
        self.execute(SCRIPTS, request)
            .await?
            .json()
            .await
            .map_err(|source| BackendError::Decode {
                endpoint: SCRIPTS,
                source,
            })
    }

    async fn start_script(&self, config: &RunConfig) -> Result<(), BackendError> {
        let request = self.post_json(RUN_CONFIG, config)?;
        self.execute(RUN_CONFIG, request).await.map(drop)
    }

    async fn stop_script(&self) -> Result<(), BackendError> {
        let request = self.post_json(STOP, &StopRequest::default())?;
        self.execute(STOP, request).await.map(drop)
    }
}
