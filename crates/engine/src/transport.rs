//! REST transport to the CAST AI API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::classify::{self, ConflictDetection, Expect};
use crate::config::ProviderConfig;
use crate::context::VerbContext;
use crate::error::{Error, ErrorContext, Result};
use crate::pagination::{Page, PageRequest};

/// A request to the upstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the API base URL, starting with `/`
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// PATCH request.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error when the body does not serialize.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds the pagination parameters.
    #[must_use]
    pub fn page(mut self, page: &PageRequest) -> Self {
        self.query.extend(page.query());
        self
    }

    /// `METHOD /path`, for error context and logs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// A response from the upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw body
    pub body: Vec<u8>,
}

/// Failure before a response was received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The request timed out.
    #[error("request timed out")]
    Timeout,
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other client failure.
    #[error("request failed: {0}")]
    Other(String),
}

/// Sends requests to the upstream API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError>;
}

/// `reqwest` transport with bearer authentication.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Builds the transport from the provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be initialised.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config_invalid(format!("Failed to initialise HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        Ok(ApiResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Classifying API client shared by every resource.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient").finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Wraps a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Sends a request under the verb's deadline and classifies the response.
    ///
    /// # Errors
    ///
    /// Returns the classified error for transport failures and non-success
    /// statuses, or `Cancelled`/`Timeout` from the verb context.
    #[instrument(name = "api_call", skip_all, fields(endpoint = %request.endpoint()))]
    pub async fn call_with(
        &self,
        ctx: &VerbContext,
        request: ApiRequest,
        expect: Expect,
        conflicts: ConflictDetection,
    ) -> Result<ApiResponse> {
        let endpoint = request.endpoint();
        let context = ErrorContext {
            resource_type: Some(ctx.resource_type().to_string()),
            ..ErrorContext::for_endpoint(endpoint.clone())
        };

        let response = ctx
            .run(async {
                self.transport
                    .send(request)
                    .await
                    .map_err(|e| classify::transport_failure(&e, context.clone()))
            })
            .await?;

        debug!(status = response.status, "Upstream responded");
        classify::check(response, expect, conflicts, context)
    }

    /// Sends a request with status-only conflict detection.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call_with`].
    pub async fn call(&self, ctx: &VerbContext, request: ApiRequest, expect: Expect) -> Result<ApiResponse> {
        self.call_with(ctx, request, expect, ConflictDetection::Status)
            .await
    }

    /// Sends a request and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call_with`]; a body that does not decode is fatal.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        ctx: &VerbContext,
        request: ApiRequest,
        expect: Expect,
        conflicts: ConflictDetection,
    ) -> Result<T> {
        let endpoint = request.endpoint();
        let response = self.call_with(ctx, request, expect, conflicts).await?;
        decode_body(&response, &endpoint)
    }

    /// GET returning JSON.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call_json`].
    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &VerbContext, path: impl Into<String>) -> Result<T> {
        self.call_json(ctx, ApiRequest::get(path), Expect::Ok, ConflictDetection::Status)
            .await
    }

    /// Fetches one page of a list endpoint.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call_json`].
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        ctx: &VerbContext,
        path: &str,
        page: PageRequest,
    ) -> Result<Page<T>> {
        self.call_json(
            ctx,
            ApiRequest::get(path).page(&page),
            Expect::Ok,
            ConflictDetection::Status,
        )
        .await
    }
}

/// Decodes a JSON response body.
///
/// # Errors
///
/// Returns a fatal error naming the endpoint when the body does not decode.
pub fn decode_body<T: DeserializeOwned>(response: &ApiResponse, endpoint: &str) -> Result<T> {
    let body: &[u8] = if response.body.is_empty() { b"null" } else { &response.body };
    serde_json::from_slice(body).map_err(|e| {
        Error::fatal(
            ErrorContext::for_endpoint(endpoint).with_status(response.status),
            format!("failed to decode response: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Verb;
    use crate::error::ErrorKind;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> ProviderConfig {
        ProviderConfig {
            api_url: url.to_string(),
            api_token: SecretString::from("test-token".to_string()),
            user_agent: "castai-provider/test".to_string(),
            request_timeout: Duration::from_secs(5),
            retry: crate::retry::RetryConfig::default(),
        }
    }

    fn client(url: &str) -> ApiClient {
        ApiClient::new(Arc::new(HttpTransport::new(&config(url)).unwrap()))
    }

    fn ctx() -> VerbContext {
        VerbContext::new("castai_organization_group", Verb::Read, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_sends_auth_user_agent_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/groups"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("user-agent", "castai-provider/test"))
            .and(body_json(json!({"name": "platform"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "g-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let created: serde_json::Value = client(&server.uri())
            .call_json(
                &ctx(),
                ApiRequest::post("/v1/groups").json(&json!({"name": "platform"})).unwrap(),
                Expect::Created,
                ConflictDetection::Status,
            )
            .await
            .unwrap();
        assert_eq!(created["id"], "g-1");
    }

    #[tokio::test]
    async fn test_not_found_carries_context() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/groups/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "group not found"})))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_json::<serde_json::Value>(&ctx(), "/v1/groups/missing")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        let context = err.context().unwrap();
        assert_eq!(context.endpoint.as_deref(), Some("GET /v1/groups/missing"));
        assert_eq!(context.resource_type.as_deref(), Some("castai_organization_group"));
        assert_eq!(context.upstream_message.as_deref(), Some("group not found"));
    }

    #[tokio::test]
    async fn test_get_page_sends_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/groups"))
            .and(query_param("page.limit", "50"))
            .and(query_param("page.cursor", "cursor-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "g-2"}],
                "nextCursor": ""
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page: Page<serde_json::Value> = client(&server.uri())
            .get_page(
                &ctx(),
                "/v1/groups",
                PageRequest {
                    limit: 50,
                    cursor: Some("cursor-2".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let err = client("http://127.0.0.1:9")
            .get_json::<serde_json::Value>(&ctx(), "/v1/groups")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/groups/g-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_json::<serde_json::Value>(&ctx(), "/v1/groups/g-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("failed to decode response"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let transport = HttpTransport::new(&config("https://api.cast.ai/")).unwrap();
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains("test-token"));
        assert!(rendered.contains("https://api.cast.ai\""));
    }
}
