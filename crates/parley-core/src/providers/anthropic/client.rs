//! Anthropic client api implementation
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::completion::{ANTHROPIC_VERSION_LATEST, CompletionModel};
use crate::client::{ClientBuilderError, CompletionClient, ProviderClient, required_env};
use crate::http_client::{self, HttpClientExt, Request, retry::RetryConfig};

// ================================================================
// Main Anthropic Client
// ================================================================
const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Clone, Debug)]
pub struct ClientBuilder<'a, H = reqwest::Client> {
    api_key: &'a str,
    base_url: &'a str,
    anthropic_version: &'a str,
    anthropic_betas: Option<Vec<&'a str>>,
    retry: RetryConfig,
    http_client: Option<H>,
}

/// Create a new anthropic client using the builder
///
/// # Example
/// ```ignore
/// use parley::providers::anthropic::{ClientBuilder, self};
/// use parley::http_client::retry::RetryConfig;
///
/// // Initialize the Anthropic client
/// let anthropic_client = ClientBuilder::new("your-claude-api-key")
///    .anthropic_version(anthropic::ANTHROPIC_VERSION_LATEST)
///    .anthropic_beta("prompt-caching-2024-07-31")
///    .retry_config(RetryConfig::default().on_http_codes([429]))
///    .build()?;
/// ```
impl<'a> ClientBuilder<'a, reqwest::Client> {
    pub fn new(api_key: &'a str) -> Self {
        Self {
            api_key,
            base_url: ANTHROPIC_API_BASE_URL,
            anthropic_version: ANTHROPIC_VERSION_LATEST,
            anthropic_betas: None,
            retry: RetryConfig::default(),
            http_client: None,
        }
    }
}

impl<'a, H> ClientBuilder<'a, H> {
    pub fn base_url(mut self, base_url: &'a str) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn anthropic_version(mut self, anthropic_version: &'a str) -> Self {
        self.anthropic_version = anthropic_version;
        self
    }

    pub fn anthropic_beta(mut self, anthropic_beta: &'a str) -> Self {
        self.anthropic_betas
            .get_or_insert_with(Vec::new)
            .push(anthropic_beta);
        self
    }

    /// Retry policy applied to every request (and to stream connections).
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the HTTP backend used in this client
    pub fn http_client<U>(self, http_client: U) -> ClientBuilder<'a, U> {
        ClientBuilder {
            api_key: self.api_key,
            base_url: self.base_url,
            anthropic_version: self.anthropic_version,
            anthropic_betas: self.anthropic_betas,
            retry: self.retry,
            http_client: Some(http_client),
        }
    }
}

impl<H> ClientBuilder<'_, H>
where
    H: Default,
{
    pub fn build(self) -> Result<Client<H>, ClientBuilderError> {
        let mut default_headers = HeaderMap::new();

        let mut api_key = HeaderValue::from_str(self.api_key)
            .map_err(|_| ClientBuilderError::InvalidProperty("api_key"))?;
        api_key.set_sensitive(true);
        default_headers.insert(HeaderName::from_static("x-api-key"), api_key);

        default_headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_str(self.anthropic_version)
                .map_err(|_| ClientBuilderError::InvalidProperty("anthropic_version"))?,
        );

        if let Some(betas) = self.anthropic_betas {
            default_headers.insert(
                HeaderName::from_static("anthropic-beta"),
                HeaderValue::from_str(&betas.join(","))
                    .map_err(|_| ClientBuilderError::InvalidProperty("anthropic_beta"))?,
            );
        }

        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Client {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            default_headers,
            http_client: self.http_client.unwrap_or_default(),
            retry: self.retry,
        })
    }
}

#[derive(Clone)]
pub struct Client<T = reqwest::Client> {
    /// The base URL
    base_url: String,
    /// Default headers that will be automatically added to any given request with this client
    /// (API key, Anthropic Version and any betas that have been added)
    default_headers: HeaderMap,
    /// The underlying HTTP client
    http_client: T,
    retry: RetryConfig,
}

impl<T> std::fmt::Debug for Client<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("http_client", &self.http_client)
            .field("default_headers", &self.default_headers)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Client<reqwest::Client> {
    /// Create a new Anthropic client with the given API key and default settings.
    /// Use [`ClientBuilder`] to customize it.
    pub fn new(api_key: &str) -> Result<Self, ClientBuilderError> {
        ClientBuilder::new(api_key).build()
    }
}

impl<T> Client<T> {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_client(&self) -> &T {
        &self.http_client
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// A POST request builder for `path`, carrying the default headers.
    pub(crate) fn post(&self, path: &str) -> http_client::Builder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let mut req = Request::post(url);
        if let Some(headers) = req.headers_mut() {
            headers.extend(self.default_headers.clone());
        }
        req
    }
}

impl ProviderClient for Client<reqwest::Client> {
    type Input = String;

    /// Create a new Anthropic client from the `ANTHROPIC_API_KEY` environment variable, with an
    /// optional `ANTHROPIC_BASE_URL` override. Retries are configured from the environment as
    /// described in [`RetryConfig::from_env`].
    fn from_env() -> Result<Self, ClientBuilderError> {
        let api_key = required_env("ANTHROPIC_API_KEY")?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL").ok();
        let retry = RetryConfig::from_env()?;

        let mut builder = ClientBuilder::new(&api_key).retry_config(retry);
        if let Some(base_url) = base_url.as_deref() {
            builder = builder.base_url(base_url);
        }
        builder.build()
    }

    fn from_val(input: Self::Input) -> Result<Self, ClientBuilderError> {
        Client::new(&input)
    }
}

impl<T> CompletionClient for Client<T>
where
    T: HttpClientExt + Clone + 'static,
{
    type CompletionModel = CompletionModel<T>;

    fn completion_model(&self, model: &str) -> CompletionModel<T> {
        CompletionModel::new(self.clone(), model)
    }
}
