use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::{debug, trace};
use url::Url;

use crate::config::DownloaderConfig;
use crate::http::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::http::{HttpError, Response};

/// Per-request options. Unset fields fall back to the client's defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Base for resolving relative request URLs.
    pub base: Option<Url>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the request body and mark it as JSON.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body))
    }

    pub fn base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// Layer these options over `defaults`. A header set here replaces every default
    /// value of the same name; query parameters accumulate.
    fn merged_over(self, defaults: &RequestOptions) -> RequestOptions {
        let mut headers = defaults.headers.clone();
        for name in self.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in self.headers.iter() {
            headers.append(name.clone(), value.clone());
        }

        let mut query = defaults.query.clone();
        query.extend(self.query);

        RequestOptions {
            method: self.method.or_else(|| defaults.method.clone()),
            headers,
            query,
            body: self.body.or_else(|| defaults.body.clone()),
            base: self.base.or_else(|| defaults.base.clone()),
        }
    }
}

/// Streaming HTTP client over a [`Transport`].
///
/// Cloning is cheap; clones share the transport.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    defaults: RequestOptions,
}

impl HttpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            defaults: RequestOptions::default(),
        }
    }

    /// Build a reqwest-backed client carrying the configured headers and query parameters.
    pub fn from_config(config: &DownloaderConfig) -> Result<Self, HttpError> {
        let transport = ReqwestTransport::new(config)?;
        let mut defaults = RequestOptions::new().headers(config.headers.clone());
        defaults.query = config.params.clone();
        Ok(Self {
            transport: Arc::new(transport),
            defaults,
        })
    }

    /// Derive a client whose defaults are `defaults` layered over this client's defaults.
    /// `self` is left untouched.
    pub fn wrap(&self, defaults: RequestOptions) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            defaults: defaults.merged_over(&self.defaults),
        }
    }

    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    /// Issue a request.
    ///
    /// Responses with a status in `[400, 600)` are drained and turned into
    /// [`HttpError::Status`] carrying the body text.
    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        let options = options.merged_over(&self.defaults);
        let mut url = resolve_url(url, options.base.as_ref())?;
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.query);
        }
        let method = options.method.unwrap_or(Method::GET);
        trace!(%method, %url, "Sending request");

        let response = self
            .transport
            .send(TransportRequest {
                method: method.clone(),
                url,
                headers: options.headers,
                body: options.body,
            })
            .await?;
        let mut response = Response::new(response, &method);

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await?.unwrap_or_default();
            debug!(
                status = status.as_u16(),
                url = %response.url(),
                "Request failed with error status"
            );
            return Err(HttpError::Status { status, body });
        }

        Ok(response)
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::GET)).await
    }

    pub async fn head(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::HEAD)).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::POST)).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::PUT)).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::DELETE)).await
    }

    pub async fn patch(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::PATCH)).await
    }

    pub async fn options(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::OPTIONS)).await
    }

    pub async fn trace(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::TRACE)).await
    }

    pub async fn connect(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request(url, options.method(Method::CONNECT)).await
    }

    /// GET `url` and read the full decoded body.
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes, HttpError> {
        let mut response = self.get(url, RequestOptions::new()).await?;
        Ok(response.body().await?.unwrap_or_default())
    }

    /// GET `url` and read the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let mut response = self.get(url, RequestOptions::new()).await?;
        Ok(response.text().await?.unwrap_or_default())
    }
}

/// Parse `input` as an absolute URL, or resolve it against `base` when it is relative.
pub(crate) fn resolve_url(input: &str, base: Option<&Url>) -> Result<Url, HttpError> {
    match Url::parse(input) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(input)
                .map_err(|e| HttpError::invalid_url(input, e.to_string())),
            None => Err(HttpError::invalid_url(input, "relative URL without a base")),
        },
        Err(e) => Err(HttpError::invalid_url(input, e.to_string())),
    }
}
