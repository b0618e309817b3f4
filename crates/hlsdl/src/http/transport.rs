// HTTP Transport: the raw request primitive underneath `HttpClient`.

use std::pin::Pin;
use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::config::DownloaderConfig;
use crate::http::HttpError;

/// Raw response body as delivered by the transport, before any transfer decoding.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Final URL after redirects.
    pub url: Url,
    /// Every redirect target in the order it was followed.
    pub redirects: Vec<Url>,
    pub body: BodyStream,
}

/// Socket-level request primitive.
///
/// Implementations follow redirects themselves and report the chain in
/// [`TransportResponse::redirects`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, HttpError>;
}

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// [`Transport`] backed by `reqwest`.
///
/// Automatic decompression is switched off so that the body reaches
/// [`crate::http::Response`] exactly as it came off the wire.
pub struct ReqwestTransport {
    client: Client,
    follow_redirects: bool,
    max_redirects: usize,
}

impl ReqwestTransport {
    pub fn new(config: &DownloaderConfig) -> Result<Self, HttpError> {
        install_rustls_provider();
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .no_deflate()
            .no_brotli();

        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }

        Ok(Self {
            client: builder.build()?,
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
        })
    }

    /// Wrap an existing client. The client must not follow redirects on its own,
    /// otherwise the redirect chain cannot be observed.
    pub fn with_client(client: Client, follow_redirects: bool, max_redirects: usize) -> Self {
        Self {
            client,
            follow_redirects,
            max_redirects,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, HttpError> {
        let TransportRequest {
            mut method,
            mut url,
            headers,
            mut body,
        } = request;
        let mut redirects = Vec::new();

        loop {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await?;
            let status = response.status();
            trace!(%url, status = status.as_u16(), version = ?response.version(), "Transport response");

            if self.follow_redirects
                && status.is_redirection()
                && let Some(location) = response.headers().get(LOCATION)
            {
                if redirects.len() >= self.max_redirects {
                    return Err(HttpError::TooManyRedirects {
                        url: url.to_string(),
                        count: redirects.len(),
                    });
                }
                let location = location.to_str().map_err(|e| HttpError::InvalidHeader {
                    reason: format!("non-ASCII Location header: {e}"),
                })?;
                let next = url
                    .join(location)
                    .map_err(|e| HttpError::invalid_url(location, e.to_string()))?;

                let rewrite_to_get = status == StatusCode::SEE_OTHER
                    || ((status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
                        && method != Method::GET
                        && method != Method::HEAD);
                if rewrite_to_get {
                    method = Method::GET;
                    body = None;
                }

                debug!(from = %url, to = %next, status = status.as_u16(), "Following redirect");
                redirects.push(next.clone());
                url = next;
                continue;
            }

            let headers = response.headers().clone();
            let body = response.bytes_stream().map_err(HttpError::from).boxed();
            return Ok(TransportResponse {
                status,
                headers,
                url,
                redirects,
                body,
            });
        }
    }
}
