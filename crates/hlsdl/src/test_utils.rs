use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};

use crate::http::{
    BodyStream, HttpClient, HttpError, Transport, TransportRequest, TransportResponse,
};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Helper function to encrypt data for testing decryption
pub fn encrypt_data(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    use cbc::cipher::block_padding::Pkcs7;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit};
    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    let cipher = Aes128CbcEnc::new_from_slices(key, iv).unwrap();
    // Calculate padded length (round up to next 16-byte boundary)
    let padded_len = ((plaintext.len() / 16) + 1) * 16;
    let mut buffer = vec![0u8; padded_len];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    let encrypted = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
        .unwrap();
    encrypted.to_vec()
}

pub fn body_stream<B: AsRef<[u8]>>(chunks: Vec<B>) -> BodyStream {
    owned_body_stream(
        chunks
            .iter()
            .map(|c| Bytes::copy_from_slice(c.as_ref()))
            .collect(),
    )
}

fn owned_body_stream(chunks: Vec<Bytes>) -> BodyStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// Canned response served by [`MockTransport`].
#[derive(Clone)]
pub struct MockRoute {
    status: StatusCode,
    headers: HeaderMap,
    chunks: Vec<Bytes>,
    delay: Duration,
}

impl MockRoute {
    /// 200 response with a correct `Content-Length`.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    pub fn status(code: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        Self {
            status: StatusCode::from_u16(code).expect("valid status code"),
            headers,
            chunks: vec![body],
            delay: Duration::ZERO,
        }
    }

    /// Split the body into chunks of `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        let body: Vec<u8> = self.chunks.iter().flat_map(|c| c.iter().copied()).collect();
        self.chunks = body.chunks(size).map(Bytes::copy_from_slice).collect();
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(value).expect("valid header value"),
        );
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-memory [`Transport`] serving canned responses keyed by absolute URL.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, MockRoute>>,
    hits: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, route: MockRoute) -> &Self {
        self.routes.lock().insert(url.to_string(), route);
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn client(self: &Arc<Self>) -> HttpClient {
        HttpClient::new(self.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, HttpError> {
        let key = request.url.to_string();
        *self.hits.lock().entry(key.clone()).or_default() += 1;
        self.requests.lock().push(request.clone());

        let route = self.routes.lock().get(&key).cloned();
        let Some(route) = route else {
            return Err(HttpError::connection(format!("connection refused: {key}")));
        };
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }

        Ok(TransportResponse {
            status: route.status,
            headers: route.headers,
            url: request.url,
            redirects: Vec::new(),
            body: owned_body_stream(route.chunks),
        })
    }
}
