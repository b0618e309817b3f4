use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::buffer::MemoryWriter;
use crate::http::HttpError;
use crate::http::decoder::ContentDecoder;
use crate::http::transport::{BodyStream, TransportResponse};

/// Live handle over one HTTP exchange.
///
/// The body can be consumed exactly once, either as a stream via
/// [`Response::stream`] or through one of the materializing helpers.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    redirects: Vec<Url>,
    body: Option<ResponseBody>,
}

impl Response {
    pub(crate) fn new(response: TransportResponse, method: &Method) -> Self {
        let TransportResponse {
            status,
            headers,
            url,
            redirects,
            body,
        } = response;

        // HEAD responses and bodiless statuses advertise a length they never send.
        let expects_body = *method != Method::HEAD
            && status != StatusCode::NO_CONTENT
            && status != StatusCode::NOT_MODIFIED;
        let expected = if expects_body {
            content_length(&headers)
        } else {
            None
        };
        let body = ResponseBody::new(body, ContentDecoder::from_headers(&headers), expected);

        Self {
            status,
            headers,
            url,
            redirects,
            body: Some(body),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn redirects(&self) -> &[Url] {
        &self.redirects
    }

    /// Declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }

    pub fn body_used(&self) -> bool {
        self.body.is_none()
    }

    /// Take the decoded body stream. Returns `None` once the body has been used.
    pub fn stream(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// Read the whole decoded body into one buffer.
    pub async fn body(&mut self) -> Result<Option<Bytes>, HttpError> {
        let Some(mut stream) = self.stream() else {
            return Ok(None);
        };
        let mut writer = MemoryWriter::new();
        while let Some(chunk) = stream.next().await {
            writer.write(chunk?)?;
        }
        Ok(writer.data())
    }

    /// Read the whole body as UTF-8 text; invalid sequences are replaced.
    pub async fn text(&mut self) -> Result<Option<String>, HttpError> {
        Ok(self
            .body()
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, HttpError> {
        match self.body().await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Decoded body stream of a [`Response`].
///
/// End of stream is only reported after the number of raw bytes received has been
/// checked against the declared `Content-Length`; on a mismatch the stream yields
/// [`HttpError::ContentMismatch`] instead of ending.
pub struct ResponseBody {
    inner: BodyStream,
    decoder: ContentDecoder,
    expected: Option<u64>,
    received: u64,
    done: bool,
}

impl ResponseBody {
    fn new(inner: BodyStream, decoder: ContentDecoder, expected: Option<u64>) -> Self {
        Self {
            inner,
            decoder,
            expected,
            received: 0,
            done: false,
        }
    }

    /// Raw bytes received from the transport so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    fn fail(&mut self, err: HttpError) -> Poll<Option<Result<Bytes, HttpError>>> {
        self.done = true;
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, HttpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    this.received += chunk.len() as u64;
                    match this.decoder.decode(chunk) {
                        Ok(decoded) if decoded.is_empty() => continue,
                        Ok(decoded) => return Poll::Ready(Some(Ok(decoded))),
                        Err(e) => return this.fail(e),
                    }
                }
                Some(Err(e)) => return this.fail(e),
                None => {
                    this.done = true;
                    if let Some(expected) = this.expected
                        && expected != this.received
                    {
                        return Poll::Ready(Some(Err(HttpError::ContentMismatch {
                            expected,
                            received: this.received,
                        })));
                    }
                    return match this.decoder.finish() {
                        Ok(tail) if tail.is_empty() => Poll::Ready(None),
                        Ok(tail) => Poll::Ready(Some(Ok(tail))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}
