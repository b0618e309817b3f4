use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use reqwest::header::{CONTENT_ENCODING, HeaderMap};

use crate::http::HttpError;

/// Incremental decoder for the `Content-Encoding` of a response body.
pub(crate) enum ContentDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl ContentDecoder {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if encoding.contains("gzip") {
            Self::Gzip(GzDecoder::new(Vec::new()))
        } else if encoding.contains("deflate") {
            Self::Deflate(ZlibDecoder::new(Vec::new()))
        } else {
            Self::Identity
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip(_) => "gzip",
            Self::Deflate(_) => "deflate",
        }
    }

    /// Feed one raw chunk and return whatever output it produced (possibly empty).
    pub(crate) fn decode(&mut self, chunk: Bytes) -> Result<Bytes, HttpError> {
        let encoding = self.name();
        let map_err = |e: std::io::Error| HttpError::Decode {
            encoding,
            reason: e.to_string(),
        };
        match self {
            Self::Identity => Ok(chunk),
            Self::Gzip(decoder) => {
                decoder.write_all(&chunk).map_err(map_err)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Deflate(decoder) => {
                decoder.write_all(&chunk).map_err(map_err)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }

    /// Flush the decoder once the raw input has ended.
    pub(crate) fn finish(&mut self) -> Result<Bytes, HttpError> {
        let encoding = self.name();
        let map_err = |e: std::io::Error| HttpError::Decode {
            encoding,
            reason: e.to_string(),
        };
        match self {
            Self::Identity => Ok(Bytes::new()),
            Self::Gzip(decoder) => {
                decoder.try_finish().map_err(map_err)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Deflate(decoder) => {
                decoder.try_finish().map_err(map_err)?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
        }
    }
}
