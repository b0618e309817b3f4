// Streaming HTTP client: redirect-aware transport, transfer decoding and
// Content-Length validation.

mod client;
mod decoder;
pub mod error;
mod response;
mod transport;

pub use client::{HttpClient, RequestOptions};
pub use error::HttpError;
pub use response::{Response, ResponseBody};
pub use transport::{BodyStream, ReqwestTransport, Transport, TransportRequest, TransportResponse};
