use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response};
use thiserror::Error;

/// Transport-level failures reaching an upstream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for the plain reverse-forwarding capability: send method, headers,
/// and body to a target URL; hand back the upstream's status, headers, and
/// body, or a transport error. The pipeline decides what a failure means
/// (502, never retried) — this trait only reports it.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `req` to the upstream its URI addresses and return the response.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
