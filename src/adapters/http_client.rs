//! Upstream transport adapter.
//!
//! Hyper-based client (HTTP/1.1 with ALPN-negotiated h2, rustls with native
//! roots). Deliberately minimal: no retries, no circuit breaking, no
//! gateway-imposed timeout; the pipeline's forwarder turns any transport
//! error reported here into a 502.

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(build_connector());
        tracing::info!("Upstream HTTP client ready (HTTP/1.1 + ALPN h2)");

        Ok(Self { client })
    }

    /// Derive the Host header value from the target URI. Empty when the URI
    /// carries no usable host.
    fn host_header(req: &Request<AxumBody>) -> Option<HeaderValue> {
        let host = req.uri().host()?;
        let value = match req.uri().port() {
            Some(port) => format!("{host}:{}", port.as_u16()),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).ok()
    }
}

fn build_connector() -> HttpsConnector<HttpConnector> {
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();

    let (added, rejected) = roots.add_parsable_certificates(loaded.certs);
    if rejected > 0 {
        tracing::warn!(rejected, "Some native root certificates were not usable");
    }
    if !loaded.errors.is_empty() {
        tracing::warn!(errors = ?loaded.errors, "Errors while loading native root certificates");
    }
    tracing::debug!(added, "Loaded native root certificates");

    let tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false); // plain-http targets still allowed

    hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http)
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let target = req.uri().clone();

        let span = tracing::info_span!(
            "upstream_request",
            http.method = %req.method(),
            http.target = %target,
            http.status_code = tracing::field::Empty,
        );
        let _enter = span.enter();

        match Self::host_header(&req) {
            Some(host) => {
                req.headers_mut().insert(header::HOST, host);
            }
            None => {
                tracing::error!("Outgoing URI has no host: {target}");
                return Err(HttpClientError::InvalidRequest(
                    "Outgoing URI has no host".to_string(),
                ));
            }
        }

        // Pin the request line to HTTP/1.1; ALPN upgrades to h2 where the
        // upstream supports it.
        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, upstream_body) = response.into_parts();
                // The body is re-framed on the way back to the client.
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(upstream_body)))
            }
            Err(e) => {
                tracing::error!("Upstream request to {target} failed: {e}");
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {target} failed: {e}"
                )))
            }
        }
    }
}
