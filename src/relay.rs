//! Upstream round trip: header filtering, body pass-through and the
//! per-family redirect policy.

use crate::config::UpstreamConfig;
use crate::error::Result;
use crate::router::{Target, TargetKind};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, Method};
use axum::response::Response;
use hyper::ext::ReasonPhrase;
use reqwest::redirect::Policy;

/// Headers that only describe a single transport leg. Stripped from the
/// upstream request and from the relayed response alike.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "proxy-connection",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Inbound headers minus hop-by-hop headers and `host`. The client derives
/// `host` from the target URL.
pub fn upstream_request_headers(inbound: &HeaderMap) -> HeaderMap {
    filter_headers(inbound, |name| *name == header::HOST)
}

/// Upstream response headers minus hop-by-hop headers.
pub fn outbound_response_headers(upstream: &HeaderMap) -> HeaderMap {
    filter_headers(upstream, |_| false)
}

fn filter_headers(headers: &HeaderMap, also_drop: impl Fn(&HeaderName) -> bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || also_drop(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// `GET` and `HEAD` never forward a payload, whatever the inbound request holds.
#[must_use]
pub fn carries_body(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

fn client_builder(config: &UpstreamConfig) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder();
    match config.connect_timeout() {
        Some(timeout) => builder.connect_timeout(timeout),
        None => builder,
    }
}

/// Issues upstream requests. Holds one client per redirect policy; both
/// share the same transport settings.
#[derive(Debug, Clone)]
pub struct Relay {
    manual: reqwest::Client,
    following: reqwest::Client,
}

impl Relay {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let manual = client_builder(config).redirect(Policy::none()).build()?;
        let following = client_builder(config)
            .redirect(Policy::limited(config.max_image_redirects))
            .build()?;

        Ok(Self { manual, following })
    }

    fn client_for(&self, kind: TargetKind) -> &reqwest::Client {
        if kind.follows_redirects() {
            &self.following
        } else {
            &self.manual
        }
    }

    /// Forward `request` to `target` and relay the upstream response.
    ///
    /// Both bodies are streamed. Dropping the returned future or the
    /// response body drops the upstream request with it.
    pub async fn forward(&self, request: Request, target: &Target) -> Result<Response> {
        let (parts, body) = request.into_parts();

        let mut headers = upstream_request_headers(&parts.headers);
        let mut builder = self
            .client_for(target.kind)
            .request(parts.method.clone(), target.url.clone());

        if carries_body(&parts.method) {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        } else {
            headers.remove(header::CONTENT_LENGTH);
        }

        tracing::debug!(
            method = %parts.method,
            kind = %target.kind,
            upstream = %target.url,
            "Forwarding request"
        );

        let upstream = builder.headers(headers).send().await?;

        let status = upstream.status();
        let reason = upstream.extensions().get::<ReasonPhrase>().cloned();
        let headers = outbound_response_headers(upstream.headers());

        tracing::debug!(status = status.as_u16(), final_url = %upstream.url(), "Upstream responded");

        let mut response = Response::builder()
            .status(status)
            .body(Body::from_stream(upstream.bytes_stream()))?;
        *response.headers_mut() = headers;
        if let Some(reason) = reason {
            response.extensions_mut().insert(reason);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hop_by_hop_case_insensitive() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("Keep-Alive"));
        assert!(is_hop_by_hop("te"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("host"));
        assert!(!is_hop_by_hop("tea"));
    }

    fn sample_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("edge.example.com"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            HeaderName::from_static("keep-alive"),
            HeaderValue::from_static("timeout=5"),
        );
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.append(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        headers.append(header::ACCEPT_LANGUAGE, HeaderValue::from_static("de"));
        headers
    }

    #[test]
    fn test_request_leg_strips_host_and_hop_by_hop() {
        let out = upstream_request_headers(&sample_headers());
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get(header::UPGRADE).is_none());
        assert_eq!(out.get(header::ACCEPT).unwrap(), "application/json");
        assert_eq!(out.get_all(header::ACCEPT_LANGUAGE).iter().count(), 2);
    }

    #[test]
    fn test_response_leg_keeps_host() {
        let out = outbound_response_headers(&sample_headers());
        assert_eq!(out.get(header::HOST).unwrap(), "edge.example.com");
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::UPGRADE).is_none());
    }

    #[test]
    fn test_carries_body() {
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::HEAD));
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::DELETE));
        assert!(carries_body(&Method::PATCH));
    }

    #[test]
    fn test_relay_builds_with_and_without_connect_timeout() {
        let mut config = UpstreamConfig::default();
        assert!(config.connect_timeout().is_none());
        assert!(Relay::new(&config).is_ok());

        config.connect_timeout_secs = Some(3);
        assert!(Relay::new(&config).is_ok());
    }
}
