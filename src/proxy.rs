//! Downstream HTTP forwarding

use crate::{error::GatewayError, types::ServiceInstance};
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode},
};
use reqwest::Client;
use tracing::debug;

/// Forwarding client used by the proxy surface. The client carries no
/// overall timeout of its own; the registry races every forwarded call
/// against the configured request budget.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
}

impl ProxyClient {
    /// Create the forwarding client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Forward a request to the given instance. A 2xx answer becomes the
    /// response; any other status is surfaced as a downstream error
    /// carrying the status and body for passthrough.
    pub async fn forward(
        &self,
        instance: &ServiceInstance,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>, GatewayError> {
        let url = format!("{}{}", instance.base_url(), path_and_query);
        debug!("Forwarding {} {}", method, url);

        let mut forwarded = HeaderMap::new();
        for (name, value) in headers {
            if should_skip_header(name) {
                continue;
            }
            forwarded.insert(name.clone(), value.clone());
        }
        forwarded.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        forwarded.insert("x-forwarded-host", HeaderValue::from_static("meridian-gateway"));

        let mut request = self.client.request(method, &url).headers(forwarded);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let body_bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(GatewayError::Downstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body_bytes).into_owned(),
            });
        }

        let mut reply = Response::builder()
            .status(status)
            .body(Body::from(body_bytes))
            .map_err(|err| GatewayError::Internal(format!("failed to build response: {}", err)))?;
        for (name, value) in &response_headers {
            if should_skip_header(name) {
                continue;
            }
            reply.headers_mut().insert(name.clone(), value.clone());
        }
        reply
            .headers_mut()
            .insert("x-gateway-proxy", HeaderValue::from_static("meridian-gateway"));

        Ok(reply)
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Hop-by-hop headers are not forwarded in either direction
fn should_skip_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host" | "connection" | "content-length" | "transfer-encoding"
    )
}

/// Build a JSON error response in the gateway's uniform shape
pub fn error_body(status: StatusCode, message: &str, status_tag: &str) -> Response<Body> {
    let body = serde_json::json!({
        "message": message,
        "status": status_tag,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    json_response(status, body)
}

/// Build a response from a status and a JSON value
pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal Server Error"))
                .unwrap()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers_are_skipped() {
        assert!(should_skip_header(&HeaderName::from_static("host")));
        assert!(should_skip_header(&HeaderName::from_static("content-length")));
        assert!(!should_skip_header(&HeaderName::from_static("authorization")));
        assert!(!should_skip_header(&HeaderName::from_static("content-type")));
    }

    #[test]
    fn test_error_body_shape() {
        let response = error_body(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "CIRCUIT_OPEN");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
