//! The remote dependency the gateway protects

use crate::error::{GatewayError, UpstreamError};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Source of the JSON document served by the gateway
pub trait Upstream: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Value, UpstreamError>> + Send;
}

/// Upstream reached over HTTP with a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstream {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Upstream for HttpUpstream {
    async fn fetch(&self) -> Result<Value, UpstreamError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn upstream_answering(response: ResponseTemplate) -> (MockServer, HttpUpstream) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/planets/1/"))
            .respond_with(response)
            .mount(&server)
            .await;

        let url = format!("{}/planets/1/", server.uri());
        let upstream = HttpUpstream::new(url, Duration::from_millis(500)).unwrap();
        (server, upstream)
    }

    #[tokio::test]
    async fn test_fetch_returns_json_body() {
        let (_server, upstream) =
            upstream_answering(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Tatooine",
                "climate": "arid",
            })))
            .await;

        let body = upstream.fetch().await.unwrap();

        assert_eq!(body["name"], "Tatooine");
        assert_eq!(body["climate"], "arid");
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let (_server, upstream) = upstream_answering(ResponseTemplate::new(502)).await;

        let err = upstream.fetch().await.unwrap_err();

        assert!(matches!(err, UpstreamError::Status { status: 502 }));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_not_found_is_a_client_error() {
        let (_server, upstream) = upstream_answering(ResponseTemplate::new(404)).await;

        let err = upstream.fetch().await.unwrap_err();

        assert!(matches!(err, UpstreamError::Status { status: 404 }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_decode_error() {
        let (_server, upstream) =
            upstream_answering(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
                .await;

        let err = upstream.fetch().await.unwrap_err();

        assert!(matches!(err, UpstreamError::Decode(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let (_server, upstream) = upstream_answering(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "name": "Hoth" }))
                .set_delay(Duration::from_secs(5)),
        )
        .await;

        match upstream.fetch().await {
            Err(UpstreamError::Transport(e)) => assert!(e.is_timeout(), "got {:?}", e),
            other => panic!("Expected transport timeout, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HttpUpstream::new(format!("http://{}/", addr), Duration::from_secs(1))
            .unwrap();

        let err = upstream.fetch().await.unwrap_err();

        assert!(matches!(err, UpstreamError::Transport(_)), "got {:?}", err);
    }
}
