use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::SignerError;
use crate::config::SignerConfig;

const SIGN_PATH: &str = "/crypto/sign";

/// Anything that can turn a message into a signature.
///
/// Every error is treated as retryable by the dispatcher.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, message: &str) -> Result<String, SignerError>;
}

/// Calls the remote signing endpoint over HTTP.
pub struct HttpSigner {
    api_key: String,
    client: Client,
    base_url: String,
}

impl HttpSigner {
    pub fn new(config: &SignerConfig) -> Result<Self, SignerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Signer for HttpSigner {
    async fn sign(&self, message: &str) -> Result<String, SignerError> {
        let response = self
            .client
            .get(format!("{}{SIGN_PATH}", self.base_url))
            .query(&[("message", message)])
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignerError::Status {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| SignerError::Body(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signer_for(server: &MockServer) -> HttpSigner {
        let config = SignerConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            ..Default::default()
        };
        HttpSigner::new(&config).unwrap()
    }

    #[tokio::test]
    async fn returns_body_as_signature() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto/sign"))
            .and(query_param("message", "hello world"))
            .and(header("Authorization", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string("c2lnbmF0dXJl"))
            .expect(1)
            .mount(&server)
            .await;

        let signature = signer_for(&server).sign("hello world").await.unwrap();
        assert_eq!(signature, "c2lnbmF0dXJl");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crypto/sign"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = signer_for(&server).sign("hello").await.unwrap_err();
        assert!(matches!(err, SignerError::Status { status: 502 }));
    }

    #[tokio::test]
    async fn rate_limit_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = signer_for(&server).sign("hello").await.unwrap_err();
        assert!(matches!(err, SignerError::Status { status: 429 }));
    }

    #[tokio::test]
    async fn unreachable_signer_is_a_transport_error() {
        let config = SignerConfig {
            base_url: "http://127.0.0.1:1".into(),
            ..Default::default()
        };
        let err = HttpSigner::new(&config)
            .unwrap()
            .sign("hello")
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Transport(_)));
    }
}
