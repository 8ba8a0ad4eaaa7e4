//! HTTP Transport Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, TransportConfig},
};
use futures_util::StreamExt;
use reqwest::{redirect, Client};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Reqwest-based streaming transport
///
/// Provides:
/// - Connection pooling via reqwest
/// - Connect/read timeouts and redirect policy from [`TransportConfig`]
/// - A fixed User-Agent
/// - Response bodies streamed chunk by chunk
///
/// No retries happen here; the core's decorator chain owns that policy.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Build a client from transport settings.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let redirect_policy = if config.follow_redirects {
            redirect::Policy::limited(config.max_redirects)
        } else {
            redirect::Policy::none()
        };

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .redirect(redirect_policy)
            .pool_max_idle_per_host(10)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }
}

/// Map reqwest failures onto the bridge error kinds the core classifies.
fn map_reqwest_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::Timeout(e.to_string())
    } else if e.is_connect() {
        BridgeError::ConnectionFailed(e.to_string())
    } else {
        BridgeError::OperationFailed(e.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn open_connection(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, "Opening HTTP connection");

        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "HTTP connection failed");
                map_reqwest_error(e)
            })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error))
            .boxed();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = ReqwestHttpClient::from_config(&TransportConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Head),
            reqwest::Method::HEAD
        );
    }
}
