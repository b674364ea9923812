//! Fetchers handed to snippets.

use std::time::Duration;

use tracing::debug;

use crate::script::{FetchError, FetchRequest, FetchResponse, Fetcher};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("snipbox/", env!("CARGO_PKG_VERSION"));

/// Performs real HTTP requests with a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Build a client with connect/read timeouts and a bounded redirect policy.
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::Transport(format!("invalid method '{}'", request.method)))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "http.response");

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            url,
            headers,
            body,
        })
    }
}

/// Rejects every request; installed by `--offline` and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!(url = %request.url, "offline.reject");
        Err(FetchError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_fetcher_rejects() {
        let err = OfflineFetcher
            .fetch(&FetchRequest::get("https://example.test"))
            .unwrap_err();
        assert_eq!(err, FetchError::Disabled);
    }

    #[test]
    fn test_http_fetcher_rejects_bad_method() {
        let fetcher = HttpFetcher::new().unwrap();
        let mut request = FetchRequest::get("http://127.0.0.1:9/");
        request.method = "NOT A METHOD".to_string();
        let err = fetcher.fetch(&request).unwrap_err();
        assert!(matches!(err, FetchError::Transport(msg) if msg.contains("invalid method")));
    }
}
