// src/fetch/http.rs
use async_trait::async_trait;
use reqwest::{Client, Method};

use super::{FetchResponse, RequestOptions, Transport};
use crate::error::FetchError;

/// `Transport` over a shared `reqwest::Client`.
///
/// Deadlines are owned by `ResilientFetcher`, so the client is built without
/// its own request timeout.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FetchResponse, FetchError> {
        let method = Method::from_bytes(options.method.as_bytes())
            .map_err(|e| FetchError::Transport(format!("bad method {}: {e}", options.method)))?;

        let mut req = self.client.request(method, url);
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let rsp = req.send().await.map_err(map_reqwest_error)?;
        let status = rsp.status().as_u16();
        let body = rsp.bytes().await.map_err(map_reqwest_error)?;

        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        // reqwest does not report the configured deadline
        return FetchError::Timeout { after_ms: 0 };
    }
    FetchError::Transport(e.to_string())
}
