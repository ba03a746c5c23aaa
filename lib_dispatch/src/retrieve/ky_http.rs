//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`. It holds two
//! middleware stacks over one connection pool: one with exponential backoff
//! retries for idempotent reads, one that sends exactly once (job submission,
//! health probes under their own deadline).

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

/// Whether a request may be retried by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Transient failures are retried with exponential backoff.
    Retrying,
    /// Sent once; the caller owns the retry policy.
    Once,
}

pub struct ApiClient {
    retrying: ClientWithMiddleware,
    once: ClientWithMiddleware,
}

impl ApiClient {
    /// Creates a client whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration, max_retries: u32) -> DispatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let retrying = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let once = ClientBuilder::new(client).build();

        Ok(Self { retrying, once })
    }

    fn client(&self, delivery: Delivery) -> &ClientWithMiddleware {
        match delivery {
            Delivery::Retrying => &self.retrying,
            Delivery::Once => &self.once,
        }
    }

    /// Sends a request with an optional JSON body and decodes a JSON response.
    ///
    /// Non-2xx statuses are not errors here; they come back with `success == false`.
    pub async fn request<T, B>(
        &self,
        delivery: Delivery,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> DispatchResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut req = self.client(delivery).request(method, url);

        if let Some(b) = body {
            let json_body = serde_json::to_string(b).map_err(|e| DispatchError::Protocol(e.to_string()))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            let data = response
                .json::<T>()
                .await
                .map_err(|e| DispatchError::Protocol(e.to_string()))?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }

    /// Sends one bodiless request under `timeout` and reports whether it returned 2xx.
    pub async fn probe(&self, method: Method, url: &str, timeout: Duration) -> bool {
        match self.once.request(method, url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("[http] probe {} failed: {}", url, e);
                false
            }
        }
    }

    /// Downloads raw bytes, returning the response headers alongside.
    pub async fn get_bytes(&self, url: &str) -> DispatchResult<(HeaderMap, Vec<u8>)> {
        let response = self
            .retrying
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Transport(format!("HTTP {}", status.as_u16())));
        }
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok((headers, bytes.to_vec()))
    }
}
