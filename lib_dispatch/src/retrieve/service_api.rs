//! HTTP implementation of [`ServiceApi`] against the processing service:
//! `/health`, `/warmup`, `POST /translate`, `GET /translate/{id}`.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;

use crate::core::transport::{ProbeMethod, ResolvedAsset, ServiceApi};
use crate::error::{DispatchError, DispatchResult};
use crate::protocol::{PollResponse, PollStatus, SubmitResponse};
use crate::retrieve::ky_http::{ApiClient, Delivery};
use crate::utils::endpoint;

const READ_RETRIES: u32 = 3;

pub struct HttpServiceApi {
    client: ApiClient,
}

impl HttpServiceApi {
    pub fn new(request_timeout: Duration) -> DispatchResult<Self> {
        Ok(Self {
            client: ApiClient::new(request_timeout, READ_RETRIES)?,
        })
    }
}

/// `<base>/translate/<job_id>` with the id escaped as a single path segment.
fn job_url(base: &str, job_id: &str) -> DispatchResult<String> {
    let mut url = url::Url::parse(&endpoint(base, "translate")).map_err(|e| DispatchError::Protocol(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| DispatchError::Protocol(format!("{} cannot carry a path", base)))?
        .push(job_id);
    Ok(url.to_string())
}

impl ServiceApi for HttpServiceApi {
    fn probe_health<'a>(&'a self, base: &'a str, method: ProbeMethod, timeout: Duration) -> BoxFuture<'a, bool> {
        async move {
            let method = match method {
                ProbeMethod::Get => Method::GET,
                ProbeMethod::Head => Method::HEAD,
            };
            self.client.probe(method, &endpoint(base, "health"), timeout).await
        }
        .boxed()
    }

    fn warm_up<'a>(&'a self, base: &'a str) -> BoxFuture<'a, DispatchResult<()>> {
        async move {
            let resp = self
                .client
                .request::<Value, ()>(Delivery::Once, Method::GET, &endpoint(base, "warmup"), None)
                .await?;
            if resp.success {
                Ok(())
            } else {
                Err(DispatchError::Transport(format!("warmup: HTTP {}", resp.status)))
            }
        }
        .boxed()
    }

    fn submit_job<'a>(&'a self, base: &'a str, payload: &'a Value) -> BoxFuture<'a, DispatchResult<String>> {
        async move {
            let resp = self
                .client
                .request::<SubmitResponse, Value>(Delivery::Once, Method::POST, &endpoint(base, "translate"), Some(payload))
                .await?;
            if !resp.success {
                return Err(DispatchError::Transport(format!("REST submit failed: HTTP {}", resp.status)));
            }
            resp.data
                .and_then(|d| d.id)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| DispatchError::Protocol("REST submit failed: no id".into()))
        }
        .boxed()
    }

    fn poll_job<'a>(&'a self, base: &'a str, job_id: &'a str) -> BoxFuture<'a, DispatchResult<PollStatus>> {
        async move {
            let url = job_url(base, job_id)?;
            let resp = self
                .client
                .request::<PollResponse, ()>(Delivery::Retrying, Method::GET, &url, None)
                .await?;
            match resp.data {
                Some(body) if resp.success => Ok(body.into()),
                _ => Err(DispatchError::Transport(format!("REST poll failed: HTTP {}", resp.status))),
            }
        }
        .boxed()
    }

    fn fetch_asset<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DispatchResult<ResolvedAsset>> {
        async move {
            let (headers, bytes) = self.client.get_bytes(url).await?;
            let mime_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Ok(ResolvedAsset {
                mime_type,
                data_base64: general_purpose::STANDARD.encode(bytes),
            })
        }
        .boxed()
    }
}
