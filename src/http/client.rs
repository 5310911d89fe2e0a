use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http::request::{BodyPayload, InterpolatedRequest};
use crate::http::response::Response;
use crate::http::types::Method;
use crate::{Result, RuquestError};

/// 流水线对 HTTP 客户端的最小契约
///
/// 传输层失败（未收到响应）必须与 HTTP 状态错误区分开：
/// 4xx/5xx 正常返回 Response，传输失败返回 TransportError，
/// 取消信号返回 Cancelled。
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(
        &self,
        request: InterpolatedRequest,
        signal: Option<CancellationToken>,
    ) -> Result<Response>;
}

#[derive(Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            inner: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| RuquestError::Other(format!("Failed to build HTTP client: {}", e)))?,
        })
    }

    fn build(&self, request: InterpolatedRequest) -> Result<reqwest::RequestBuilder> {
        let url = reqwest::Url::parse(&request.url)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        };
        let mut req = self.inner.request(method, url).headers(request.headers);

        match request.body {
            Some(BodyPayload::Text(text)) => req = req.body(text),
            Some(BodyPayload::Form(fields)) => req = req.form(&fields),
            Some(BodyPayload::Multipart(fields)) => {
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                req = req.multipart(form);
            }
            None => {}
        }

        Ok(req)
    }

    async fn send(&self, request: InterpolatedRequest) -> Result<Response> {
        let req = self.build(request)?;

        let start = std::time::Instant::now();
        let response = req
            .send()
            .await
            .map_err(|e| RuquestError::TransportError(e.to_string()))?;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .map(|s| s.to_string());
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| RuquestError::TransportError(e.to_string()))?;

        debug!(status, elapsed_ms = duration.as_millis() as u64, "HTTP call finished");
        Response::new(status, status_text, headers, body, duration)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(
        &self,
        request: InterpolatedRequest,
        signal: Option<CancellationToken>,
    ) -> Result<Response> {
        match signal {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(RuquestError::Cancelled),
                    result = self.send(request) => result,
                }
            }
            None => self.send(request).await,
        }
    }
}
