use super::{Middleware, MiddlewareResult, Next, Request};
use async_trait::async_trait;
use axum::http::HeaderValue;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensures every request and response carries an `x-request-id`.
///
/// A caller-supplied id is kept; otherwise a v4 uuid is generated.
#[derive(Clone, Default)]
pub struct RequestId;

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, mut request: Request, next: Next) -> MiddlewareResult {
        let id = match request.headers().get(REQUEST_ID_HEADER) {
            Some(value) => value.clone(),
            None => {
                let generated = HeaderValue::from_str(&Uuid::new_v4().to_string())?;
                request
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, generated.clone());
                generated
            }
        };

        let mut response = next.run(request).await?;
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
        Ok(response)
    }
}

/// Logs every request with its status and latency.
#[derive(Clone, Default)]
pub struct RequestLogging;

#[async_trait]
impl Middleware for RequestLogging {
    async fn handle(&self, request: Request, next: Next) -> MiddlewareResult {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let span = tracing::info_span!("request", method = %method, uri = %uri, request_id = %request_id);
        let start = Instant::now();

        async move {
            tracing::debug!("Request received");
            match next.run(request).await {
                Ok(response) => {
                    tracing::info!(
                        status = response.status().as_u16(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Request completed"
                    );
                    Ok(response)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Request failed"
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}
