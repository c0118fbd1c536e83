use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

pub type Request = axum::http::Request<Body>;

/// A type-erased error for middlewares and endpoints
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// Standard return type for middlewares and endpoints
pub type MiddlewareResult = Result<Response, MiddlewareError>;

/// One link of a [`MiddlewareChain`].
///
/// A middleware either answers the request itself or hands it on with
/// [`Next::run`]. `Next` is consumed by value, so the rest of the chain runs
/// at most once per request.
///
/// # Example
/// ```rust,ignore
/// struct Deny;
///
/// #[async_trait]
/// impl Middleware for Deny {
///     async fn handle(&self, request: Request, next: Next) -> MiddlewareResult {
///         if request.headers().contains_key("x-blocked") {
///             return Ok(StatusCode::FORBIDDEN.into_response());
///         }
///         next.run(request).await
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, request: Request, next: Next) -> MiddlewareResult;
}

/// The handler at the end of the chain.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    async fn call(&self, request: Request) -> MiddlewareResult;
}

#[async_trait]
impl<F, Fut> Endpoint for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    async fn call(&self, request: Request) -> MiddlewareResult {
        (self)(request).await
    }
}

struct NotFound;

#[async_trait]
impl Endpoint for NotFound {
    async fn call(&self, _request: Request) -> MiddlewareResult {
        Ok(error_response(StatusCode::NOT_FOUND, "Not Found"))
    }
}

/// Ordered middlewares around one endpoint. Cheap to clone.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Default for MiddlewareChain {
    /// No middlewares, and every request answered with 404.
    fn default() -> Self {
        Self::new(NotFound)
    }
}

impl MiddlewareChain {
    pub fn new(endpoint: impl Endpoint) -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
            endpoint: Arc::new(endpoint),
        }
    }

    /// Append a middleware. The first one added runs outermost.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        Arc::make_mut(&mut self.middlewares).push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the whole chain. Errors become a JSON 500.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let next = Next {
            chain: self.clone(),
            index: 0,
        };
        match next.run(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(method = %method, uri = %uri, error = %e, "Request failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

/// The rest of the chain after the current middleware.
pub struct Next {
    chain: MiddlewareChain,
    index: usize,
}

impl Next {
    /// Hand the request to the next middleware, or to the endpoint.
    pub async fn run(self, request: Request) -> MiddlewareResult {
        let Self { chain, index } = self;
        match chain.middlewares.get(index).cloned() {
            Some(middleware) => {
                let next = Next {
                    chain,
                    index: index + 1,
                };
                middleware.handle(request, next).await
            }
            None => chain.endpoint.call(request).await,
        }
    }
}

/// JSON error body shared by every adapter.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "statusCode": status.as_u16(),
            "message": message.into(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}
