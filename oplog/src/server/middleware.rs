//! HTTP middleware for Axum.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};

use crate::stats::{HttpLabelsWithStatus, HttpMethod, Stats};

/// Layer that wraps services with request counting.
#[derive(Clone)]
pub struct MetricsLayer {
    stats: Arc<Stats>,
}

impl MetricsLayer {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self { stats }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            stats: self.stats.clone(),
        }
    }
}

/// Service that counts HTTP requests per method, endpoint, and status.
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    stats: Arc<Stats>,
}

impl<S, ResBody> Service<Request<Body>> for MetricsService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ResBody: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let method = HttpMethod::from(request.method());
        let endpoint = request.uri().path().to_string();
        let stats = self.stats.clone();

        let future = self.inner.call(request);

        Box::pin(async move {
            let response = future.await?;
            let status = response.status().as_u16();

            stats
                .http_requests_total
                .get_or_create(&HttpLabelsWithStatus {
                    method,
                    endpoint,
                    status,
                })
                .inc();

            Ok(response)
        })
    }
}

/// Layer that logs requests and responses at debug level.
#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S, ResBody> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ResBody: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let method = request.method().clone();
        let uri = request.uri().clone();

        tracing::debug!(method = %method, uri = %uri, "http request received");

        let start = Instant::now();
        let future = self.inner.call(request);

        Box::pin(async move {
            let response = future.await?;
            tracing::debug!(
                method = %method,
                uri = %uri,
                status = %response.status().as_u16(),
                duration_ms = %start.elapsed().as_millis(),
                "http response headers sent"
            );
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use tower::service_fn;

    #[tokio::test]
    async fn should_count_requests_by_endpoint_and_status() {
        // given
        let stats = Arc::new(Stats::new(10));
        let test_service = service_fn(|_req: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(
                Response::builder().status(200).body(Body::empty()).unwrap(),
            )
        });
        let mut service = MetricsLayer::new(stats.clone()).layer(test_service);

        // when
        let request = Request::builder()
            .method(Method::GET)
            .uri("/status")
            .body(Body::empty())
            .unwrap();
        let response = service.call(request).await.unwrap();

        // then
        assert_eq!(response.status().as_u16(), 200);
        let count = stats
            .http_requests_total
            .get_or_create(&HttpLabelsWithStatus {
                method: HttpMethod::Get,
                endpoint: "/status".to_string(),
                status: 200,
            })
            .get();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn should_pass_requests_through_tracing_layer() {
        // given
        let test_service = service_fn(|_req: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(
                Response::builder().status(200).body(Body::empty()).unwrap(),
            )
        });
        let mut service = TracingLayer::new().layer(test_service);

        // when
        let request = Request::builder()
            .method(Method::GET)
            .uri("/ops")
            .body(Body::empty())
            .unwrap();
        let response = service.call(request).await.unwrap();

        // then
        assert_eq!(response.status().as_u16(), 200);
    }
}
