//! Bounds how long a single request is allowed to take before the connection
//! gets back an `RC_ERROR` instead of hanging forever on a stuck storage
//! call.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use whiplru_core::{AssetId, ClientRequest, ServerResponse};

use crate::error::WhipLruError;

/// Wraps an inner [`Service`] with a fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            duration: self.duration,
        }
    }
}

/// The service [`TimeoutLayer`] produces.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    duration: Duration,
}

impl<S> Service<ClientRequest> for TimeoutService<S>
where
    S: Service<ClientRequest, Response = ServerResponse, Error = WhipLruError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ServerResponse;
    type Error = WhipLruError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ClientRequest) -> Self::Future {
        let duration = self.duration;
        let id = req.id;
        let mut inner = self.inner.clone();
        Box::pin(async move {
            match tokio::time::timeout(duration, inner.call(req)).await {
                Ok(result) => result,
                Err(_) => Ok(timeout_response(id)),
            }
        })
    }
}

fn timeout_response(id: AssetId) -> ServerResponse {
    ServerResponse::error(id, WhipLruError::Upstream("request timed out".to_string()).diagnostic())
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::service_fn;

    use super::*;

    #[tokio::test]
    async fn fast_call_passes_through() {
        let inner = service_fn(|req: ClientRequest| async move {
            Ok::<_, WhipLruError>(ServerResponse::ok(req.id))
        });
        let mut svc = TimeoutLayer::new(Duration::from_millis(50)).layer(inner);
        let req = ClientRequest {
            request_type: whiplru_core::RequestType::Test,
            id: AssetId::new_random(),
            payload: vec![],
        };
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.code, whiplru_core::ResponseCode::Ok);
        let _: Option<Infallible> = None;
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let inner = service_fn(|req: ClientRequest| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, WhipLruError>(ServerResponse::ok(req.id))
        });
        let mut svc = TimeoutLayer::new(Duration::from_millis(10)).layer(inner);
        let req = ClientRequest {
            request_type: whiplru_core::RequestType::Test,
            id: AssetId::new_random(),
            payload: vec![],
        };
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.code, whiplru_core::ResponseCode::Error);
    }
}
