//! Caps the number of requests being processed concurrently; once the cap
//! is hit, further requests get an immediate `RC_ERROR` rather than queuing
//! behind an already-overloaded storage core.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use whiplru_core::{AssetId, ClientRequest, ServerResponse};

use crate::error::WhipLruError;

/// Error reported when the concurrency cap is exceeded.
#[derive(Debug, thiserror::Error)]
pub enum LoadShedError {
    #[error("server is at capacity")]
    Overloaded,
}

/// Wraps an inner [`Service`] with a fixed concurrency cap.
#[derive(Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

/// The service [`LoadShedLayer`] produces.
#[derive(Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<ClientRequest> for LoadShedService<S>
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
        let semaphore = Arc::clone(&self.semaphore);
        let id = req.id;
        let mut inner = self.inner.clone();
        Box::pin(async move {
            match semaphore.try_acquire() {
                Ok(permit) => {
                    let result = inner.call(req).await;
                    drop(permit);
                    result
                }
                Err(_) => Ok(overloaded_response(id)),
            }
        })
    }
}

fn overloaded_response(id: AssetId) -> ServerResponse {
    ServerResponse::error(id, "server is at capacity")
}

#[cfg(test)]
mod tests {
    use tower::service_fn;

    use super::*;

    #[tokio::test]
    async fn request_within_capacity_passes_through() {
        let inner = service_fn(|req: ClientRequest| async move {
            Ok::<_, WhipLruError>(ServerResponse::ok(req.id))
        });
        let mut svc = LoadShedLayer::new(4).layer(inner);
        let req = ClientRequest {
            request_type: whiplru_core::RequestType::Test,
            id: AssetId::new_random(),
            payload: vec![],
        };
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.code, whiplru_core::ResponseCode::Ok);
    }

    #[tokio::test]
    async fn request_over_capacity_is_shed() {
        let semaphore = Arc::new(Semaphore::new(1));
        let _permit = semaphore.clone().try_acquire_owned().unwrap();
        let layer = LoadShedLayer { semaphore };
        let inner = service_fn(|req: ClientRequest| async move {
            Ok::<_, WhipLruError>(ServerResponse::ok(req.id))
        });
        let mut svc = layer.layer(inner);
        let req = ClientRequest {
            request_type: whiplru_core::RequestType::Test,
            id: AssetId::new_random(),
            payload: vec![],
        };
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.code, whiplru_core::ResponseCode::Error);
    }
}
