//! Maps each [`RequestType`] onto a [`StorageManager`] call and builds the
//! matching [`ServerResponse`]. This is the single `tower::Service` every
//! authenticated connection's request loop calls into, wrapped by the
//! timeout and load-shed middleware.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::warn;
use whiplru_core::{ClientRequest, RequestType, ServerResponse};

use crate::error::WhipLruError;
use crate::storage::StorageManager;

/// Dispatches a [`ClientRequest`] to the [`StorageManager`] operation its
/// [`RequestType`] names.
#[derive(Clone)]
pub struct RequestHandler {
    storage: Arc<StorageManager>,
}

impl RequestHandler {
    #[must_use]
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }
}

impl Service<ClientRequest> for RequestHandler {
    type Response = ServerResponse;
    type Error = WhipLruError;
    type Future = Pin<Box<dyn Future<Output = Result<ServerResponse, WhipLruError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ClientRequest) -> Self::Future {
        let storage = Arc::clone(&self.storage);
        Box::pin(async move { handle(&storage, req).await })
    }
}

async fn handle(storage: &StorageManager, req: ClientRequest) -> Result<ServerResponse, WhipLruError> {
    let id = req.id;
    let result = match req.request_type {
        RequestType::Get => storage.get(id, true).await.map(|bytes| ServerResponse::found(id, bytes)),
        RequestType::GetDontCache => storage
            .get(id, false)
            .await
            .map(|bytes| ServerResponse::found(id, bytes)),
        RequestType::Put => storage.store(id, req.payload).await.map(|()| ServerResponse::ok(id)),
        RequestType::Purge => storage.purge(id).map(|()| ServerResponse::ok(id)),
        RequestType::PurgeLocals => storage
            .purge_all(&[crate::storage::PurgeFilter::local_only()])
            .map(|()| ServerResponse::ok(whiplru_core::AssetId::ZERO)),
        RequestType::Test => storage.check(id).map(|present| {
            if present {
                ServerResponse::found(id, Vec::new())
            } else {
                ServerResponse::not_found(id)
            }
        }),
        RequestType::StatusGet => Ok(ServerResponse::ok_with_text(whiplru_core::AssetId::ZERO, "ok".to_string())),
        RequestType::StoredIdsGet => {
            let full_hex = id.to_compact_hex();
            let prefix = full_hex.trim_end_matches('0');
            let ids = storage.locally_known_ids(prefix);
            let text = ids
                .iter()
                .map(whiplru_core::AssetId::to_compact_hex)
                .collect::<Vec<_>>()
                .join("\n");
            Ok(ServerResponse::found_with_text(whiplru_core::AssetId::ZERO, text))
        }
    };

    match result {
        Ok(response) => Ok(response),
        Err(WhipLruError::AssetNotFound) => Ok(ServerResponse::not_found(id)),
        Err(err) => {
            warn!(%id, %err, "request failed");
            Ok(ServerResponse::error(id, err.diagnostic()))
        }
    }
}
