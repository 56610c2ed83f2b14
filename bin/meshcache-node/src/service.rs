//! Owner-side gRPC service implementation

use meshcache_common::CacheError;
use meshcache_core::GroupRegistry;
use meshcache_proto::peer::group_cache_server::GroupCache;
use meshcache_proto::peer::{DeleteRequest, DeleteResponse, Request, Response as CacheResponse};
use std::sync::Arc;
use tonic::{Request as TonicRequest, Response, Status};
use tracing::debug;

/// gRPC surface over the injected group registry.
pub struct CacheService {
    registry: Arc<GroupRegistry>,
}

impl CacheService {
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl GroupCache for CacheService {
    async fn get(
        &self,
        request: TonicRequest<Request>,
    ) -> Result<Response<CacheResponse>, Status> {
        let req = request.into_inner();
        debug!(group = %req.group, key = %req.key, "peer get");

        let group = self
            .registry
            .get(&req.group)
            .ok_or_else(|| CacheError::NoSuchGroup.to_status())?;

        let value = group
            .get(&req.key)
            .await
            .map_err(|err| err.to_status())?;

        Ok(Response::new(CacheResponse {
            value: value.to_vec(),
        }))
    }

    async fn delete(
        &self,
        request: TonicRequest<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let req = request.into_inner();
        debug!(group = %req.group, key = %req.key, "peer delete");

        let group = self
            .registry
            .get(&req.group)
            .ok_or_else(|| CacheError::NoSuchGroup.to_status())?;

        group.delete(&req.key).map_err(|err| err.to_status())?;

        Ok(Response::new(DeleteResponse { success: true }))
    }
}
