use std::sync::Arc;

use async_trait::async_trait;
use roomsync_core::TransportError;
use serde_json::Value;

/// RPC method names understood by the backend.
pub mod method {
    pub const GET_ROOM_STATE: &str = "get_room_state";
    pub const PAGINATE: &str = "paginate";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const DOWNLOAD_MEDIA: &str = "download_media";
}

/// Request/response channel to the backend process.
///
/// Correlation, framing and reconnection live behind this trait; the store only
/// needs one call that either yields the response body or fails.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T> RpcTransport for Arc<T>
where
    T: RpcTransport + ?Sized,
{
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        (**self).request(method, params).await
    }
}
