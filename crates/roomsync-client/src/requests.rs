//! Outbound requests and the integration of their responses into the store.
//!
//! State loads and history pagination are limited to one in-flight request per
//! room. A second state load while one runs is skipped; a second pagination is
//! rejected with [`StoreError::AlreadyInProgress`] so the caller can retry.

use std::{sync::Arc, time::Instant};

use roomsync_core::{
    GlobalStore, LocalEcho, MediaLocator, MessageType, PaginationOutcome, PaginationPage,
    RequestKind, RoomHandle, RoomStateSnapshot, StoreError, TransportError, media_url,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::ClientConfig,
    transport::{RpcTransport, method},
};

/// How a state load request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A request was issued and its response applied.
    Fetched,
    /// Cached state already covered the requested scope.
    Cached,
    /// Another load for this room was in flight; nothing was sent.
    Coalesced,
}

/// Parameters for the `send_message` request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SendMessageParams {
    pub room_id: String,
    pub text: String,
    pub message_type: MessageType,
    pub reply_to: Option<String>,
    /// Local correlation ID echoed back by `send_complete`.
    pub transaction_id: String,
}

impl SendMessageParams {
    /// Plain text message with a fresh transaction ID.
    pub fn text(room_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            text: text.into(),
            message_type: MessageType::Text,
            reply_to: None,
            transaction_id: new_transaction_id(),
        }
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn in_reply_to(mut self, event_id: impl Into<String>) -> Self {
        self.reply_to = Some(event_id.into());
        self
    }
}

/// Media bytes returned by `download_media`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDownload {
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Issues backend requests and folds their responses into the store.
pub struct RequestFacade<T> {
    transport: T,
    store: Arc<GlobalStore>,
    config: ClientConfig,
}

impl<T> RequestFacade<T>
where
    T: RpcTransport,
{
    pub fn new(transport: T, store: Arc<GlobalStore>, config: ClientConfig) -> Self {
        Self {
            transport,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<GlobalStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Load room metadata and optionally the full member list.
    ///
    /// Nothing is sent when cached state already covers the requested scope
    /// and `refetch` is false, or when a load for this room is in flight.
    pub async fn load_room_state(
        &self,
        room_id: &str,
        include_members: bool,
        refetch: bool,
    ) -> Result<LoadOutcome, StoreError> {
        let room = self.room(room_id)?;
        let (satisfied, members_only, fetch_members) = {
            let state = room.read();
            let satisfied = state.state_loaded()
                && (!include_members || state.has_full_member_list());
            let backend_has_members = state.meta().is_some_and(|meta| meta.has_member_list);
            (
                satisfied,
                state.state_loaded() && include_members && !refetch,
                include_members && !backend_has_members,
            )
        };
        if satisfied && !refetch {
            return Ok(LoadOutcome::Cached);
        }

        let Some(_guard) = room.try_begin(RequestKind::StateLoad) else {
            debug!(%room_id, "state load already in flight; skipping");
            return Ok(LoadOutcome::Coalesced);
        };

        let snapshot: RoomStateSnapshot = self
            .call(
                method::GET_ROOM_STATE,
                json!({
                    "room_id": room_id,
                    "include_members": include_members,
                    "fetch_members": fetch_members,
                    "refetch": refetch,
                }),
            )
            .await?;
        room.mutate(|state| state.apply_full_state(snapshot, members_only));
        Ok(LoadOutcome::Fetched)
    }

    /// Fetch the next page of older history.
    ///
    /// Fails with [`StoreError::AlreadyInProgress`] while another pagination
    /// for the room runs. Once history is exhausted no request is sent.
    pub async fn load_more_history(&self, room_id: &str) -> Result<PaginationOutcome, StoreError> {
        let room = self.room(room_id)?;
        let _guard =
            room.try_begin(RequestKind::Pagination)
                .ok_or_else(|| StoreError::AlreadyInProgress {
                    operation: RequestKind::Pagination.label(),
                    room_id: room_id.to_owned(),
                })?;

        let params = {
            let state = room.read();
            if !state.has_more_history() {
                return Ok(PaginationOutcome {
                    new_rows: 0,
                    has_more: false,
                });
            }
            state.pagination_params()
        };

        let page: PaginationPage = self
            .call(
                method::PAGINATE,
                json!({
                    "room_id": room_id,
                    "max_row_id": params.max_row_id,
                    "limit": params.limit,
                    "reset": params.reset,
                }),
            )
            .await?;
        let outcome = room.mutate(|state| state.apply_pagination(page));
        debug!(
            %room_id,
            new_rows = outcome.new_rows,
            has_more = outcome.has_more,
            "pagination applied"
        );
        Ok(outcome)
    }

    /// Send a message and show its local echo.
    ///
    /// Returns the transaction ID of the echo, or `None` when the backend did
    /// not return one. The final result arrives later as `send_complete`.
    pub async fn send_message(
        &self,
        params: SendMessageParams,
    ) -> Result<Option<String>, StoreError> {
        let room = self.room(&params.room_id)?;
        let echo: Option<LocalEcho> = self.call(method::SEND_MESSAGE, json!(params)).await?;
        let Some(echo) = echo else {
            debug!(room_id = %params.room_id, "send accepted without local echo");
            return Ok(None);
        };
        if echo.room_id != params.room_id {
            warn!(
                requested = %params.room_id,
                echoed = %echo.room_id,
                transaction_id = %echo.transaction_id,
                "local echo for another room rejected"
            );
            return Err(StoreError::InvalidResponse {
                method: method::SEND_MESSAGE.to_owned(),
                reason: format!(
                    "local echo for room {} instead of {}",
                    echo.room_id, params.room_id
                ),
            });
        }

        let transaction_id = echo.transaction_id.clone();
        room.mutate(|state| state.apply_pending(echo));
        Ok(Some(transaction_id))
    }

    /// Download media bytes through the backend. The store is not touched.
    pub async fn download_media(
        &self,
        mxc_uri: &str,
        encrypted: bool,
    ) -> Result<MediaDownload, StoreError> {
        MediaLocator::parse(mxc_uri)?;
        self.call(
            method::DOWNLOAD_MEDIA,
            json!({ "mxc": mxc_uri, "encrypted": encrypted }),
        )
        .await
    }

    /// URL serving a media file, authenticated with the current image token.
    pub fn media_url(&self, mxc_uri: &str, encrypted: bool) -> Result<Url, StoreError> {
        let token = self.store.image_auth_token();
        media_url(
            &self.config.media_base_url,
            mxc_uri,
            encrypted,
            token.as_deref(),
        )
    }

    /// Discard a failed local echo. Returns `false` when nothing was removed.
    pub fn dismiss_failed_send(
        &self,
        room_id: &str,
        transaction_id: &str,
    ) -> Result<bool, StoreError> {
        let room = self.room(room_id)?;
        Ok(room.mutate_if_changed(|state| state.dismiss_failed_send(transaction_id)))
    }

    fn room(&self, room_id: &str) -> Result<Arc<RoomHandle>, StoreError> {
        self.store
            .get_room(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_owned()))
    }

    async fn call<R>(&self, method: &'static str, params: Value) -> Result<R, StoreError>
    where
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let limit = self.config.request_timeout;
        let response =
            match tokio::time::timeout(limit, self.transport.request(method, params)).await {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    warn!(method, code = ?err.kind, error = %err.message, "request failed");
                    return Err(err.into());
                }
                Err(_) => {
                    warn!(method, timeout_ms = limit.as_millis() as u64, "request timed out");
                    return Err(TransportError::timeout(method, limit).into());
                }
            };
        debug!(
            method,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );

        serde_json::from_value(response).map_err(|err| StoreError::InvalidResponse {
            method: method.to_owned(),
            reason: err.to_string(),
        })
    }
}

fn new_transaction_id() -> String {
    format!("roomsync-{}", Uuid::new_v4().simple())
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}
