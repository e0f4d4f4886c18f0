use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use roomsync_client::{
    ClientConfig, RequestFacade, RpcTransport, SendMessageParams, SyncApplier, logging, method,
};
use roomsync_core::{SendState, TransportError, TransportErrorKind};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

const ROOM: &str = "!lobby:example.org";
const SELF_USER: &str = "@smoke:example.org";
const LIVE_HEAD: i64 = 60;
const LIVE_BATCH: i64 = 10;
const WAIT: Duration = Duration::from_secs(5);

type SmokeResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        eprintln!("roomsync smoke failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> SmokeResult<()> {
    let config = ClientConfig::from_env()?;
    let store = Arc::new(config.build_store());
    let mut changes = store.subscribe();
    let (push, applier) = SyncApplier::new(Arc::clone(&store)).spawn(config.event_buffer);
    let facade = RequestFacade::new(
        SimulatedBackend::new(push.clone()),
        Arc::clone(&store),
        config,
    );

    for frame in initial_frames() {
        push.send(frame).await?;
    }
    tokio::time::timeout(WAIT, async {
        while !store.is_init_complete() {
            changes.recv().await?;
        }
        Ok::<_, Box<dyn Error>>(())
    })
    .await??;

    let loaded = facade.load_room_state(ROOM, true, false).await?;
    info!(?loaded, "room state loaded");
    for _ in 0..2 {
        let page = facade.load_more_history(ROOM).await?;
        info!(new_rows = page.new_rows, has_more = page.has_more, "history page applied");
    }

    let room = store.get_room(ROOM).ok_or("room missing after sync")?;
    let mut signal = room.subscribe();
    let transaction_id = facade
        .send_message(SendMessageParams::text(ROOM, "hello from roomsync-smoke"))
        .await?
        .ok_or("backend returned no local echo")?;
    tokio::time::timeout(WAIT, async {
        loop {
            let confirmed = matches!(
                room.read().send_state(&transaction_id),
                Some(SendState::Confirmed)
            );
            if confirmed {
                return Ok::<_, Box<dyn Error>>(());
            }
            signal.changed().await?;
        }
    })
    .await??;

    let (rows, cursor, members, name) = {
        let state = room.read();
        (
            state.timeline().len(),
            state.pagination_cursor(),
            state.members().len(),
            state.meta().and_then(|meta| meta.name.clone()),
        )
    };
    let avatar = facade.media_url("mxc://example.org/lobby-avatar", false)?;

    println!("room: {ROOM} ({})", name.as_deref().unwrap_or("unnamed"));
    println!("timeline rows: {rows}, pagination cursor: {cursor:?}, members: {members}");
    println!("send {transaction_id}: confirmed");
    println!("avatar url: {avatar}");

    drop(push);
    drop(facade);
    applier.shutdown().await;
    Ok(())
}

fn frame(command: &str, data: Value) -> String {
    json!({"command": command, "request_id": 0, "data": data}).to_string()
}

fn row(row_id: i64, sender: &str, body: &str, transaction_id: Option<&str>) -> Value {
    json!({
        "row_id": row_id,
        "event_id": format!("$smoke{row_id}"),
        "sender": sender,
        "type": "m.room.message",
        "timestamp_ms": 1_700_000_000_000_i64 + row_id * 1_000,
        "content": {"msgtype": "m.text", "body": body},
        "transaction_id": transaction_id,
    })
}

fn initial_frames() -> Vec<String> {
    let events: Vec<Value> = (LIVE_HEAD - LIVE_BATCH + 1..=LIVE_HEAD)
        .map(|row_id| row(row_id, "@bob:example.org", &format!("live {row_id}"), None))
        .collect();
    vec![
        frame(
            "client_state",
            json!({
                "is_logged_in": true,
                "is_verified": true,
                "user_id": SELF_USER,
                "device_id": "SMOKE",
                "homeserver_url": "https://matrix.example.org",
            }),
        ),
        frame("sync_status", json!({"type": "ok", "error_count": 0})),
        frame(
            "sync_complete",
            json!({
                "rooms": {
                    ROOM: {
                        "meta": {"name": "Lobby", "has_member_list": true},
                        "events": events,
                    }
                }
            }),
        ),
        frame("image_auth_token", json!("smoke-token")),
        frame("init_complete", Value::Null),
    ]
}

/// In-process backend answering requests and pushing send results.
struct SimulatedBackend {
    push: mpsc::Sender<String>,
    next_row: AtomicI64,
}

impl SimulatedBackend {
    fn new(push: mpsc::Sender<String>) -> Self {
        Self {
            push,
            next_row: AtomicI64::new(LIVE_HEAD + 1),
        }
    }

    fn history(params: &Value) -> Value {
        let limit = params["limit"].as_i64().unwrap_or(LIVE_BATCH).max(1);
        let upper = params["max_row_id"].as_i64().unwrap_or(LIVE_HEAD + 1);
        let lower = (upper - limit).max(1);
        let events: Vec<Value> = (lower..upper)
            .map(|row_id| row(row_id, "@carol:example.org", &format!("old {row_id}"), None))
            .collect();
        json!({"events": events, "has_more": lower > 1})
    }

    fn send(&self, params: &Value) -> Result<Value, TransportError> {
        let transaction_id = params["transaction_id"]
            .as_str()
            .ok_or_else(|| TransportError::backend("missing transaction_id"))?
            .to_owned();
        let body = params["text"].as_str().unwrap_or_default().to_owned();
        let row_id = self.next_row.fetch_add(1, Ordering::Relaxed);

        let push = self.push.clone();
        let completion = frame(
            "send_complete",
            json!({
                "room_id": ROOM,
                "transaction_id": transaction_id,
                "event_id": format!("$smoke{row_id}"),
                "row_id": row_id,
            }),
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = push.send(completion).await;
        });

        Ok(json!({
            "room_id": ROOM,
            "transaction_id": transaction_id,
            "sender": SELF_USER,
            "type": "m.room.message",
            "content": {"msgtype": "m.text", "body": body},
        }))
    }
}

#[async_trait]
impl RpcTransport for SimulatedBackend {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        if self.push.is_closed() {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "simulated backend stopped",
            ));
        }
        match method {
            method::GET_ROOM_STATE => Ok(json!({
                "meta": {"name": "Lobby", "topic": "roomsync smoke", "has_member_list": true},
                "members": [
                    {"user_id": SELF_USER, "display_name": "Smoke"},
                    {"user_id": "@bob:example.org", "display_name": "Bob"},
                    {"user_id": "@carol:example.org", "display_name": "Carol"},
                ],
            })),
            method::PAGINATE => Ok(Self::history(&params)),
            method::SEND_MESSAGE => self.send(&params),
            other => Err(TransportError::backend(format!("unsupported method {other}"))),
        }
    }
}
