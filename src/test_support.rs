//! In-process pNode stand-in for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::common::TelemetryMethod;

#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error(&'static str),
    Raw(&'static str),
    Stall(Duration),
}

type Replies = Arc<Mutex<HashMap<TelemetryMethod, Reply>>>;

#[derive(Default)]
pub struct FakePeer {
    replies: HashMap<TelemetryMethod, Reply>,
}

impl FakePeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers stats and version like a live pNode.
    pub fn healthy(uptime: u64) -> Self {
        Self::new()
            .reply(TelemetryMethod::GetStats, stats_reply(uptime))
            .reply(
                TelemetryMethod::GetVersion,
                Reply::Result(json!({ "version": "0.7.3", "release": "stable" })),
            )
    }

    pub fn reply(mut self, method: TelemetryMethod, reply: Reply) -> Self {
        self.replies.insert(method, reply);
        self
    }

    pub async fn spawn(self) -> RunningPeer {
        let replies: Replies = Arc::new(Mutex::new(self.replies));
        let app = Router::new()
            .route("/rpc", post(answer))
            .with_state(Arc::clone(&replies));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        RunningPeer {
            address,
            replies,
            handle,
        }
    }
}

pub fn stats_reply(uptime: u64) -> Reply {
    Reply::Result(json!({
        "uptime": uptime,
        "active_streams": 2,
        "cpu_percent": 3.5,
        "packets_received": 120,
        "packets_sent": 98,
        "ram_total": 8_000_000_000u64,
        "ram_used": 2_000_000_000u64,
        "total_bytes": 94_633,
    }))
}

pub struct RunningPeer {
    pub address: String,
    replies: Replies,
    handle: JoinHandle<()>,
}

impl RunningPeer {
    pub fn set_reply(&self, method: TelemetryMethod, reply: Reply) {
        self.replies.lock().unwrap().insert(method, reply);
    }
}

impl Drop for RunningPeer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn answer(State(replies): State<Replies>, body: String) -> Response {
    let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let reply = request
        .get("method")
        .and_then(|method| serde_json::from_value::<TelemetryMethod>(method.clone()).ok())
        .and_then(|method| replies.lock().unwrap().get(&method).cloned())
        .unwrap_or(Reply::Error("unknown method"));

    match reply {
        Reply::Result(result) => {
            Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
        }
        Reply::Error(message) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32000, "message": message },
        }))
        .into_response(),
        Reply::Raw(body) => body.into_response(),
        Reply::Stall(delay) => {
            tokio::time::sleep(delay).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
