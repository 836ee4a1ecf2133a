//! `echo`: a small HTTP and WebSocket agent, mostly useful for smoke tests.
//!
//! Routes, relative to the agent's mount points:
//!
//! - `GET /ping` returns the configured greeting
//! - `GET /hits` counts its own requests
//! - `POST /echo` returns the request body
//! - `GET /ws` echoes WebSocket text frames

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::ws::{Message, WebSocket};
use axum::routing::{get, post};
use serde::Deserialize;

use super::parse_config;
use crate::agent::{Agent, AgentRouter, HttpCapable, SocketSurface, WebSocketCapable};
use crate::error::AgentError;

/// Catalog key.
pub const FACTORY: &str = "echo";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EchoConfig {
    #[serde(default = "default_greeting")]
    greeting: String,
}

fn default_greeting() -> String {
    "pong".into()
}

struct EchoState {
    greeting: String,
    hits: AtomicU64,
}

pub struct EchoAgent {
    state: Arc<EchoState>,
}

impl EchoAgent {
    pub fn new(config: &serde_json::Value) -> Result<Self, AgentError> {
        let config: EchoConfig = parse_config(config)?;
        Ok(Self {
            state: Arc::new(EchoState {
                greeting: config.greeting,
                hits: AtomicU64::new(0),
            }),
        })
    }

    pub fn hits(&self) -> u64 {
        self.state.hits.load(Ordering::Relaxed)
    }
}

pub fn create(config: &serde_json::Value) -> Result<Arc<dyn Agent>, AgentError> {
    Ok(Arc::new(EchoAgent::new(config)?))
}

impl Agent for EchoAgent {
    fn http(&self) -> Option<&dyn HttpCapable> {
        Some(self)
    }

    fn websocket(&self) -> Option<&dyn WebSocketCapable> {
        Some(self)
    }
}

impl HttpCapable for EchoAgent {
    fn attach(&self, router: &mut AgentRouter) -> Result<(), AgentError> {
        let ping = Arc::clone(&self.state);
        let hits = Arc::clone(&self.state);
        router
            .route(
                "/ping",
                get(move || {
                    let state = Arc::clone(&ping);
                    async move { state.greeting.clone() }
                }),
            )
            .route(
                "/hits",
                get(move || {
                    let state = Arc::clone(&hits);
                    async move {
                        let count = state.hits.fetch_add(1, Ordering::Relaxed) + 1;
                        Json(serde_json::json!({ "hits": count }))
                    }
                }),
            )
            .route("/echo", post(|body: String| async move { body }));
        Ok(())
    }
}

impl WebSocketCapable for EchoAgent {
    fn init_websocket(&self, sockets: &mut SocketSurface<'_>) -> Result<(), AgentError> {
        sockets.on_upgrade("/ws", echo_socket);
        Ok(())
    }
}

async fn echo_socket(mut socket: WebSocket) {
    while let Some(frame) = socket.recv().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "echo socket closed with error");
                return;
            }
        };
        match message {
            Message::Text(text) => {
                if socket.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}
