//! Defines routes for the relay's wire protocol.
//!
//! ## Structure
//! - **Message endpoints**
//!   - `POST /send_message`                  — announce a message by claimed hash
//!   - `POST /push_content`                  — append a payload chunk (seals on eof)
//!   - `POST /get_messages`                  — list recent complete messages
//!   - `GET  /get_message_content/{hash}`    — download a payload
//!
//! - **Health endpoints**
//!   - `GET /healthz` — liveness
//!   - `GET /readyz`  — readiness (DB + disk checks)

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        message_handlers::{get_message_content, get_messages, push_content, send_message},
    },
    services::relay_service::RelayService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the relay API.
///
/// The router carries shared state (`RelayService`) to all handlers.
pub fn routes() -> Router<RelayService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // message endpoints
        .route("/send_message", post(send_message))
        .route("/push_content", post(push_content))
        .route("/get_messages", post(get_messages))
        .route("/get_message_content/{hash}", get(get_message_content))
}
