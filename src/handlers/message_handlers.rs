//! HTTP handlers for the relay's message operations.
//! Thin translation layer: JSON bodies in, core calls out. Payload
//! downloads stream from disk instead of buffering in memory.

use crate::{
    errors::AppError,
    models::message::Message,
    services::relay_service::{ChunkOutcome, RelayService},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;

/// Body of `POST /send_message`.
#[derive(Debug, Deserialize)]
pub struct SendMessageReq {
    pub author: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    pub hash: String,
}

/// Body of `POST /push_content`. `content` is base64-encoded chunk bytes.
#[derive(Debug, Deserialize)]
pub struct PushContentReq {
    pub hash: String,
    pub content: String,
    pub eof: bool,
}

/// Body of `POST /get_messages`.
#[derive(Debug, Deserialize)]
pub struct GetMessagesReq {
    pub count: u32,
    pub after: i64,
}

/// One entry in the `get_messages` response.
#[derive(Debug, Serialize)]
pub struct MessageSummary {
    pub hash: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub author: String,
    pub filename: String,
    pub timestamp: i64,
}

impl From<Message> for MessageSummary {
    fn from(msg: Message) -> Self {
        Self {
            hash: msg.hash,
            kind: msg.kind,
            author: msg.author,
            filename: msg.filename,
            timestamp: msg.timestamp,
        }
    }
}

/// `POST /send_message` — announce a message by its claimed content hash.
///
/// An already-complete hash is the dedup path and still answers 200; only
/// a hash that is mid-upload comes back as a conflict.
pub async fn send_message(
    State(relay): State<RelayService>,
    Json(req): Json<SendMessageReq>,
) -> Result<Json<serde_json::Value>, AppError> {
    relay
        .announce(&req.author, &req.kind, &req.filename, &req.hash)
        .await?;
    Ok(Json(json!({})))
}

/// `POST /push_content` — append one chunk, sealing on `eof`.
pub async fn push_content(
    State(relay): State<RelayService>,
    Json(req): Json<PushContentReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let bytes = general_purpose::STANDARD
        .decode(&req.content)
        .map_err(|err| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                format!("content is not valid base64: {}", err),
            )
        })?;

    let _outcome: ChunkOutcome = relay.push_chunk(&req.hash, &bytes, req.eof).await?;
    Ok((StatusCode::CREATED, Json(json!({}))))
}

/// `POST /get_messages` — the last `count` accepted messages newer than
/// `after`, complete entries only, in acceptance order.
pub async fn get_messages(
    State(relay): State<RelayService>,
    Json(req): Json<GetMessagesReq>,
) -> Result<Json<Vec<MessageSummary>>, AppError> {
    let messages = relay.list_since(req.count, req.after).await?;
    Ok(Json(messages.into_iter().map(MessageSummary::from).collect()))
}

/// `GET /get_message_content/{hash}` — stream the payload for download.
pub async fn get_message_content(
    State(relay): State<RelayService>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    let (meta, file) = relay.fetch(&hash).await?;

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        meta.filename.replace(['"', '\r', '\n'], "_")
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    Ok(response)
}
