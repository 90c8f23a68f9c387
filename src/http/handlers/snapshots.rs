//! `POST /snapshots`: build a new image from a streamed build context.
//!
//! The response side follows the same `Body::from_stream`-fed-by-`mpsc`
//! idiom as `commands::submit_command`; the build-event stream itself
//! comes from `registry::local::LocalRegistry::build`. The request side
//! has no precedent in this crate's grounding sources (nothing in the
//! pack accepts a raw streamed build context this way) — it is built
//! directly against the wire format: a `\n`-terminated metadata line
//! followed by gzip tar bytes, scanned byte-by-byte so the split never
//! consumes tar bytes into the metadata buffer.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use crate::error::{PlzError, Result};
use crate::http::AppState;
use crate::registry::construct_tag;
use crate::types::{BuildEvent, SnapshotMetadata};

pub async fn submit_snapshot(State(state): State<AppState>, body: Body) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(run_build(state, body, tx));

    let ndjson = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(ndjson)).into_response()
}

async fn run_build(state: AppState, body: Body, tx: mpsc::Sender<Bytes>) {
    let mut data_stream = body.into_data_stream();

    let (metadata_line, leftover) = match split_metadata_line(&mut data_stream).await {
        Ok(v) => v,
        Err(e) => {
            let _ = send_event(&tx, &BuildEvent::Error { error: e.to_string() }).await;
            return;
        }
    };

    let metadata_json = match String::from_utf8(metadata_line) {
        Ok(s) => s,
        Err(e) => {
            let _ = send_event(&tx, &BuildEvent::Error { error: format!("metadata line is not UTF-8: {}", e) }).await;
            return;
        }
    };

    if let Err(e) = serde_json::from_str::<SnapshotMetadata>(&metadata_json) {
        let _ = send_event(&tx, &BuildEvent::Error { error: format!("invalid metadata: {}", e) }).await;
        return;
    }

    // Tag is derived from the metadata alone, before a single tar byte is
    // read, matching the original's ordering and the tag-derivation
    // testable property.
    let tag = construct_tag(&metadata_json);

    let tail = data_stream.map(|item| item.map_err(std::io::Error::other));
    let combined = futures_util::stream::once(futures_util::future::ready(Ok::<Bytes, std::io::Error>(leftover))).chain(tail);
    let reader = StreamReader::new(combined);
    let context: Box<dyn tokio::io::AsyncRead + Send + Unpin> = Box::new(reader);

    let build_stream = match state.registry.build(context, &tag).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = send_event(&tx, &BuildEvent::Error { error: e.to_string() }).await;
            return;
        }
    };
    tokio::pin!(build_stream);

    while let Some(item) = build_stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => BuildEvent::Error { error: e.to_string() },
        };
        let is_error = matches!(event, BuildEvent::Error { .. });
        if send_event(&tx, &event).await.is_err() {
            return;
        }
        if is_error {
            return;
        }
    }

    state.provider.push(&tag).await;
    info!("built snapshot {}", tag);
    if send_event(&tx, &BuildEvent::Id { id: tag }).await.is_err() {
        warn!("snapshot build client disconnected before the id frame was delivered");
    }
}

/// Read `stream` until a `\n` byte is found, returning the bytes before it
/// (the metadata line) and the bytes after it from the same chunk (the
/// start of the tar). Never buffers past the newline.
async fn split_metadata_line(
    stream: &mut (impl Stream<Item = std::result::Result<Bytes, axum::Error>> + Unpin),
) -> Result<(Vec<u8>, Bytes)> {
    let mut buf = Vec::new();
    loop {
        let chunk = stream
            .next()
            .await
            .ok_or_else(|| PlzError::Validation("snapshot body ended before the metadata line".to_string()))?
            .map_err(|e| PlzError::Validation(format!("body stream error: {}", e)))?;

        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&chunk[..pos]);
            return Ok((buf, chunk.slice(pos + 1..)));
        }
        buf.extend_from_slice(&chunk);
    }
}

async fn send_event(tx: &mpsc::Sender<Bytes>, event: &BuildEvent) -> std::result::Result<(), ()> {
    let mut line = serde_json::to_vec(event).map_err(|_| ())?;
    line.push(b'\n');
    tx.send(Bytes::from(line)).await.map_err(|_| ())
}
