//! `/commands*`: run, inspect, stream, stop, and tear down executions.
//!
//! Acquisition/run streaming follows the same spawned-task-plus-`mpsc`
//! shape as `snapshots::submit_snapshot`; the non-streaming endpoints
//! follow `router/handlers/servers.rs`'s direct `State`-to-manager-call
//! style.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::error::PlzError;
use crate::http::AppState;
use crate::types::{CommandEvent, CommandInfo, CommandRequest, ExecutionMetadata, StatusResponse};
use crate::util::now_unix;

pub async fn submit_command(State(state): State<AppState>, Json(request): Json<CommandRequest>) -> Response {
    let execution_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(run_command(state, request, execution_id, tx));

    let ndjson = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
    (StatusCode::ACCEPTED, [(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(ndjson)).into_response()
}

async fn run_command(state: AppState, request: CommandRequest, execution_id: String, tx: mpsc::Sender<Bytes>) {
    if send_event(&tx, &CommandEvent::Id { id: execution_id.clone() }).await.is_err() {
        return;
    }

    let metadata = ExecutionMetadata {
        user: request.execution_spec.user.clone(),
        snapshot_id: request.snapshot_id.clone(),
        command: request.command.clone(),
        instance_type: request.execution_spec.instance_type.clone(),
        created_at: now_unix(),
    };
    if let Err(e) = state.db.save_execution_metadata(&execution_id, &metadata).await {
        warn!("failed to persist metadata for {}: {}", execution_id, e);
    }

    let mut acquisition = state.provider.acquire_instance(&execution_id, &request.execution_spec).await;
    loop {
        match acquisition.next().await {
            Some(Ok(status)) => {
                if send_event(&tx, &CommandEvent::Status { status }).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                let _ = send_event(&tx, &CommandEvent::Error { error: e.to_string() }).await;
                return;
            }
            None => break,
        }
    }

    let Some(instance) = state.provider.instance_for(&execution_id).await else {
        let _ =
            send_event(&tx, &CommandEvent::Error { error: "instance not available after acquisition".to_string() }).await;
        return;
    };

    let max_idle_seconds = state.config.instances.default_max_idle_seconds;
    match instance.run(&execution_id, &request.snapshot_id, &request.command, &request.parameters, max_idle_seconds).await
    {
        Ok(()) => {
            if let Err(e) = state.remember_last_execution(&request.execution_spec.user, &execution_id).await {
                warn!("failed to record last execution for {}: {}", request.execution_spec.user, e);
            }
            let _ = send_event(&tx, &CommandEvent::Status { status: "running".to_string() }).await;
        }
        Err(e) => {
            let _ = send_event(&tx, &CommandEvent::Error { error: e.to_string() }).await;
        }
    }
}

async fn send_event(tx: &mpsc::Sender<Bytes>, event: &CommandEvent) -> std::result::Result<(), ()> {
    let mut line = serde_json::to_vec(event).map_err(|_| ())?;
    line.push(b'\n');
    tx.send(Bytes::from(line)).await.map_err(|_| ())
}

pub async fn list_commands(State(state): State<AppState>) -> Json<Vec<CommandInfo>> {
    Json(state.provider.get_commands().await)
}

pub async fn tidy(State(state): State<AppState>) -> StatusCode {
    state.provider.tidy_up().await;
    StatusCode::NO_CONTENT
}

/// Current status of an execution. If the execution has just gone
/// terminal, this is the one place that drives the busy→free release
/// transition — the alternative (a background sweep) would leave a
/// finished container occupying its instance until the next `tidy`.
pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<StatusResponse>, PlzError> {
    if let Some(instance) = state.provider.instance_for(&id).await {
        if let Some(container_state) = instance.container_state().await? {
            if !container_state.running {
                if let Err(e) = instance.release(state.results.as_ref(), now_unix(), true).await {
                    warn!("release after completion failed for {}: {}", id, e);
                }
            }
            return Ok(Json(StatusResponse::from(&container_state)));
        }
    }

    match state.results.state(&id).await? {
        Some(container_state) => Ok(Json(StatusResponse::from(&container_state))),
        None => Err(PlzError::NotFound(id)),
    }
}

pub async fn logs_combined(state: State<AppState>, path: Path<String>) -> Result<Response, PlzError> {
    stream_logs(state, path, true, true).await
}

pub async fn logs_stdout(state: State<AppState>, path: Path<String>) -> Result<Response, PlzError> {
    stream_logs(state, path, true, false).await
}

pub async fn logs_stderr(state: State<AppState>, path: Path<String>) -> Result<Response, PlzError> {
    stream_logs(state, path, false, true).await
}

async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    stdout: bool,
    stderr: bool,
) -> Result<Response, PlzError> {
    if let Some(instance) = state.provider.instance_for(&id).await {
        let stream = instance.logs(stdout, stderr).await?;
        let body = Body::from_stream(stream.map(|item| item.map_err(std::io::Error::other)));
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], body).into_response());
    }

    match state.results.logs(&id).await? {
        Some(bytes) => Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()),
        None => Err(PlzError::NotFound(id)),
    }
}

pub async fn output_files(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, PlzError> {
    if let Some(instance) = state.provider.instance_for(&id).await {
        let tarball = instance.output_files_tarball().await?;
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/x-tar")], tarball).into_response());
    }

    match state.results.outputs(&id).await? {
        Some(tarball) => Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/x-tar")], tarball).into_response()),
        None => Err(PlzError::NotFound(id)),
    }
}

/// Stopping an already-stopped execution is normalised to 204, not
/// surfaced as an error (§9 Open Question 2).
pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.provider.stop_command(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_command(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.provider.release_instance(&id, state.results.as_ref(), now_unix()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
