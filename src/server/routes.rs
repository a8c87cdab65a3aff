use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;

use crate::jobs::SubmitError;
use crate::models::SubmitCrawlRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    user_id: Option<String>,
}

/// `user_id` is an opaque caller-supplied identifier; the core does not
/// authenticate it beyond HMAC gating the request itself. Accepted as
/// either a header or a query param so both REST-style and query-string
/// callers are served.
fn extract_user_id(headers: &HeaderMap, query_user_id: Option<String>) -> Result<String, Response> {
    if let Some(v) = headers.get("X-User-Id") {
        if let Ok(s) = v.to_str() {
            if !s.is_empty() {
                return Ok(s.to_string());
            }
        }
    }
    if let Some(id) = query_user_id {
        if !id.is_empty() {
            return Ok(id);
        }
    }
    Err(error_response(
        StatusCode::BAD_REQUEST,
        "missing user_id (supply X-User-Id header or ?user_id= query param)",
    ))
}

type Response = axum::response::Response;

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

fn submit_error_response(err: SubmitError) -> Response {
    match err {
        SubmitError::InvalidInput(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
        SubmitError::NotFound => error_response(StatusCode::NOT_FOUND, "job not found"),
        SubmitError::Store(msg) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &msg),
    }
}

/// `POST /api/v1/crawl`
pub async fn submit_crawl(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitCrawlRequest>,
) -> impl IntoResponse {
    let user_id = match extract_user_id(&headers, None) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.job_manager.submit(&user_id, req).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "job_id": job.id,
                "status": job.status,
            })),
        )
            .into_response(),
        Err(err) => submit_error_response(err),
    }
}

/// `GET /api/v1/crawl/:job_id`
pub async fn job_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let user_id = match extract_user_id(&headers, query.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.job_manager.job_state(&user_id, &job_id).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => submit_error_response(err),
    }
}

/// `GET /api/v1/crawl` — all non-terminal jobs for the caller.
pub async fn active_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    let user_id = match extract_user_id(&headers, query.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let jobs = state.job_manager.active_jobs(&user_id).await;
    Json(json!({ "success": true, "jobs": jobs })).into_response()
}

/// `GET /api/v1/crawl/:job_id/download`
pub async fn download_artifact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let user_id = match extract_user_id(&headers, query.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.job_manager.download_artifact(&user_id, &job_id).await {
        Ok((filename, content)) => (
            StatusCode::OK,
            [
                ("Content-Type", "text/markdown".to_string()),
                (
                    "Content-Disposition",
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            content,
        )
            .into_response(),
        Err(err) => submit_error_response(err),
    }
}

/// `POST /api/v1/crawl/:job_id/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let user_id = match extract_user_id(&headers, query.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.job_manager.cancel(&user_id, &job_id).await {
        Ok(job) => Json(json!({
            "success": true,
            "job_id": job.id,
            "status": job.status,
        }))
        .into_response(),
        Err(err) => submit_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    user_id: Option<String>,
}

/// `GET /api/v1/crawl/:job_id/events` — the subscription bridge.
///
/// Honors `Last-Event-ID` for resumption; its absence means replay from the
/// start of the job's log. A live tail is layered on top of the catch-up
/// read via the event log's broadcast channel, with a heartbeat comment
/// every `heartbeat_interval` to keep idle connections open through proxies.
pub async fn job_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let user_id = extract_user_id(&headers, query.user_id)?;
    state
        .job_manager
        .job_state(&user_id, &job_id)
        .await
        .map_err(submit_error_response)?;

    let last_event_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    let events = state.job_manager.events();
    // Subscribe *before* the catch-up read so no event appended concurrently
    // with this connection can fall in the gap between the two: the live
    // channel may now re-deliver events the catch-up read also returns, but
    // the watermark filter below drops anything the catch-up stream already
    // covered rather than ever skipping one.
    let live = events.subscribe(&job_id).await;
    let catch_up = events.read_since(&job_id, last_event_id).await;
    let catch_up_high_water = catch_up.last().map(|e| e.event_id).unwrap_or(last_event_id.unwrap_or(0));
    let heartbeat_interval = state.job_manager.heartbeat_interval();

    let catch_up_entries = tokio_stream::iter(catch_up);
    let live_entries = tokio_stream::wrappers::BroadcastStream::new(live)
        .filter_map(move |res| {
            let entry = res.ok()?;
            if entry.event_id <= catch_up_high_water {
                None
            } else {
                Some(entry)
            }
        });

    // Stop right after a terminal event (`job_completed`/`job_failed`) has
    // been delivered — per the subscription bridge's termination rule —
    // rather than tailing the job's broadcast channel forever.
    let entries = futures::StreamExt::scan(
        catch_up_entries.chain(live_entries),
        false,
        |done, entry| {
            if *done {
                return futures::future::ready(None);
            }
            if entry.payload.is_terminal() {
                *done = true;
            }
            futures::future::ready(Some(entry))
        },
    );

    let stream = entries.map(|entry| {
        Ok(Event::default()
            .id(entry.event_id.to_string())
            .event(entry.payload.kind())
            .json_data(entry.payload.to_json())
            .unwrap_or_else(|_| Event::default()))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(heartbeat_interval)
            .text("heartbeat"),
    ))
}

/// `GET /api/v1/health`
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
