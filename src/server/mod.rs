//! HTTP surface: the thin axum layer that adapts [`crate::jobs::JobManager`]
//! operations to request/response bodies and the SSE subscription bridge.
//! Wire framing only — job orchestration lives in [`crate::jobs`].

pub mod auth;
pub mod routes;
