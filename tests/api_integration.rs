use axum::http::StatusCode;
use axum_test::TestServer;
use docrawl_core::{build_app, config::Config, jobs::JobManager, AppState};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

fn test_config() -> Config {
    Config {
        port: 0,
        shared_secret: "test_secret".to_string(),
        user_agent: "docrawl-test/0.1".to_string(),
        fetch_rate_per_second: 4,
        fetch_timeout_ms: 500,
        job_timeout_ms: 60_000,
        max_workers_per_job: 2,
        batch_size: 5,
        max_global_workers: 4,
        cache_ttl_secs: 3600,
        sitemap_origin_cache_ttl_secs: 60,
        event_retention_secs: 3600,
        heartbeat_interval_secs: 15,
        finalize_quiescence_ms: 50,
    }
}

fn compute_signature(timestamp: &str, body: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take a key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn signed_headers(body: &str, secret: &str) -> (String, String) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        .to_string();
    let signature = compute_signature(&timestamp, body, secret);
    (timestamp, signature)
}

fn test_app() -> (TestServer, Arc<Config>) {
    let config = Arc::new(test_config());
    let job_manager = Arc::new(JobManager::new(config.clone()));
    let state = AppState {
        config: config.clone(),
        job_manager,
    };
    (TestServer::new(build_app(state)).unwrap(), config)
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let (server, _config) = test_app();
    let response = server.get("/api/v1/health").await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<serde_json::Value>()["status"], "ok");
}

#[tokio::test]
async fn submit_without_hmac_is_rejected() {
    let (server, _config) = test_app();
    let payload = json!({ "url": "https://docs.example.com/guide" });
    let response = server.post("/api/v1/crawl").json(&payload).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn submit_with_bad_signature_is_rejected() {
    let (server, _config) = test_app();
    let body = json!({ "url": "https://docs.example.com/guide" }).to_string();
    let response = server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", "1700000000")
        .add_header("X-Signature", "not-a-real-signature")
        .add_header("X-User-Id", "user-1")
        .text(body)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn submit_rejects_invalid_url_with_400() {
    let (server, config) = test_app();
    let payload = json!({ "url": "not a url" });
    let body = payload.to_string();
    let (timestamp, signature) = signed_headers(&body, &config.shared_secret);

    let response = server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn submit_accepts_a_well_formed_request_and_returns_pending_job() {
    let (server, config) = test_app();
    let payload = json!({
        "url": "https://docs.example.invalid/guide/intro",
        "config": { "max_pages": 1, "max_depth": 0 },
    });
    let body = payload.to_string();
    let (timestamp, signature) = signed_headers(&body, &config.shared_secret);

    let response = server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "pending");
    assert!(json["job_id"].as_str().is_some());
}

#[tokio::test]
async fn job_state_round_trips_through_submit_and_get() {
    let (server, config) = test_app();
    let payload = json!({
        "url": "https://docs.example.invalid/guide/intro",
        "config": { "max_pages": 1, "max_depth": 0 },
    });
    let body = payload.to_string();
    let (timestamp, signature) = signed_headers(&body, &config.shared_secret);

    let submit = server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;
    let job_id = submit.json::<serde_json::Value>()["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (timestamp_get, signature_get) = signed_headers("", &config.shared_secret);
    let state = server
        .get(&format!("/api/v1/crawl/{job_id}"))
        .add_header("X-Timestamp", timestamp_get)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature_get)
        .await;

    state.assert_status(StatusCode::OK);
    let json = state.json::<serde_json::Value>();
    assert_eq!(json["success"], true);
    let status = json["status"].as_str().unwrap();
    assert!(["pending", "processing", "completed", "failed"].contains(&status));
}

#[tokio::test]
async fn job_state_for_another_users_job_is_not_found() {
    let (server, config) = test_app();
    let payload = json!({
        "url": "https://docs.example.invalid/guide/intro",
        "config": { "max_pages": 1, "max_depth": 0 },
    });
    let body = payload.to_string();
    let (timestamp, signature) = signed_headers(&body, &config.shared_secret);

    let submit = server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;
    let job_id = submit.json::<serde_json::Value>()["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (timestamp_get, signature_get) = signed_headers("", &config.shared_secret);
    let state = server
        .get(&format!("/api/v1/crawl/{job_id}"))
        .add_header("X-Timestamp", timestamp_get)
        .add_header("X-User-Id", "someone-else")
        .add_header("X-Signature", signature_get)
        .await;

    state.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_before_completion_is_not_found() {
    let (server, config) = test_app();
    let payload = json!({
        "url": "https://docs.example.invalid/guide/intro",
        "config": { "max_pages": 1, "max_depth": 0 },
    });
    let body = payload.to_string();
    let (timestamp, signature) = signed_headers(&body, &config.shared_secret);

    let submit = server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;
    let job_id = submit.json::<serde_json::Value>()["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (timestamp_dl, signature_dl) = signed_headers("", &config.shared_secret);
    let download = server
        .get(&format!("/api/v1/crawl/{job_id}/download"))
        .add_header("X-Timestamp", timestamp_dl)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature_dl)
        .await;

    download.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let (server, config) = test_app();
    let (timestamp, signature) = signed_headers("", &config.shared_secret);
    let response = server
        .post("/api/v1/crawl/no-such-job/cancel")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn active_jobs_lists_only_the_callers_pending_jobs() {
    let (server, config) = test_app();
    let payload = json!({
        "url": "https://docs.example.invalid/guide/intro",
        "config": { "max_pages": 1, "max_depth": 0 },
    });
    let body = payload.to_string();
    let (timestamp, signature) = signed_headers(&body, &config.shared_secret);

    server
        .post("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature)
        .json(&payload)
        .await;

    let (timestamp_list, signature_list) = signed_headers("", &config.shared_secret);
    let active = server
        .get("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp_list)
        .add_header("X-User-Id", "user-1")
        .add_header("X-Signature", signature_list)
        .await;

    active.assert_status(StatusCode::OK);
    let json = active.json::<serde_json::Value>();
    assert!(json["jobs"].as_array().unwrap().len() >= 1);

    let (timestamp_other, signature_other) = signed_headers("", &config.shared_secret);
    let active_other = server
        .get("/api/v1/crawl")
        .add_header("X-Timestamp", timestamp_other)
        .add_header("X-User-Id", "someone-else")
        .add_header("X-Signature", signature_other)
        .await;
    let json_other = active_other.json::<serde_json::Value>();
    assert_eq!(json_other["jobs"].as_array().unwrap().len(), 0);
}
