//! Integration tests for the Footprint HTTP API.
//!
//! Uses axum-test to drive the router without starting a real server.

// Holding the env MutexGuard across await is intentional: tests touching
// FOOTPRINT_API_KEY are serialized.
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use footprint::api::{
    AppState, USER_ID_HEADER, create_router,
    types::{
        AccrueResponse, ArchiveResponse, ChainResponse, CompleteResponse, ErrorResponse,
        HealthResponse, InstanceResponse, MemberResponse, SweepResponse,
    },
};
use footprint::{Config, Services};
use footprint_core::StorageBackend;
use serde_json::json;
use std::sync::Mutex;

/// Serializes tests since some modify env vars.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const CONFIG: &str = r#"
    [wattage.desktop]
    "cpu-100" = 100
    "gpu-150" = 150
    "ram-20" = 20
    "psu-450" = 450

    [[devices]]
    user_id = 2
    class = "desktop"
    cpu = "cpu-100"
    gpu = "gpu-150"
    ram = "ram-20"
    psu = "psu-450"

    [[devices]]
    user_id = 3
    class = "desktop"
    cpu = "cpu-100"
    gpu = "gpu-150"
    ram = "ram-20"
    psu = "psu-450"
"#;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Holds the env mutex and clears the API key on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("FOOTPRINT_API_KEY") };
    }
}

fn build_server(api_key: Option<&str>) -> (TestServer, TestGuard) {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe {
        match api_key {
            Some(key) => std::env::set_var("FOOTPRINT_API_KEY", key),
            None => std::env::remove_var("FOOTPRINT_API_KEY"),
        }
    }
    let config = Config::from_toml(CONFIG).unwrap();
    let services = Services::new(StorageBackend::default(), &config);
    let router = create_router(AppState::new(services));
    (TestServer::new(router).unwrap(), TestGuard { _guard: guard })
}

fn create_test_server() -> (TestServer, TestGuard) {
    build_server(None)
}

fn user(id: u64) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(USER_ID_HEADER), HeaderValue::from(id))
}

async fn post_as(server: &TestServer, path: &str, user_id: u64) -> TestResponse {
    let (name, value) = user(user_id);
    server.post(path).add_header(name, value).await
}

/// Owner 1 with members 2 and 3; returns the first instance id.
async fn create_chain(server: &TestServer) -> u64 {
    let (name, value) = user(1);
    let response = server
        .post("/chains")
        .add_header(name, value)
        .json(&json!({
            "organization": "Acme",
            "name": "Website",
            "members": [
                { "user_id": 2, "role": "member" },
                { "user_id": 3, "role": "member" }
            ]
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let created: InstanceResponse = response.json();
    created.instance.instance_id
}

// =============================================================================
// HEALTH
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

// =============================================================================
// CHAINS
// =============================================================================

#[tokio::test]
async fn test_create_chain_starts_at_design() {
    let (server, _guard) = create_test_server();
    let instance_id = create_chain(&server).await;

    let response = server.get(&format!("/instances/{}", instance_id)).await;
    response.assert_status_ok();
    let view: InstanceResponse = response.json();
    assert_eq!(view.instance.stage, "Design");
    assert_eq!(view.instance.status, "InProgress");
    assert_eq!(view.members.len(), 3);
    assert_eq!(view.progress.completed, 0);
    assert_eq!(view.progress.total, 2);

    let owner = view.members.iter().find(|m| m.user_id == 1).unwrap();
    assert_eq!(owner.role, "owner");
    assert!(owner.progress_status.is_none());
}

#[tokio::test]
async fn test_create_chain_requires_user_header() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/chains")
        .json(&json!({ "organization": "Acme", "name": "Website" }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_malformed_user_header_is_bad_request() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/chains")
        .add_header(
            HeaderName::from_static(USER_ID_HEADER),
            HeaderValue::from_static("alice"),
        )
        .json(&json!({ "organization": "Acme", "name": "Website" }))
        .await;

    response.assert_status_bad_request();
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "invalid_input");
}

#[tokio::test]
async fn test_create_chain_rejects_empty_name() {
    let (server, _guard) = create_test_server();
    let (name, value) = user(1);

    let response = server
        .post("/chains")
        .add_header(name, value)
        .json(&json!({ "organization": "Acme", "name": "" }))
        .await;

    response.assert_status_bad_request();
    let error: ErrorResponse = response.json();
    assert!(!error.success);
}

#[tokio::test]
async fn test_unknown_chain_is_not_found() {
    let (server, _guard) = create_test_server();

    let response = server.get("/chains/999").await;

    response.assert_status_not_found();
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "not_found");
}

// =============================================================================
// STAGE COMPLETION
// =============================================================================

#[tokio::test]
async fn test_stage_advances_after_last_contributor() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;

    let first = post_as(&server, &format!("/instances/{}/complete", origin), 2).await;
    first.assert_status_ok();
    let first: CompleteResponse = first.json();
    assert_eq!(first.outcome, "user_stage_completed");
    assert_eq!(first.progress.map(|p| p.completed), Some(1));

    let second = post_as(&server, &format!("/instances/{}/complete", origin), 3).await;
    second.assert_status_ok();
    let second: CompleteResponse = second.json();
    assert_eq!(second.outcome, "stage_advanced");
    assert_eq!(second.from_instance_id, Some(origin));
    assert_eq!(second.stage.as_deref(), Some("Development"));

    let next: InstanceResponse = server
        .get(&format!("/instances/{}", second.instance_id))
        .await
        .json();
    assert_eq!(next.instance.stage, "Development");
    let m2 = next.members.iter().find(|m| m.user_id == 2).unwrap();
    let m3 = next.members.iter().find(|m| m.user_id == 3).unwrap();
    assert_eq!(m2.progress_status.as_deref(), Some("NotStarted"));
    assert_eq!(m3.progress_status.as_deref(), Some("InProgress"));

    let chain: ChainResponse = server
        .get(&format!("/chains/{}", next.instance.chain_id))
        .await
        .json();
    assert_eq!(chain.instances.len(), 2);
    assert_eq!(chain.instances[0].status, "Complete");
    assert_eq!(chain.instances[0].successor, Some(second.instance_id));
}

#[tokio::test]
async fn test_owner_cannot_complete() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;

    let response = post_as(&server, &format!("/instances/{}/complete", origin), 1).await;

    response.assert_status_forbidden();
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "forbidden");
}

#[tokio::test]
async fn test_outsider_cannot_complete() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;

    let response = post_as(&server, &format!("/instances/{}/complete", origin), 99).await;

    response.assert_status_forbidden();
}

#[tokio::test]
async fn test_sweep_endpoint_reports_counts() {
    let (server, _guard) = create_test_server();
    create_chain(&server).await;

    let response = server.post("/sweep").await;

    response.assert_status_ok();
    let report: SweepResponse = response.json();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.advanced, 0);
    assert_eq!(report.failed, 0);
}

// =============================================================================
// MEMBERSHIP & ARCHIVE
// =============================================================================

#[tokio::test]
async fn test_owner_adds_member() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;
    let (name, value) = user(1);

    let response = server
        .post(&format!("/instances/{}/members", origin))
        .add_header(name, value)
        .json(&json!({ "user_id": 4, "role": "leader" }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let added: MemberResponse = response.json();
    assert_eq!(added.member.user_id, 4);
    assert_eq!(added.member.role, "leader");
    assert_eq!(added.member.progress_status.as_deref(), Some("NotStarted"));
}

#[tokio::test]
async fn test_duplicate_member_conflicts() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;
    let (name, value) = user(1);

    let response = server
        .post(&format!("/instances/{}/members", origin))
        .add_header(name, value)
        .json(&json!({ "user_id": 2, "role": "member" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_archive_is_owner_only() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;

    let denied = post_as(&server, &format!("/instances/{}/archive", origin), 2).await;
    denied.assert_status_forbidden();

    let archived = post_as(&server, &format!("/instances/{}/archive", origin), 1).await;
    archived.assert_status_ok();
    let archived: ArchiveResponse = archived.json();
    assert_eq!(archived.instance.status, "Archived");
    assert!(archived.instance.closed_at.is_some());

    let again = post_as(&server, &format!("/instances/{}/archive", origin), 1).await;
    again.assert_status(StatusCode::CONFLICT);
}

// =============================================================================
// ACCRUAL
// =============================================================================

#[tokio::test]
async fn test_accrual_desktop_hour() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;
    let (name, value) = user(2);

    let response = server
        .post(&format!("/instances/{}/accrue", origin))
        .add_header(name, value)
        .json(&json!({ "elapsed_seconds": 3600 }))
        .await;

    response.assert_status_ok();
    let accrual: AccrueResponse = response.json();
    assert_eq!(accrual.device, "desktop");
    assert_eq!(accrual.power_mw, 720_000);
    assert_eq!(accrual.energy_mwh, 720_000);
    assert_eq!(accrual.carbon_delta_ug, 342_000_000);
    assert_eq!(accrual.carbon_total_ug, 342_000_000);
    assert_eq!(accrual.session_duration_secs, 3600);
}

#[tokio::test]
async fn test_split_accruals_sum() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;

    for member in [2u64, 3] {
        let (name, value) = user(member);
        server
            .post(&format!("/instances/{}/accrue", origin))
            .add_header(name, value)
            .json(&json!({ "elapsed_seconds": 1800 }))
            .await
            .assert_status_ok();
    }

    let view: InstanceResponse = server.get(&format!("/instances/{}", origin)).await.json();
    assert_eq!(view.instance.carbon_emit_ug, 342_000_000);
    assert_eq!(view.instance.session_duration_secs, 3600);
}

#[tokio::test]
async fn test_accrual_without_device_is_lookup_error() {
    let (server, _guard) = create_test_server();
    let origin = create_chain(&server).await;
    let (name, value) = user(1);

    let response = server
        .post(&format!("/instances/{}/accrue", origin))
        .add_header(name, value)
        .json(&json!({ "elapsed_seconds": 60 }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "lookup");

    let view: InstanceResponse = server.get(&format!("/instances/{}", origin)).await.json();
    assert_eq!(view.instance.carbon_emit_ug, 0);
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let api_key = "test-secret-key-12345";
    let (server, _guard) = build_server(Some(api_key));

    let response = server
        .get("/chains/1")
        .add_header(
            header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse::<HeaderValue>().unwrap(),
        )
        .await;

    // Authenticated, so the request reaches the handler.
    response.assert_status_not_found();
}

#[tokio::test]
async fn test_auth_invalid_token_rejected() {
    let (server, _guard) = build_server(Some("correct-key"));

    let response = server
        .get("/chains/1")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong-key"),
        )
        .await;

    response.assert_status_unauthorized();
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "unauthorized");
}

#[tokio::test]
async fn test_auth_missing_header_rejected() {
    let (server, _guard) = build_server(Some("correct-key"));

    let response = server.post("/sweep").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_auth_health_exempt() {
    let (server, _guard) = build_server(Some("correct-key"));

    let response = server.get("/health").await;

    response.assert_status_ok();
}
