//! Integration tests for `/api/v1/jobs` and `/api/v1/scripts/validate`.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, get, job_spec, post, post_json, send, token, LONG_SCRIPT};
use serde_json::json;

fn spec_json(concurrency: i32) -> serde_json::Value {
    json!(job_spec(concurrency, LONG_SCRIPT))
}

// ---------------------------------------------------------------------------
// Test: authentication is required
// ---------------------------------------------------------------------------

#[tokio::test]
async fn jobs_require_bearer_token() {
    let app = common::build_test_app();

    let response = get(&app, "/api/v1/jobs", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");

    let response = get(&app, "/api/v1/jobs", Some("garbage")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid token");
}

// ---------------------------------------------------------------------------
// Test: submission with free capacity starts the job
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn submit_places_job_on_node() {
    let app = common::build_test_app();
    let node = app.add_node("runner-1", 100).await;
    let user = token(10, "user");

    let response = post_json(&app, "/api/v1/jobs", &user, spec_json(40)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "RUNNING");
    assert_eq!(json["data"]["owner_id"], 10);
    assert_eq!(json["data"]["assigned_node_id"], node.id);
    assert!(json["data"].get("script_source").is_none());
}

// ---------------------------------------------------------------------------
// Test: submission without capacity stays PENDING
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn submit_without_capacity_is_pending() {
    let app = common::build_test_app();
    app.add_node("small", 10).await;
    let user = token(10, "user");

    let response = post_json(&app, "/api/v1/jobs", &user, spec_json(50)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "PENDING");
    assert!(json["data"]["assigned_node_id"].is_null());
    assert_eq!(json["data"]["assign_attempts"], 1);
}

// ---------------------------------------------------------------------------
// Test: rejected submissions create nothing
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn rejected_script_returns_report() {
    let app = common::build_test_app();
    let user = token(10, "user");

    let body = json!(job_spec(5, "eval('1 + 1')"));
    let response = post_json(&app, "/api/v1/jobs", &user, body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "SCRIPT_REJECTED");
    assert_eq!(json["details"]["is_valid"], false);
    assert!(!json["details"]["errors"].as_array().unwrap().is_empty());

    let list = body_json(get(&app, "/api/v1/jobs", Some(&user)).await).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_spec_is_a_validation_error() {
    let app = common::build_test_app();
    let user = token(10, "user");

    let mut body = spec_json(5);
    body["concurrency"] = json!(0);
    let response = post_json(&app, "/api/v1/jobs", &user, body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_exceeded_returns_429() {
    let app = common::build_test_app();
    let user = token(10, "user");

    // No nodes: every job stays PENDING and counts against the quota of 3.
    for _ in 0..3 {
        let response = post_json(&app, "/api/v1/jobs", &user, spec_json(5)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = post_json(&app, "/api/v1/jobs", &user, spec_json(5)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["code"], "QUOTA_EXCEEDED");

    // Another user is unaffected.
    let other = token(11, "user");
    let response = post_json(&app, "/api/v1/jobs", &other, spec_json(5)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test(flavor = "multi_thread")]
async fn store_outage_returns_503() {
    let app = common::build_test_app();
    let user = token(10, "user");
    app.store.set_available(false);

    let response = post_json(&app, "/api/v1/jobs", &user, spec_json(5)).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["code"], "STORE_UNAVAILABLE");
    assert_eq!(json["error"], "The job store is temporarily unavailable");
}

// ---------------------------------------------------------------------------
// Test: ownership rules
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn jobs_are_visible_to_owner_and_admin_only() {
    let app = common::build_test_app();
    let owner = token(10, "user");
    let stranger = token(11, "user");
    let admin = token(1, "admin");

    let created = body_json(post_json(&app, "/api/v1/jobs", &owner, spec_json(5)).await).await;
    let id = created["data"]["id"].as_i64().unwrap();
    let uri = format!("/api/v1/jobs/{id}");

    assert_eq!(get(&app, &uri, Some(&owner)).await.status(), StatusCode::OK);
    assert_eq!(get(&app, &uri, Some(&admin)).await.status(), StatusCode::OK);

    let response = get(&app, &uri, Some(&stranger)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = post(&app, &format!("{uri}/cancel"), &stranger).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = get(&app, "/api/v1/jobs/999999", Some(&owner)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_is_scoped_to_caller_unless_admin() {
    let app = common::build_test_app();
    let alice = token(10, "user");
    let bob = token(11, "user");
    let admin = token(1, "admin");

    post_json(&app, "/api/v1/jobs", &alice, spec_json(5)).await;
    post_json(&app, "/api/v1/jobs", &alice, spec_json(5)).await;
    post_json(&app, "/api/v1/jobs", &bob, spec_json(5)).await;

    let mine = body_json(get(&app, "/api/v1/jobs", Some(&alice)).await).await;
    let mine = mine["data"].as_array().unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|j| j["owner_id"] == 10));

    let all = body_json(get(&app, "/api/v1/jobs", Some(&admin)).await).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 3);

    let pending = body_json(get(&app, "/api/v1/jobs?status=PENDING&limit=1", Some(&admin)).await).await;
    assert_eq!(pending["data"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: lifecycle controls
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn pause_resume_cancel_lifecycle() {
    let app = common::build_test_app();
    let node = app.add_node("runner-1", 100).await;
    let user = token(10, "user");

    let created = body_json(post_json(&app, "/api/v1/jobs", &user, spec_json(20)).await).await;
    let id = created["data"]["id"].as_i64().unwrap();

    let paused = body_json(post(&app, &format!("/api/v1/jobs/{id}/pause"), &user).await).await;
    assert_eq!(paused["data"]["status"], "PAUSED");

    let response = post(&app, &format!("/api/v1/jobs/{id}/pause"), &user).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "INVALID_TRANSITION");

    let resumed = body_json(post(&app, &format!("/api/v1/jobs/{id}/resume"), &user).await).await;
    assert_eq!(resumed["data"]["status"], "RUNNING");

    let response = post(&app, &format!("/api/v1/jobs/{id}/cancel"), &user).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = body_json(response).await;
    assert_eq!(cancelled["data"]["status"], "CANCELLED");
    assert_eq!(cancelled["data"]["capacity_released"], true);

    let nodes = app.scheduler().list_nodes().await.unwrap();
    let node = nodes.iter().find(|n| n.id == node.id).unwrap();
    assert_eq!(node.current_load, 0);

    let response = post(&app, &format!("/api/v1/jobs/{id}/cancel"), &user).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "ALREADY_CANCELLED");
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_requires_finished_job() {
    let app = common::build_test_app();
    app.add_node("runner-1", 100).await;
    let user = token(10, "user");

    let created = body_json(post_json(&app, "/api/v1/jobs", &user, spec_json(20)).await).await;
    let id = created["data"]["id"].as_i64().unwrap();
    let uri = format!("/api/v1/jobs/{id}");

    let response = send(&app, Method::DELETE, &uri, Some(&user), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    post(&app, &format!("{uri}/cancel"), &user).await;

    let response = send(&app, Method::DELETE, &uri, Some(&user), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let list = body_json(get(&app, "/api/v1/jobs", Some(&user)).await).await;
    assert!(list["data"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: script validation endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validate_script_reports_without_running() {
    let app = common::build_test_app();
    let user = token(10, "user");

    let response = post_json(
        &app,
        "/api/v1/scripts/validate",
        &user,
        json!({ "script_source": "const r = http.get(target.url); if (r.status > 299) { console.log('bad'); }" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["is_valid"], true);
    assert_eq!(json["data"]["complexity"], 2);

    let response = post_json(
        &app,
        "/api/v1/scripts/validate",
        &user,
        json!({ "script_source": "require('fs').readFileSync('/etc/passwd')" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["is_valid"], false);
    assert!(json["data"]["security_score"].as_u64().unwrap() < 100);
}
