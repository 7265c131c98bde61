use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use hephaestus::auth::{Role, TokenVerifier};
use hephaestus::config::HephaestusConfig;
use hephaestus::state::AppState;

fn test_state() -> (tempfile::NamedTempFile, AppState) {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
    use base64::Engine;
    let secret = B64.encode(b"0123456789abcdef0123456789abcdef");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut file,
        format!(
            r#"{{"keys":[{{"key_id":"k1","principal":"svc-guard@example.com","roles":["guard-rails","cleanup"],"secret":"{secret}"}},{{"key_id":"k2","principal":"svc-analytics@example.com","roles":["analytics"],"secret":"{secret}"}}]}}"#
        )
        .as_bytes(),
    )
    .unwrap();
    let mut config = HephaestusConfig::from_env();
    config.service_account_keys_path = file.path().to_str().unwrap().to_string();
    config.plugin_config_path = "/nonexistent/plugins.toml".to_string();
    let state = AppState::new(config).unwrap();
    (file, state)
}

fn bearer(state: &AppState, key_id: &str, roles: &[Role]) -> String {
    let verifier = TokenVerifier::new(&state.keystore);
    verifier.generate(key_id, roles, 3600).unwrap()
}

#[tokio::test]
async fn guard_rails_happy_path_tolerates_missing_tooling() {
    let (_file, state) = test_state();
    let token = bearer(&state, "k1", &[Role::GuardRails]);
    let workspace = tempfile::tempdir().unwrap();
    let app = hephaestus::rest::build_router(state);

    let body = serde_json::json!({
        "workspace": workspace.path().to_string_lossy(),
        "no_format": false,
        "drift_check": false,
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/quality/guard-rails")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(parsed["result"]["success"].as_bool().unwrap());
    assert!(parsed["task_id"].is_string());
}

#[tokio::test]
async fn guard_rails_denies_principal_without_role() {
    let (_file, state) = test_state();
    let token = bearer(&state, "k2", &[Role::Analytics]);
    let app = hephaestus::rest::build_router(state);

    let body = serde_json::json!({ "workspace": "/tmp" });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/quality/guard-rails")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(parsed["detail"]
        .as_str()
        .unwrap()
        .contains("missing required role 'guard-rails'"));
}

#[tokio::test]
async fn cleanup_rejects_dangerous_root() {
    let (_file, state) = test_state();
    let token = bearer(&state, "k1", &[Role::Cleanup]);
    let app = hephaestus::rest::build_router(state);

    let body = serde_json::json!({ "workspace_root": "/", "dry_run": true });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/cleanup")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn analytics_ingest_counts_accepted_and_rejected() {
    let (_file, state) = test_state();
    let token = bearer(&state, "k2", &[Role::Analytics]);
    let app = hephaestus::rest::build_router(state);

    let body = serde_json::json!([
        { "source": "src/a.rs", "kind": "coverage", "value": 0.8 },
        { "kind": "coverage" },
    ]);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/analytics/ingest")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["accepted"], 1);
    assert_eq!(parsed["rejected"], 1);
}
