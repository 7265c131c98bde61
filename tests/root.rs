use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

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
            r#"{{"keys":[{{"key_id":"k1","principal":"svc@example.com","roles":["guard-rails","cleanup","analytics"],"secret":"{secret}"}}]}}"#
        )
        .as_bytes(),
    )
    .unwrap();
    let mut config = HephaestusConfig::from_env();
    config.service_account_keys_path = file.path().to_str().unwrap().to_string();
    let state = AppState::new(config).unwrap();
    (file, state)
}

#[tokio::test]
async fn root_responds_ok() {
    let (_file, state) = test_state();
    let app = hephaestus::rest::build_router(state);
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_responds_ok() {
    let (_file, state) = test_state();
    let app = hephaestus::rest::build_router(state);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn guard_rails_without_token_is_unauthorized() {
    let (_file, state) = test_state();
    let app = hephaestus::rest::build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/quality/guard-rails")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"workspace":"/tmp"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
