use axum::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
};

use crate::auth::{AuthenticatedPrincipal, TokenVerifier};
use crate::state::AppState;

/// Extracts and verifies the bearer token on a REST request, attaching the
/// resulting principal to the handler's arguments.
pub struct BearerPrincipal(pub AuthenticatedPrincipal);

#[async_trait]
impl FromRequestParts<AppState> for BearerPrincipal {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))?;
        let raw = header
            .to_str()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "malformed authorization header".to_string()))?;
        let token = raw
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::FORBIDDEN, "authorization header must use the Bearer scheme".to_string()))?;
        if token.is_empty() {
            return Err((StatusCode::FORBIDDEN, "empty bearer token".to_string()));
        }

        let verifier = TokenVerifier::new(&state.keystore);
        verifier
            .verify(token)
            .map(BearerPrincipal)
            .map_err(|e| (e.status_code(), e.to_string()))
    }
}

/// Convenience extractor for handlers that only need to read shared state.
pub type Shared = State<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::io::Write;

    fn test_state() -> (tempfile::NamedTempFile, AppState) {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
        use base64::Engine;
        let secret = B64.encode(b"0123456789abcdef0123456789abcdef");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"keys":[{{"key_id":"k1","principal":"svc@example.com","roles":["cleanup"],"secret":"{secret}"}}]}}"#
        )
        .unwrap();
        let mut config = crate::config::HephaestusConfig::from_env();
        config.service_account_keys_path = file.path().to_str().unwrap().to_string();
        let state = AppState::new(config).unwrap();
        (file, state)
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let (_file, state) = test_state();
        let request = Request::builder().body(axum::body::Body::empty()).unwrap();
        let mut parts = request.into_parts().0;
        let result = BearerPrincipal::from_request_parts(&mut parts, &state).await;
        assert_eq!(result.err().unwrap().0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_token_is_forbidden() {
        let (_file, state) = test_state();
        let request = Request::builder()
            .header("Authorization", "Bearer ")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let result = BearerPrincipal::from_request_parts(&mut parts, &state).await;
        assert_eq!(result.err().unwrap().0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn valid_token_is_accepted() {
        let (_file, state) = test_state();
        let verifier = TokenVerifier::new(&state.keystore);
        let token = verifier
            .generate("k1", &[crate::auth::Role::Cleanup], 60)
            .unwrap();
        let request = Request::builder()
            .header("Authorization", format!("Bearer {token}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let BearerPrincipal(principal) =
            BearerPrincipal::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(principal.principal, "svc@example.com");
    }
}
