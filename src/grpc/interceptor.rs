use tonic::{Request, Status};

use crate::auth::{AuthenticatedPrincipal, TokenVerifier};
use crate::state::AppState;

/// Extracts and verifies the bearer token carried in gRPC metadata,
/// the streaming-RPC analogue of the REST `BearerPrincipal` extractor.
/// Applied at the top of every handler rather than via `tonic::Interceptor`,
/// since verification needs the shared keystore rather than per-call state.
pub fn authenticate<T>(
    request: &Request<T>,
    state: &AppState,
) -> Result<AuthenticatedPrincipal, Status> {
    let raw = request
        .metadata()
        .get("authorization")
        .ok_or_else(|| Status::unauthenticated("missing authorization metadata"))?;
    let raw = raw
        .to_str()
        .map_err(|_| Status::unauthenticated("malformed authorization metadata"))?;
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or_else(|| Status::unauthenticated("authorization metadata must use the Bearer scheme"))?;

    let verifier = TokenVerifier::new(&state.keystore);
    verifier.verify(token).map_err(Status::from)
}
