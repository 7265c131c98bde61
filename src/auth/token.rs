use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as Base64Engine;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::HephaestusError;

use super::{AuthenticatedPrincipal, Keystore, Role};

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

/// Verifies bearer tokens against a keystore and can mint new ones for
/// bootstrap flows and tests.
pub struct TokenVerifier<'a> {
    keystore: &'a Keystore,
}

impl<'a> TokenVerifier<'a> {
    pub fn new(keystore: &'a Keystore) -> Self {
        Self { keystore }
    }

    pub fn generate(
        &self,
        key_id: &str,
        roles: &[Role],
        ttl_seconds: i64,
    ) -> Result<String, HephaestusError> {
        let key = self
            .keystore
            .get(key_id)
            .ok_or_else(|| HephaestusError::Authentication(format!("unknown key '{key_id}'")))?;

        if roles.is_empty() {
            return Err(HephaestusError::Validation(
                "requested role set must not be empty".into(),
            ));
        }
        if !roles.iter().all(|r| key.roles.contains(r)) {
            return Err(HephaestusError::Validation(
                "requested roles exceed the key's granted roles".into(),
            ));
        }
        if ttl_seconds <= 0 {
            return Err(HephaestusError::Validation(
                "token ttl must be positive".into(),
            ));
        }

        let now = Utc::now();
        let claims = Claims {
            sub: key.principal.clone(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: now.timestamp(),
            exp: now.timestamp() + ttl_seconds,
        };
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
            kid: key.key_id.clone(),
        };

        let header_segment = b64_encode(&header)?;
        let claims_segment = b64_encode(&claims)?;
        let signing_input = format!("{header_segment}.{claims_segment}");
        let signature = sign(&key.secret, signing_input.as_bytes());
        let signature_segment = Base64Engine.encode(signature);

        Ok(format!("{signing_input}.{signature_segment}"))
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedPrincipal, HephaestusError> {
        let mut parts = token.split('.');
        let (header_segment, claims_segment, signature_segment) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => {
                    return Err(HephaestusError::Authentication(
                        "token must have exactly three segments".into(),
                    ))
                }
            };

        let header: Header = b64_decode(header_segment)?;
        if header.alg != "HS256" || header.typ != "JWT" {
            return Err(HephaestusError::Authentication(
                "unsupported token algorithm".into(),
            ));
        }

        let key = self.keystore.get(&header.kid).ok_or_else(|| {
            HephaestusError::Authentication(format!("unknown key id '{}'", header.kid))
        })?;

        let now = Utc::now();
        if key.is_expired(now) {
            return Err(HephaestusError::Authentication(format!(
                "key '{}' has expired",
                key.key_id
            )));
        }

        let signing_input = format!("{header_segment}.{claims_segment}");
        let expected_signature = sign(&key.secret, signing_input.as_bytes());
        let provided_signature = Base64Engine
            .decode(signature_segment)
            .map_err(|_| HephaestusError::Authentication("malformed signature".into()))?;

        if !constant_time_eq(&expected_signature, &provided_signature) {
            return Err(HephaestusError::Authentication(
                "signature verification failed".into(),
            ));
        }

        let claims: Claims = b64_decode(claims_segment)?;
        let issued_at = timestamp(claims.iat)?;
        let expires_at = timestamp(claims.exp)?;
        if expires_at <= issued_at {
            return Err(HephaestusError::Authentication(
                "token expiry precedes issuance".into(),
            ));
        }
        if now >= expires_at {
            return Err(HephaestusError::Authentication("token has expired".into()));
        }

        let roles: HashSet<Role> = claims
            .roles
            .iter()
            .map(|r| r.parse())
            .collect::<Result<_, _>>()?;
        if roles.is_empty() {
            return Err(HephaestusError::Authentication(
                "token carries no roles".into(),
            ));
        }
        if !roles.iter().all(|r| key.roles.contains(r)) {
            return Err(HephaestusError::Authentication(
                "token roles exceed the key's granted roles".into(),
            ));
        }

        Ok(AuthenticatedPrincipal {
            principal: claims.sub,
            roles,
            key_id: key.key_id,
            issued_at,
            expires_at,
        })
    }
}

fn sign(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn b64_encode<T: Serialize>(value: &T) -> Result<String, HephaestusError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| HephaestusError::Internal(format!("failed to encode token segment: {e}")))?;
    Ok(Base64Engine.encode(json))
}

fn b64_decode<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, HephaestusError> {
    let bytes = Base64Engine
        .decode(segment)
        .map_err(|_| HephaestusError::Authentication("malformed token segment".into()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| HephaestusError::Authentication("malformed token payload".into()))
}

fn timestamp(epoch_seconds: i64) -> Result<DateTime<Utc>, HephaestusError> {
    Utc.timestamp_opt(epoch_seconds, 0)
        .single()
        .ok_or_else(|| HephaestusError::Authentication("invalid token timestamp".into()))
}
