//! The bearer-token boundary.
//!
//! Tokens are verified here, once, and the decoded claims travel through
//! the request as an extension; the core only ever sees [`Claims`]. With
//! no token configuration the server runs in development mode: a supplied
//! token is decoded without verification, a missing one yields empty
//! claims.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, header};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Value, json};

use qvarn_auth::{AccessParams, Claims};

use crate::config::TokenConfig;
use crate::error::ApiError;
use crate::routes::AppState;

const ACCESS_BY_HEADER: &str = "Qvarn-Access-By";
const SECONDARY_TOKEN_HEADER: &str = "Qvarn-Token";

/// Verifies bearer tokens against the configured key, issuer and
/// audience.
pub struct TokenVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    /// Development mode: no verification.
    pub fn disabled() -> Self {
        Self {
            key: None,
            validation: insecure_validation(),
        }
    }

    pub fn new(config: &TokenConfig) -> Result<Self, jsonwebtoken::errors::Error> {
        let key = DecodingKey::from_rsa_pem(config.public_key.as_bytes())?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        Ok(Self {
            key: Some(key),
            validation,
        })
    }

    /// The claims of the request, per the mode the verifier is in.
    pub fn claims_from_headers(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let token = bearer_token(headers);
        match (&self.key, token) {
            (Some(key), Some(token)) => decode::<Claims>(token, key, &self.validation)
                .map(|data| data.claims)
                .map_err(|err| {
                    tracing::debug!(%err, "token verification failed");
                    ApiError::Unauthorized
                }),
            (Some(_), None) => Err(ApiError::Unauthorized),
            (None, Some(token)) => Ok(decode_insecure(token).unwrap_or_default()),
            (None, None) => Ok(Claims::default()),
        }
    }
}

/// Token-checking middleware for every route except `/version`.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = state.verifier.claims_from_headers(request.headers())?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// The request-side parameters for allow-rule matching. Trusted clients
/// act for the user named by the `Qvarn-Access-By` header.
pub fn access_params(
    method: &Method,
    claims: &Claims,
    headers: &HeaderMap,
    resource_type: &str,
) -> AccessParams {
    let mut user_id = claims.sub.clone();
    if user_id.is_empty() && claims.is_trusted_client() {
        user_id = user_from_access_by(headers).unwrap_or_default();
    }
    AccessParams {
        method: method.to_string(),
        client_id: claims.aud.clone(),
        user_id,
        resource_type: resource_type.to_string(),
    }
}

/// The effective user of a trusted client: the `sub` of the JWT in the
/// `Qvarn-Access-By` header, decoded without verification.
pub fn user_from_access_by(headers: &HeaderMap) -> Option<String> {
    let token = headers.get(ACCESS_BY_HEADER)?.to_str().ok()?;
    let claims = decode_insecure(token.trim())?;
    Some(claims.sub)
}

/// The accessor identities of a request, for the access log: persons from
/// token subjects, clients from token audiences, plus the effective user
/// a trusted client acts for.
pub fn accessors_from_headers(headers: &HeaderMap) -> Vec<Value> {
    let mut accessors = Vec::new();
    for header_name in [header::AUTHORIZATION.as_str(), SECONDARY_TOKEN_HEADER] {
        let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let Some(claims) = value.strip_prefix("Bearer ").and_then(decode_insecure) else {
            continue;
        };
        if !claims.sub.is_empty() {
            accessors.push(json!({"accessor_id": claims.sub, "accessor_type": "person"}));
        }
        if !claims.aud.is_empty() {
            accessors.push(json!({"accessor_id": claims.aud, "accessor_type": "client"}));
        }
    }
    if let Some(user) = user_from_access_by(headers) {
        if !user.is_empty() {
            accessors.push(json!({"accessor_id": user, "accessor_type": "person"}));
        }
    }
    accessors
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn decode_insecure(token: &str) -> Option<Claims> {
    let key = DecodingKey::from_secret(&[]);
    decode::<Claims>(token, &key, &insecure_validation())
        .ok()
        .map(|data| data.claims)
}

fn insecure_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::RS256];
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}
