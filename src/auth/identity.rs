//! Identity resolution
//! Mission: Derive request identity from verified credentials only
//!
//! Bearer tokens are verified against the HS256 secret before any claim is
//! trusted; unsigned or tampered tokens never yield an identity. API keys
//! derive a deterministic identity from a content-hash prefix. Identity
//! headers are advisory and must match the resolved identity when present.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::errors::PlatformApiError;

/// Clock-skew allowance for exp/nbf claims.
const JWT_LEEWAY_SECONDS: u64 = 10;

/// Identity resolved from authenticated request credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub tenant_id: String,
    pub user_id: String,
    pub user_email: Option<String>,
}

/// Resolver bound to the configured signing secret.
#[derive(Clone)]
pub struct IdentityResolver {
    secret: String,
}

impl IdentityResolver {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Resolve identity from the credential headers of one request.
    pub fn resolve(
        &self,
        authorization: Option<&str>,
        api_key: Option<&str>,
        tenant_header: Option<&str>,
        user_header: Option<&str>,
        request_id: &str,
    ) -> Result<AuthenticatedIdentity, PlatformApiError> {
        resolve_identity(
            &self.secret,
            authorization,
            api_key,
            tenant_header,
            user_header,
            request_id,
        )
    }
}

/// Resolve request identity; see module docs for the credential precedence.
pub fn resolve_identity(
    secret: &str,
    authorization: Option<&str>,
    api_key: Option<&str>,
    tenant_header: Option<&str>,
    user_header: Option<&str>,
    request_id: &str,
) -> Result<AuthenticatedIdentity, PlatformApiError> {
    let mut identity: Option<AuthenticatedIdentity> = None;

    if let Some(token) = parse_bearer_token(authorization) {
        identity = identity_from_bearer_claims(secret, &token);
    }

    if identity.is_none() {
        if let Some(key) = non_empty(api_key) {
            identity = Some(identity_from_api_key(&key));
        }
    }

    let identity = identity.ok_or_else(|| {
        PlatformApiError::new(
            401,
            "AUTH_UNAUTHORIZED",
            "Authentication required.",
            request_id,
        )
    })?;

    assert_no_identity_spoofing(&identity.tenant_id, tenant_header, "X-Tenant-Id", request_id)?;
    assert_no_identity_spoofing(&identity.user_id, user_header, "X-User-Id", request_id)?;
    Ok(identity)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_bearer_token(authorization: Option<&str>) -> Option<String> {
    let raw = non_empty(authorization)?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_empty(Some(token))
}

/// Verify the token signature and time claims, then map claims to identity.
/// Any verification failure yields no identity rather than an error so the
/// API-key fallback still applies.
fn identity_from_bearer_claims(secret: &str, token: &str) -> Option<AuthenticatedIdentity> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = JWT_LEEWAY_SECONDS;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    // exp is optional on platform tokens; validate it only when present.
    validation.required_spec_claims.clear();

    let decoded = decode::<Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()?;
    let claims = decoded.claims;

    let user_id = claim_value(&claims, &["user_id", "userId", "sub"])?;
    let tenant_id = claim_value(&claims, &["tenant_id", "tenantId", "org_id", "orgId"])
        .unwrap_or_else(|| format!("tenant-token-{user_id}"));
    let user_email = claim_value(&claims, &["email", "email_address", "user_email", "userEmail"])
        .map(|email| email.to_lowercase());

    Some(AuthenticatedIdentity {
        tenant_id,
        user_id,
        user_email,
    })
}

fn claim_value(claims: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = claims.get(*key).and_then(Value::as_str) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

/// Deterministic identity from an API-key content hash.
fn identity_from_api_key(api_key: &str) -> AuthenticatedIdentity {
    let digest = hex::encode(Sha256::digest(api_key.as_bytes()));
    AuthenticatedIdentity {
        tenant_id: format!("tenant-apikey-{}", &digest[..12]),
        user_id: format!("user-apikey-{}", &digest[12..24]),
        user_email: None,
    }
}

fn assert_no_identity_spoofing(
    expected: &str,
    provided: Option<&str>,
    header_name: &str,
    request_id: &str,
) -> Result<(), PlatformApiError> {
    match non_empty(provided) {
        None => Ok(()),
        Some(value) if value == expected => Ok(()),
        Some(_) => Err(PlatformApiError::new(
            401,
            "AUTH_IDENTITY_MISMATCH",
            format!("{header_name} does not match authenticated identity."),
            request_id,
        )
        .with_details(json!({
            "header": header_name,
            "reason": "identity_header_mismatch",
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-identity-secret";

    fn token(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn test_verified_jwt_claims_resolve_identity() {
        let token = token(json!({
            "sub": "user-001",
            "tenant_id": "tenant-001",
            "email": "Trader@Example.com",
        }));
        let identity = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            Some("tenant-001"),
            Some("user-001"),
            "req-auth-001",
        )
        .unwrap();
        assert_eq!(identity.tenant_id, "tenant-001");
        assert_eq!(identity.user_id, "user-001");
        assert_eq!(identity.user_email.as_deref(), Some("trader@example.com"));
    }

    #[test]
    fn test_unsigned_token_falls_through_to_unauthorized() {
        // alg=none style token with an empty signature segment
        let header = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0";
        let claims = "eyJzdWIiOiJmb3JnZWQtdXNlciJ9";
        let unsigned = format!("{header}.{claims}.");
        let err = resolve_identity(
            SECRET,
            Some(&format!("Bearer {unsigned}")),
            None,
            None,
            None,
            "req-auth-002",
        )
        .unwrap_err();
        assert_eq!(err.status_code, 401);
        assert_eq!(err.code, "AUTH_UNAUTHORIZED");
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let good = token(json!({"sub": "user-002", "tenant_id": "tenant-002"}));
        let mut parts: Vec<&str> = good.split('.').collect();
        let forged_payload = token(json!({"sub": "user-002", "tenant_id": "tenant-999"}));
        let forged_parts: Vec<&str> = forged_payload.split('.').collect();
        parts[1] = forged_parts[1];
        let tampered = parts.join(".");

        let err = resolve_identity(
            SECRET,
            Some(&format!("Bearer {tampered}")),
            None,
            None,
            None,
            "req-auth-003",
        )
        .unwrap_err();
        assert_eq!(err.code, "AUTH_UNAUTHORIZED");
    }

    #[test]
    fn test_spoofed_tenant_header_is_mismatch() {
        let token = token(json!({"sub": "user-003", "tenant_id": "tenant-003"}));
        let err = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            Some("tenant-other"),
            Some("user-003"),
            "req-auth-004",
        )
        .unwrap_err();
        assert_eq!(err.status_code, 401);
        assert_eq!(err.code, "AUTH_IDENTITY_MISMATCH");
    }

    #[test]
    fn test_missing_identity_headers_are_not_a_mismatch() {
        let token = token(json!({"sub": "user-004", "tenant_id": "tenant-004"}));
        let identity = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            None,
            None,
            "req-auth-005",
        )
        .unwrap();
        assert_eq!(identity.user_id, "user-004");
    }

    #[test]
    fn test_api_key_identity_is_deterministic_hash_prefix() {
        let identity = resolve_identity(SECRET, None, Some("test-key"), None, None, "req-auth-006")
            .unwrap();
        let digest = hex::encode(Sha256::digest(b"test-key"));
        assert_eq!(identity.tenant_id, format!("tenant-apikey-{}", &digest[..12]));
        assert_eq!(identity.user_id, format!("user-apikey-{}", &digest[12..24]));
        assert!(identity.user_email.is_none());

        let again =
            resolve_identity(SECRET, None, Some("test-key"), None, None, "req-auth-007").unwrap();
        assert_eq!(identity, again);
    }

    #[test]
    fn test_no_credentials_is_unauthorized() {
        let err = resolve_identity(SECRET, None, None, None, None, "req-auth-008").unwrap_err();
        assert_eq!(err.status_code, 401);
        assert_eq!(err.code, "AUTH_UNAUTHORIZED");
    }

    #[test]
    fn test_exp_within_leeway_is_accepted() {
        let token = token(json!({
            "sub": "user-skew",
            "tenant_id": "tenant-skew",
            "exp": now() - 5,
        }));
        let identity = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            None,
            None,
            "req-auth-009",
        )
        .unwrap();
        assert_eq!(identity.user_id, "user-skew");
    }

    #[test]
    fn test_expired_beyond_leeway_is_rejected() {
        let token = token(json!({
            "sub": "user-expired",
            "tenant_id": "tenant-expired",
            "exp": now() - 300,
        }));
        let err = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            None,
            None,
            "req-auth-010",
        )
        .unwrap_err();
        assert_eq!(err.code, "AUTH_UNAUTHORIZED");
    }

    #[test]
    fn test_nbf_beyond_leeway_is_rejected() {
        let token = token(json!({
            "sub": "user-nbf",
            "tenant_id": "tenant-nbf",
            "nbf": now() + 300,
        }));
        let err = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            None,
            None,
            "req-auth-011",
        )
        .unwrap_err();
        assert_eq!(err.code, "AUTH_UNAUTHORIZED");
    }

    #[test]
    fn test_tenant_falls_back_to_token_scoped_tenant() {
        let token = token(json!({"sub": "user-solo"}));
        let identity = resolve_identity(
            SECRET,
            Some(&format!("Bearer {token}")),
            None,
            None,
            None,
            "req-auth-012",
        )
        .unwrap();
        assert_eq!(identity.tenant_id, "tenant-token-user-solo");
    }
}
