//! Compact HS256 tokens (JWT wire format) for service-to-service calls.
//!
//! The dispatch claimer mints a short-TTL credential scoped to one
//! tenant; the gateway verifies it before releasing a join token. This
//! is the only channel through which join tokens leave the database, so
//! verification is timing-safe and expiry is checked server-side.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SERVICE_SCOPE: &str = "dispatch:claim";

/// Compare two secret strings without leaking where they differ.
///
/// Scans to the end of the longer input, folding every byte pair into
/// one [`subtle::Choice`], so a wrong length and a wrong byte cost the
/// same. Used for webhook signatures, stream tokens and the credential
/// signatures below.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let left = a.as_bytes();
    let right = b.as_bytes();

    let mut equal = subtle::Choice::from(u8::from(left.len() == right.len()));
    for i in 0..left.len().max(right.len()) {
        let x = left.get(i).copied().unwrap_or(0);
        let y = right.get(i).copied().unwrap_or(0);
        equal &= x.ct_eq(&y);
    }
    equal.into()
}

/// Claims carried by a service credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub sub: String,
    pub tenant_id: Uuid,
    pub scope: String,
    pub exp: i64,
}

/// Mint a tenant-scoped dispatch-claim credential.
pub fn mint_service_token(secret: &str, tenant_id: Uuid, ttl_sec: u64) -> Result<String> {
    let claims = ServiceClaims {
        sub: "dispatch-claimer".into(),
        tenant_id,
        scope: SERVICE_SCOPE.into(),
        exp: (Utc::now() + Duration::seconds(ttl_sec as i64)).timestamp(),
    };
    sign(secret, &serde_json::to_value(&claims)?)
}

/// Verify a service credential for the given tenant at `now`.
pub fn verify_service_token(secret: &str, token: &str, tenant_id: Uuid) -> Result<ServiceClaims> {
    verify_service_token_at(secret, token, tenant_id, Utc::now())
}

pub fn verify_service_token_at(
    secret: &str,
    token: &str,
    tenant_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ServiceClaims> {
    let payload = open(secret, token)?;
    let claims: ServiceClaims = serde_json::from_value(payload)
        .map_err(|e| Error::Auth(format!("malformed service claims: {e}")))?;

    if claims.scope != SERVICE_SCOPE {
        return Err(Error::Auth(format!("wrong scope '{}'", claims.scope)));
    }
    if claims.tenant_id != tenant_id {
        return Err(Error::Auth("credential is scoped to another tenant".into()));
    }
    if claims.exp <= now.timestamp() {
        return Err(Error::Auth("service credential expired".into()));
    }
    Ok(claims)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HS256 plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sign arbitrary claims as `header.payload.signature`.
pub fn sign(secret: &str, claims: &serde_json::Value) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Crypto("HMAC key setup failed".into()))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

/// Verify the signature and return the decoded payload.
pub fn open(secret: &str, token: &str) -> Result<serde_json::Value> {
    let mut parts = token.split('.');
    let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(Error::Auth("token is not three dot-separated parts".into())),
    };

    let signing_input = format!("{header}.{payload}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Crypto("HMAC key setup failed".into()))?;
    mac.update(signing_input.as_bytes());
    let expected = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    if !constant_time_eq(&expected, signature) {
        return Err(Error::Auth("bad token signature".into()));
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::Auth("token payload is not base64url".into()))?;
    serde_json::from_slice(&payload_bytes)
        .map_err(|e| Error::Auth(format!("token payload is not JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_verify_round_trip() {
        let tenant = Uuid::new_v4();
        let token = mint_service_token("topsecret", tenant, 60).unwrap();
        let claims = verify_service_token("topsecret", &token, tenant).unwrap();
        assert_eq!(claims.sub, "dispatch-claimer");
        assert_eq!(claims.tenant_id, tenant);
    }

    #[test]
    fn wrong_secret_rejected() {
        let tenant = Uuid::new_v4();
        let token = mint_service_token("topsecret", tenant, 60).unwrap();
        assert!(verify_service_token("other", &token, tenant).is_err());
    }

    #[test]
    fn wrong_tenant_rejected() {
        let token = mint_service_token("topsecret", Uuid::new_v4(), 60).unwrap();
        assert!(verify_service_token("topsecret", &token, Uuid::new_v4()).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let tenant = Uuid::new_v4();
        let token = mint_service_token("topsecret", tenant, 60).unwrap();
        let later = Utc::now() + Duration::seconds(120);
        assert!(verify_service_token_at("topsecret", &token, tenant, later).is_err());
    }

    #[test]
    fn tampered_payload_rejected() {
        let tenant = Uuid::new_v4();
        let token = mint_service_token("topsecret", tenant, 60).unwrap();
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        parts[1] = URL_SAFE_NO_PAD.encode(br#"{"sub":"evil"}"#);
        assert!(verify_service_token("topsecret", &parts.join("."), tenant).is_err());
    }

    #[test]
    fn garbage_is_rejected_not_panicked() {
        assert!(open("s", "").is_err());
        assert!(open("s", "a.b").is_err());
        assert!(open("s", "a.b.c.d").is_err());
    }

    #[test]
    fn constant_time_eq_handles_all_shapes() {
        assert!(constant_time_eq("", ""));
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cret", "s3creT"));
        assert!(!constant_time_eq("s3cret", "s3cre"));
        assert!(!constant_time_eq("s3cret", "s3crets"));
        assert!(!constant_time_eq("", "x"));
    }
}
