use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Scopes requested from the identity provider for full platform access.
pub const EVO_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "organization",
    "email",
    "evo.discovery",
    "evo.workspace",
    "evo.blobs",
    "evo.object",
    "offline_access",
];

/// OAuth token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Generate a PKCE code verifier (43-128 random URL-safe characters).
pub fn generate_code_verifier() -> String {
    let bytes: Vec<u8> = (0..32).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate a PKCE code challenge from a verifier: `BASE64URL_NO_PAD(SHA256(verifier))`.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Verify a PKCE code verifier against a challenge.
pub fn verify_pkce(code_verifier: &str, challenge: &str) -> bool {
    generate_code_challenge(code_verifier) == challenge
}

/// Read the `exp` claim of a JWT without verifying its signature.
///
/// Returns `None` for opaque tokens or tokens without an `exp` claim.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Mask a bearer token for display: first 6 characters and the length.
pub fn token_fingerprint(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…({} chars)", token.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jwt(claims: serde_json::Value) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = engine.encode(claims.to_string().as_bytes());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn pkce_roundtrip() {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        assert!(verify_pkce(&verifier, &challenge));
        assert!(!verify_pkce("wrong_verifier", &challenge));
    }

    #[test]
    fn code_verifier_is_url_safe_and_long_enough() {
        let verifier = generate_code_verifier();
        assert!(verifier.len() >= 43);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn jwt_expiry_reads_exp_claim() {
        let token = fake_jwt(serde_json::json!({ "sub": "user", "exp": 1_900_000_000 }));
        let exp = jwt_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn jwt_expiry_is_none_for_opaque_tokens() {
        assert!(jwt_expiry("opaque-token").is_none());
        let token = fake_jwt(serde_json::json!({ "sub": "user" }));
        assert!(jwt_expiry(&token).is_none());
    }

    #[test]
    fn fingerprint_never_contains_full_token() {
        let token = "abcdefghijklmnopqrstuvwxyz";
        let fp = token_fingerprint(token);
        assert!(fp.starts_with("abcdef"));
        assert!(!fp.contains("ghij"));
    }
}
