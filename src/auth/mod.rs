use base64::{ engine::general_purpose::URL_SAFE_NO_PAD, Engine as _ };
use chrono::{ Duration, Utc };
use hmac::{ Hmac, Mac };
use serde::{ Deserialize, Serialize };
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TTL_HOURS: i64 = 24;

/// Authenticated caller. Everything the dispatcher does is scoped to `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer_token: &str) -> Result<CallerIdentity, AuthError>;
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    user_id: Option<String>,
    exp: i64,
}

/// HS256 compact JWTs carrying `{"user_id", "exp"}`.
pub struct JwtAuthenticator {
    secret: Vec<u8>,
}

impl JwtAuthenticator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self { secret: secret.as_ref().to_vec() }
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| AuthError::Invalid(e.to_string()))
    }

    /// Token valid for 24 hours.
    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        self.issue_with_expiry(user_id, (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp())
    }

    fn issue_with_expiry(&self, user_id: &str, exp: i64) -> Result<String, AuthError> {
        let header = Header { alg: "HS256".to_string(), typ: Some("JWT".to_string()) };
        let claims = Claims { user_id: Some(user_id.to_string()), exp };
        let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let bytes = serde_json::to_vec(value).map_err(|e| AuthError::Invalid(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::Invalid(format!("bad base64: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::Invalid(format!("bad json: {}", e)))
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, bearer_token: &str) -> Result<CallerIdentity, AuthError> {
        let token = bearer_token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(AuthError::Invalid("expected three segments".to_string()));
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(AuthError::Invalid(format!("unsupported alg {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| AuthError::Invalid(format!("bad signature encoding: {}", e)))?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature).map_err(|_| AuthError::Invalid("bad signature".to_string()))?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        match claims.user_id {
            Some(user_id) if !user_id.is_empty() => Ok(CallerIdentity { user_id }),
            _ => Err(AuthError::Invalid("token has no user_id".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_authenticate() {
        let auth = JwtAuthenticator::new("secret");
        let token = auth.issue("user-1").unwrap();
        assert_eq!(auth.authenticate(&token), Ok(CallerIdentity::new("user-1")));
    }

    #[test]
    fn issued_header_uses_standard_hs256_encoding() {
        let auth = JwtAuthenticator::new("secret");
        let token = auth.issue_with_expiry("u42", 4102444800).unwrap();
        let mut segments = token.split('.');
        let header = segments.next().unwrap();
        assert_eq!(header, "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9");
        assert_eq!(auth.authenticate(&token).unwrap().user_id, "u42");
    }

    #[test]
    fn rejects_wrong_secret_and_tampering() {
        let token = JwtAuthenticator::new("secret").issue("user-1").unwrap();
        let other = JwtAuthenticator::new("other");
        assert!(matches!(other.authenticate(&token), Err(AuthError::Invalid(_))));

        let auth = JwtAuthenticator::new("secret");
        let forged_claims = URL_SAFE_NO_PAD.encode(r#"{"user_id":"admin","exp":4102444800}"#);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_claims;
        assert!(matches!(auth.authenticate(&parts.join(".")), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn rejects_expired_missing_and_malformed() {
        let auth = JwtAuthenticator::new("secret");
        let expired = auth.issue_with_expiry("user-1", Utc::now().timestamp() - 10).unwrap();
        assert_eq!(auth.authenticate(&expired), Err(AuthError::Expired));
        assert_eq!(auth.authenticate("  "), Err(AuthError::Missing));
        assert!(matches!(auth.authenticate("a.b"), Err(AuthError::Invalid(_))));
        assert!(matches!(auth.authenticate("a.b.c.d"), Err(AuthError::Invalid(_))));
    }
}
