use axum::extract::FromRequestParts;
use axum::http::{ header::AUTHORIZATION, request::Parts, HeaderMap };
use log::warn;

use super::AppState;
use super::error::ApiError;
use crate::auth::{ AuthError, CallerIdentity };

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Missing)?;
    match value.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
            Ok(token.trim()),
        _ => Err(AuthError::Missing),
    }
}

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(&parts.headers).and_then(|token| state.authenticator.authenticate(token)) {
            Ok(caller) => Ok(caller),
            Err(e) => {
                warn!("Rejected {} {}: {}", parts.method, parts.uri.path(), e);
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn reads_bearer_scheme_case_insensitively() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer  xyz ")), Ok("xyz"));
    }

    #[test]
    fn other_schemes_and_blank_tokens_are_missing() {
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::Missing));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), Err(AuthError::Missing));
        assert_eq!(bearer_token(&headers("Bearer ")), Err(AuthError::Missing));
    }
}
