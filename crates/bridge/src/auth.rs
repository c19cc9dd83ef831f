//! OAuth 2.1 bearer-token validation.
//!
//! Two validation paths share the audience and scope checks: RSA JWT
//! verification against cached JWKS documents, and RFC 7662 token
//! introspection. Failures carry a machine-readable reason and never include
//! the token or its decoded claims.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::access::ClaimSet;
use crate::config::{OAuthConfig, TokenValidation};
use crate::timeouts;

mod introspect;
mod jwks;

use introspect::IntrospectionCache;
use jwks::JwksCache;

const RSA_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Why a bearer token was rejected. The display form is what ends up in the
/// JSON-RPC error `data.detail`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Malformed token: {0}")]
    Malformed(String),
    #[error("Unsupported token algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("Unknown signing key '{0}'")]
    UnknownKeyId(String),
    #[error("Unsupported JWK: {0}")]
    UnsupportedKey(String),
    #[error("Token signature verification failed")]
    InvalidSignature,
    #[error("Token is expired")]
    Expired,
    #[error("Token is not yet valid")]
    NotYetValid,
    #[error("Token audience does not match")]
    AudienceMismatch,
    #[error("Token is missing required scope '{0}'")]
    MissingScope(String),
    #[error("JWKS fetch failed: {0}")]
    JwksUnreachable(String),
    #[error("Token introspection failed: {0}")]
    IntrospectionUnreachable(String),
    #[error("Token is not active")]
    TokenInactive,
}

/// Bearer-token validator with process-lifetime caches.
///
/// The caches are keyed by URL / token fingerprint and deliberately live
/// outside the config snapshot so a config reload does not discard warm keys.
pub struct AuthValidator {
    http: reqwest::Client,
    jwks: JwksCache,
    introspection: IntrospectionCache,
}

impl AuthValidator {
    pub fn new(http: reqwest::Client) -> AuthValidator {
        AuthValidator {
            http,
            jwks: JwksCache::new(timeouts::jwks_ttl()),
            introspection: IntrospectionCache::new(),
        }
    }

    /// Validate a bearer token and return its claim set.
    pub async fn validate(
        &self,
        oauth: &OAuthConfig,
        token: &str,
    ) -> Result<ClaimSet, AuthError> {
        let claims = match oauth.token_validation {
            TokenValidation::Jwt => self.validate_jwt(oauth, token).await?,
            TokenValidation::Introspection => {
                let endpoint = oauth.introspection_endpoint.as_deref().ok_or_else(|| {
                    AuthError::IntrospectionUnreachable(
                        "no introspection endpoint configured".to_string(),
                    )
                })?;
                let map = self
                    .introspection
                    .lookup_or_introspect(
                        &self.http,
                        endpoint,
                        oauth.introspection_client_id.as_deref(),
                        oauth.introspection_client_secret.as_deref(),
                        token,
                    )
                    .await?;
                ClaimSet::new(map)
            }
        };

        check_audience(oauth.audience.as_deref(), &claims)?;
        check_required_scopes(&oauth.required_scopes, &claims)?;
        Ok(claims)
    }

    async fn validate_jwt(
        &self,
        oauth: &OAuthConfig,
        token: &str,
    ) -> Result<ClaimSet, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if !RSA_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("missing kid in token header".to_string()))?;

        let jwk = self
            .jwks
            .find_key(&self.http, &oauth.authorization_servers, &kid)
            .await?;
        if !jwk.kty.eq_ignore_ascii_case("RSA") {
            return Err(AuthError::UnsupportedKey(format!("kty '{}'", jwk.kty)));
        }
        let (n, e) = jwk
            .n
            .as_deref()
            .zip(jwk.e.as_deref())
            .ok_or_else(|| AuthError::UnsupportedKey("missing RSA components".to_string()))?;
        let key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| AuthError::UnsupportedKey(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        // No clock skew tolerance; reject on any exp/nbf violation.
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // Audience is matched manually below (string-or-array semantics).
        validation.validate_aud = false;

        let data =
            decode::<Map<String, Value>>(token, &key, &validation).map_err(map_jwt_error)?;
        Ok(ClaimSet::new(data.claims))
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::Malformed(format!("missing claim '{claim}'"))
        }
        ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::InvalidToken => {
            AuthError::Malformed(e.to_string())
        }
        ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm(e.to_string()),
        // Anything else is treated as a signature failure.
        _ => AuthError::InvalidSignature,
    }
}

/// When an audience is configured it must appear in `aud`: string equality,
/// or element equality when `aud` is an array.
fn check_audience(expected: Option<&str>, claims: &ClaimSet) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let matched = match claims.get("aud") {
        Some(Value::String(aud)) => aud == expected,
        Some(Value::Array(entries)) => entries
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s == expected)),
        _ => false,
    };
    if matched {
        Ok(())
    } else {
        Err(AuthError::AudienceMismatch)
    }
}

fn check_required_scopes(required: &[String], claims: &ClaimSet) -> Result<(), AuthError> {
    if required.is_empty() {
        return Ok(());
    }
    let scopes = claims.scopes();
    for scope in required {
        if !scopes.contains(scope.as_str()) {
            return Err(AuthError::MissingScope(scope.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(entries: &[(&str, Value)]) -> ClaimSet {
        let mut map = Map::new();
        for (k, v) in entries {
            map.insert((*k).to_string(), v.clone());
        }
        ClaimSet::new(map)
    }

    #[test]
    fn audience_matches_string_or_array_element() {
        let string_aud = claims(&[("aud", json!("mcp-bridge"))]);
        assert!(check_audience(Some("mcp-bridge"), &string_aud).is_ok());
        assert!(matches!(
            check_audience(Some("other"), &string_aud),
            Err(AuthError::AudienceMismatch)
        ));

        let array_aud = claims(&[("aud", json!(["a", "mcp-bridge"]))]);
        assert!(check_audience(Some("mcp-bridge"), &array_aud).is_ok());

        let missing_aud = claims(&[]);
        assert!(check_audience(None, &missing_aud).is_ok());
        assert!(matches!(
            check_audience(Some("mcp-bridge"), &missing_aud),
            Err(AuthError::AudienceMismatch)
        ));
    }

    #[test]
    fn required_scopes_split_on_whitespace() {
        let with_scopes = claims(&[("scope", json!("kong:read kong:write"))]);
        assert!(check_required_scopes(&[], &with_scopes).is_ok());
        assert!(
            check_required_scopes(&["kong:read".to_string()], &with_scopes).is_ok()
        );
        let err = check_required_scopes(
            &["kong:read".to_string(), "admin".to_string()],
            &with_scopes,
        )
        .expect_err("missing scope");
        assert!(matches!(err, AuthError::MissingScope(s) if s == "admin"));

        let no_scope = claims(&[]);
        assert!(matches!(
            check_required_scopes(&["x".to_string()], &no_scope),
            Err(AuthError::MissingScope(_))
        ));
    }

    #[test]
    fn missing_token_detail_is_stable() {
        // The wire-visible detail asserted by clients.
        assert_eq!(AuthError::MissingToken.to_string(), "Missing authorization token");
    }
}
