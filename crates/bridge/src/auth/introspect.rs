//! RFC 7662 token introspection.
//!
//! The `active` flag is authoritative. Positive results are cached briefly,
//! keyed by a token digest so raw tokens never sit in memory as map keys;
//! negative results are not cached.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::timeouts;

const POSITIVE_CACHE_TTL: Duration = Duration::from_secs(60);
/// Opportunistic purge threshold for the positive cache.
const PURGE_THRESHOLD: usize = 1024;

struct CachedEntry {
    claims: Map<String, Value>,
    expires_at: Instant,
}

pub(super) struct IntrospectionCache {
    entries: parking_lot::Mutex<HashMap<String, CachedEntry>>,
}

impl IntrospectionCache {
    pub(super) fn new() -> IntrospectionCache {
        IntrospectionCache {
            entries: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub(super) async fn lookup_or_introspect(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        client_id: Option<&str>,
        client_secret: Option<&str>,
        token: &str,
    ) -> Result<Map<String, Value>, AuthError> {
        let key = token_fingerprint(token);
        if let Some(claims) = self.get_fresh(&key) {
            return Ok(claims);
        }

        let mut request = http
            .post(endpoint)
            .timeout(timeouts::auth_http_timeout())
            .form(&[("token", token)]);
        if let Some(id) = client_id {
            request = request.basic_auth(id, client_secret);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| AuthError::IntrospectionUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AuthError::IntrospectionUnreachable(format!(
                "endpoint returned {}",
                resp.status()
            )));
        }
        let claims: Map<String, Value> = resp.json().await.map_err(|e| {
            AuthError::IntrospectionUnreachable(format!("invalid introspection response: {e}"))
        })?;

        if !claims.get("active").and_then(Value::as_bool).unwrap_or(false) {
            return Err(AuthError::TokenInactive);
        }

        let now = unix_now();
        if let Some(exp) = claims.get("exp").and_then(Value::as_u64)
            && exp <= now
        {
            return Err(AuthError::Expired);
        }

        self.store(key, &claims, now);
        Ok(claims)
    }

    fn get_fresh(&self, key: &str) -> Option<Map<String, Value>> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.claims.clone())
    }

    fn store(&self, key: String, claims: &Map<String, Value>, now: u64) {
        // Never cache past the token's own expiry.
        let mut ttl = POSITIVE_CACHE_TTL;
        if let Some(exp) = claims.get("exp").and_then(Value::as_u64) {
            ttl = ttl.min(Duration::from_secs(exp.saturating_sub(now)));
        }

        let mut entries = self.entries.lock();
        if entries.len() >= PURGE_THRESHOLD {
            let deadline = Instant::now();
            entries.retain(|_, e| e.expires_at > deadline);
        }
        entries.insert(
            key,
            CachedEntry {
                claims: claims.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn token_fingerprint(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
