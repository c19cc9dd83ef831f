//! JWKS resolution and caching.
//!
//! Key sets are cached per JWKS URL with a TTL. All writes for one URL go
//! through that URL's async mutex, so concurrent misses coalesce into a
//! single in-flight fetch and a rollover at one issuer never blocks lookups
//! against another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use super::AuthError;
use crate::timeouts;

/// Minimum spacing between forced refetches of one URL (kid-miss storms).
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // Remaining JWK members are irrelevant for RSA verification.
    #[serde(flatten)]
    _rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    #[serde(default)]
    keys: Vec<Jwk>,
}

#[derive(Debug, Default)]
struct CacheSlot {
    keys: Vec<Jwk>,
    fetched_at: Option<Instant>,
}

impl CacheSlot {
    fn fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|t| t.elapsed() < ttl)
    }

    fn fetched_recently(&self) -> bool {
        self.fetched_at
            .is_some_and(|t| t.elapsed() < MIN_REFRESH_INTERVAL)
    }

    fn find(&self, kid: &str) -> Option<Jwk> {
        self.keys
            .iter()
            .find(|k| k.kid.as_deref() == Some(kid))
            .cloned()
    }
}

pub(super) struct JwksCache {
    ttl: Duration,
    /// authorization server URL → resolved JWKS URL.
    resolved: parking_lot::RwLock<HashMap<String, String>>,
    /// JWKS URL → cached key set. The outer lock is only held to clone the
    /// slot handle; fetches happen under the per-URL async mutex.
    slots: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<CacheSlot>>>>,
}

impl JwksCache {
    pub(super) fn new(ttl: Duration) -> JwksCache {
        JwksCache {
            ttl,
            resolved: parking_lot::RwLock::new(HashMap::new()),
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Locate a signing key by `kid` across the configured authorization
    /// servers. A fresh cache that does not contain the kid is refetched
    /// once before the server is skipped.
    pub(super) async fn find_key(
        &self,
        http: &reqwest::Client,
        servers: &[String],
        kid: &str,
    ) -> Result<Jwk, AuthError> {
        let mut last_fetch_error: Option<AuthError> = None;
        for server in servers {
            match self.find_key_at(http, server, kid).await {
                Ok(Some(jwk)) => return Ok(jwk),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "JWKS lookup failed");
                    last_fetch_error = Some(e);
                }
            }
        }
        Err(last_fetch_error.unwrap_or_else(|| AuthError::UnknownKeyId(kid.to_string())))
    }

    async fn find_key_at(
        &self,
        http: &reqwest::Client,
        server: &str,
        kid: &str,
    ) -> Result<Option<Jwk>, AuthError> {
        let url = self.resolve_jwks_url(http, server).await?;
        let slot = self.slot(&url);
        let mut slot = slot.lock().await;

        if !slot.fresh(self.ttl) {
            fetch_into(http, &url, &mut slot).await?;
        }
        if slot.find(kid).is_none() && !slot.fetched_recently() {
            // Possible key rollover: one forced refetch before failing.
            fetch_into(http, &url, &mut slot).await?;
        }
        Ok(slot.find(kid))
    }

    fn slot(&self, url: &str) -> Arc<tokio::sync::Mutex<CacheSlot>> {
        self.slots
            .lock()
            .entry(url.to_string())
            .or_default()
            .clone()
    }

    /// A server URL that already references `jwks` is used directly;
    /// otherwise the OIDC metadata document names the `jwks_uri`.
    async fn resolve_jwks_url(
        &self,
        http: &reqwest::Client,
        server: &str,
    ) -> Result<String, AuthError> {
        if let Some(url) = self.resolved.read().get(server) {
            return Ok(url.clone());
        }

        let base = server.trim_end_matches('/');
        let url = if server.contains("jwks") {
            base.to_string()
        } else {
            let metadata_url = format!("{base}/.well-known/openid_configuration");
            fetch_jwks_uri(http, &metadata_url).await?
        };

        self.resolved
            .write()
            .insert(server.to_string(), url.clone());
        Ok(url)
    }
}

async fn fetch_jwks_uri(http: &reqwest::Client, metadata_url: &str) -> Result<String, AuthError> {
    #[derive(Deserialize)]
    struct Metadata {
        jwks_uri: String,
    }

    let resp = http
        .get(metadata_url)
        .timeout(timeouts::auth_http_timeout())
        .send()
        .await
        .map_err(|e| AuthError::JwksUnreachable(format!("{metadata_url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(AuthError::JwksUnreachable(format!(
            "{metadata_url} returned {}",
            resp.status()
        )));
    }
    let metadata: Metadata = resp
        .json()
        .await
        .map_err(|e| AuthError::JwksUnreachable(format!("invalid metadata document: {e}")))?;
    Ok(metadata.jwks_uri)
}

async fn fetch_into(
    http: &reqwest::Client,
    url: &str,
    slot: &mut CacheSlot,
) -> Result<(), AuthError> {
    let resp = http
        .get(url)
        .timeout(timeouts::auth_http_timeout())
        .send()
        .await
        .map_err(|e| AuthError::JwksUnreachable(format!("{url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(AuthError::JwksUnreachable(format!(
            "{url} returned {}",
            resp.status()
        )));
    }
    let set: JwkSet = resp
        .json()
        .await
        .map_err(|e| AuthError::JwksUnreachable(format!("invalid JWKS document: {e}")))?;

    tracing::debug!(url = %url, keys = set.keys.len(), "fetched JWKS");
    slot.keys = set.keys;
    slot.fetched_at = Some(Instant::now());
    Ok(())
}
