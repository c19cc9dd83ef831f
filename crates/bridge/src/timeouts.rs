//! Central timeout and TTL knobs, overridable through the environment.

use std::time::Duration;

/// Default bound on a single upstream tool-call request (seconds).
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
/// Default bound on OAuth metadata / JWKS / introspection requests (seconds).
pub const DEFAULT_AUTH_HTTP_TIMEOUT_SECS: u64 = 5;
/// Default JWKS cache TTL (seconds).
pub const DEFAULT_JWKS_TTL_SECS: u64 = 300;

fn read_positive_u64_env(var: &str) -> Option<u64> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Bound on a single upstream tool-call request.
///
/// Override with `TOOLBRIDGE_UPSTREAM_TIMEOUT_SECS`.
#[must_use]
pub fn upstream_timeout() -> Duration {
    let secs = read_positive_u64_env("TOOLBRIDGE_UPSTREAM_TIMEOUT_SECS")
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    Duration::from_secs(secs.max(1))
}

/// Bound on OAuth metadata, JWKS and introspection fetches.
///
/// Override with `TOOLBRIDGE_AUTH_HTTP_TIMEOUT_SECS`.
#[must_use]
pub fn auth_http_timeout() -> Duration {
    let secs = read_positive_u64_env("TOOLBRIDGE_AUTH_HTTP_TIMEOUT_SECS")
        .unwrap_or(DEFAULT_AUTH_HTTP_TIMEOUT_SECS);
    Duration::from_secs(secs.max(1))
}

/// How long a fetched JWKS document stays fresh.
///
/// Override with `TOOLBRIDGE_JWKS_TTL_SECS`.
#[must_use]
pub fn jwks_ttl() -> Duration {
    let secs = read_positive_u64_env("TOOLBRIDGE_JWKS_TTL_SECS").unwrap_or(DEFAULT_JWKS_TTL_SECS);
    Duration::from_secs(secs.max(1))
}
